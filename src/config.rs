use std::env;
use std::net::IpAddr;

/// Retry backoff parameters for failed webhook processing.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Base delay for the first retry, in seconds.
    pub base_secs: i64,
    /// Ceiling on the backoff delay, in seconds.
    pub cap_secs: i64,
    /// Attempts after which a descriptor becomes `exhausted`.
    pub max_attempts: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: 30,
            cap_secs: 3600,
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,

    /// Shared secret for the payment provider's signature scheme.
    /// Empty means "not configured" (dev-mode accept, see trust policy).
    pub payment_webhook_secret: String,
    /// Shared secret for the marketplace provider's body-HMAC scheme.
    pub marketplace_webhook_secret: String,

    /// Maximum age of a webhook timestamp token before rejection, in seconds.
    pub replay_window_secs: i64,
    /// Known provider egress addresses, consulted only when signature
    /// verification is inconclusive.
    pub trusted_ips: Vec<IpAddr>,
    /// When set, rejected deliveries are still recorded to the ledger for
    /// forensic review.
    pub forensic_capture: bool,

    pub retry: RetryPolicy,

    /// Payment provider API, used to fetch full payment details once an
    /// event id is authenticated. Optional: bodies that carry status and
    /// external_reference inline never hit the API.
    pub payment_api_base_url: Option<String>,
    pub payment_api_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("SHOPHOOKS_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let trusted_ips = env::var("PROVIDER_IP_ALLOWLIST")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse::<IpAddr>().ok())
            .collect();

        let retry = RetryPolicy {
            base_secs: env_i64("RETRY_BASE_SECS", RetryPolicy::default().base_secs),
            cap_secs: env_i64("RETRY_CAP_SECS", RetryPolicy::default().cap_secs),
            max_attempts: env_i64("RETRY_MAX_ATTEMPTS", RetryPolicy::default().max_attempts),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "shophooks.db".to_string()),
            dev_mode,
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            marketplace_webhook_secret: env::var("MARKETPLACE_WEBHOOK_SECRET")
                .unwrap_or_default(),
            replay_window_secs: env_i64("REPLAY_WINDOW_SECS", 300),
            trusted_ips,
            forensic_capture: env::var("FORENSIC_CAPTURE")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
            retry,
            payment_api_base_url: env::var("PAYMENT_API_BASE_URL").ok(),
            payment_api_token: env::var("PAYMENT_API_TOKEN").ok(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
