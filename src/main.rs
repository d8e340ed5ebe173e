use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shophooks::config::Config;
use shophooks::db::{create_pool, init_db, queries, AppState, ProviderSecrets};
use shophooks::handlers;
use shophooks::models::CreateOrder;
use shophooks::processor::{TransitionHook, TransitionLogger};
use shophooks::providers::PaymentApiClient;
use shophooks::rate_limit;
use shophooks::replay::{MemoryTtlCache, ReplayGuard};
use shophooks::retry::spawn_retry_worker;
use shophooks::trust::IpAllowlist;

#[derive(Parser, Debug)]
#[command(name = "shophooks")]
#[command(about = "Webhook trust and idempotency pipeline for the storefront")]
struct Cli {
    /// Seed the database with a demo order (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds a demo order matching the references used in provider sandbox
/// dashboards. Idempotent: re-running against an existing database is a
/// no-op.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    for (reference, external_order_id) in [
        ("ORDER-123", None),
        ("ORDER-456", Some("mk_555".to_string())),
    ] {
        let order = queries::create_order(
            &conn,
            &CreateOrder {
                external_reference: reference.to_string(),
                external_order_id,
            },
        )
        .expect("Failed to seed demo order");
        tracing::info!("Seeded demo order {} ({})", order.external_reference, order.id);
    }
}

/// Spawns a background task that periodically purges expired replay
/// dedup records. Runs every 5 minutes.
fn spawn_maintenance_task(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match state.replay.purge_expired(&conn) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::debug!("Purged {} expired replay records", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to purge replay records: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for maintenance: {}", e);
                }
            }
        }
    });

    tracing::info!("Background maintenance task started (runs every 5 minutes)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shophooks=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }
    if config.payment_webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set; payment webhooks unverified in dev, rejected otherwise");
    }
    if config.marketplace_webhook_secret.is_empty() {
        tracing::warn!("MARKETPLACE_WEBHOOK_SECRET not set; marketplace webhooks unverified in dev, rejected otherwise");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let payment_api = match (&config.payment_api_base_url, &config.payment_api_token) {
        (Some(base_url), Some(token)) => Some(Arc::new(PaymentApiClient::new(
            base_url.clone(),
            token.clone(),
        ))),
        _ => {
            tracing::warn!("Payment API not configured; bare payment notifications will fail processing");
            None
        }
    };

    let hooks: Vec<Box<dyn TransitionHook>> = vec![Box::new(TransitionLogger)];

    let state = AppState {
        db: db_pool,
        secrets: ProviderSecrets {
            payment: config.payment_webhook_secret.clone(),
            marketplace: config.marketplace_webhook_secret.clone(),
        },
        allowlist: Arc::new(IpAllowlist::new(config.trusted_ips.clone())),
        replay: ReplayGuard::new(
            Arc::new(MemoryTtlCache::default()),
            config.replay_window_secs,
        ),
        payment_api,
        forensic_capture: config.forensic_capture,
        dev_mode: config.dev_mode,
        retry: config.retry,
        hooks: Arc::new(hooks),
    };

    // Purge stale replay records from previous runs on startup
    {
        let conn = state.db.get().expect("Failed to get connection for purge");
        match state.replay.purge_expired(&conn) {
            Ok(count) if count > 0 => {
                tracing::info!("Purged {} expired replay records on startup", count)
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to purge replay records on startup: {}", e),
        }
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set SHOPHOOKS_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_maintenance_task(state.clone());
    spawn_retry_worker(state.clone());

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        // Webhook endpoints (provider-specific auth, no rate limit:
        // throttling providers only turns bursts into redelivery storms)
        .merge(handlers::webhooks::router())
        // Admin diagnostics (per-IP rate limited)
        .merge(rate_limit::with_rate_limit(
            handlers::admin::router(),
            rate_limit::admin_rpm_from_env(),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Shophooks server listening on {}", addr);

    // into_make_service_with_connect_info enables IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
