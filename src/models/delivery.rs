use serde::{Deserialize, Serialize};

/// How an accepted delivery was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    /// Cryptographic signature matched.
    Signature,
    /// Signature inconclusive, source IP on the provider allowlist.
    /// Degraded trust: follow-up validation should apply before any
    /// irreversible effect.
    IpAllowlist,
    /// Accepted without any check (dev mode, no secret configured).
    Unverified,
    /// Authentication failed; recorded only for forensic review.
    Forensic,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::IpAllowlist => "ip-allowlist",
            Self::Unverified => "unverified",
            Self::Forensic => "forensic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "signature" => Some(Self::Signature),
            "ip-allowlist" => Some(Self::IpAllowlist),
            "unverified" => Some(Self::Unverified),
            "forensic" => Some(Self::Forensic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Processed,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable record of one accepted inbound event.
///
/// Inserted exactly once per (provider, external_event_id); the first-seen
/// raw body is authoritative for audit and replay. Rows are never deleted
/// by this pipeline.
#[derive(Debug, Clone)]
pub struct DeliveryLedgerEntry {
    pub id: String,
    pub provider: super::Provider,
    pub external_event_id: String,
    pub event_type: String,
    /// Exact bytes received on the wire, preserved verbatim.
    pub raw_body: Vec<u8>,
    /// Received headers as a JSON object (lower-cased names).
    pub headers: String,
    pub trust: TrustLevel,
    pub status: DeliveryStatus,
    pub created_at: i64,
    pub processed_at: Option<i64>,
}

/// Data required to record a delivery at ingestion time.
#[derive(Debug, Clone)]
pub struct NewDelivery<'a> {
    pub provider: super::Provider,
    pub external_event_id: &'a str,
    pub event_type: &'a str,
    pub raw_body: &'a [u8],
    pub headers: &'a str,
    pub trust: TrustLevel,
}
