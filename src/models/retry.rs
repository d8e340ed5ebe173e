use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Scheduled,
    /// Attempt ceiling reached; requires manual intervention. Never
    /// retried automatically and never silently dropped.
    Exhausted,
}

impl RetryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "exhausted" => Some(Self::Exhausted),
            _ => None,
        }
    }
}

/// Retry bookkeeping for a failed delivery. One descriptor per ledger
/// entry; re-failures update it in place.
#[derive(Debug, Clone, Serialize)]
pub struct RetryDescriptor {
    pub id: String,
    pub delivery_id: String,
    pub last_error: String,
    pub attempt_count: i64,
    /// Exponential backoff with a ceiling; see `RetryPolicy`.
    pub next_attempt_at: i64,
    pub state: RetryState,
    pub created_at: i64,
    pub updated_at: i64,
}
