use serde::{Deserialize, Serialize};

/// Local order status driven by provider events.
///
/// Every status except `pending` is terminal. Reversals (refund,
/// chargeback) may land on a terminal order — an approved payment can
/// later be refunded — but no other move off a terminal status is
/// allowed; a provider claiming a refunded order went back to paid is an
/// anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::ChargedBack => "charged_back",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            "charged_back" => Some(Self::ChargedBack),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Money-return statuses, the only ones allowed to land on an order
    /// that is already terminal.
    pub fn is_reversal(&self) -> bool {
        matches!(self, Self::Refunded | Self::ChargedBack)
    }
}

/// An order owned by the storefront subsystem. This pipeline only mutates
/// status and correlation fields; order creation belongs to a separate
/// ingestion path.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: String,
    /// Correlation key sent to providers (e.g. "ORDER-123").
    pub external_reference: String,
    /// Marketplace-assigned order id, when the order originated there.
    pub external_order_id: Option<String>,
    pub status: OrderStatus,
    /// Provider payment id, set once a payment event correlates.
    pub payment_id: Option<String>,
    pub shipping_status: Option<String>,
    pub cancellation_reason: Option<String>,
    /// Set exactly once, on the first transition to `paid`.
    pub paid_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub refunded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to create an order (used by the ingestion path and tests).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub external_reference: String,
    pub external_order_id: Option<String>,
}
