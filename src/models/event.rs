use serde::{Deserialize, Serialize};

/// Webhook-emitting providers this pipeline accepts events from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Payment,
    Marketplace,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Marketplace => "marketplace",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "payment" => Some(Self::Payment),
            "marketplace" => Some(Self::Marketplace),
            _ => None,
        }
    }
}

/// Provider-reported status, before mapping onto `OrderStatus`.
///
/// `Created` belongs to the marketplace order-ingestion flow; for this
/// pipeline it is a logged no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    Created,
    Paid,
}

impl ProviderStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" | "in_process" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            "charged_back" => Some(Self::ChargedBack),
            "created" => Some(Self::Created),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

/// A provider event normalized to the fields the processor needs.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub provider: Provider,
    pub external_event_id: String,
    pub event_type: String,
    pub status: ProviderStatus,
    /// Correlation key mapping the event to a local order.
    pub external_reference: Option<String>,
    /// Provider payment id, when the event carries one.
    pub payment_id: Option<String>,
}

/// Result of parsing a raw webhook body.
#[derive(Debug)]
pub enum ParsedEvent {
    Ready(NormalizedEvent),
    /// Payment notifications may carry only an event id; full details are
    /// fetched from the provider API after authentication.
    NeedsLookup {
        payment_id: String,
        event_type: String,
    },
    /// Event type or status not relevant to order state.
    Ignored,
}

// Provider payloads are modelled as narrow, explicitly-validated shapes.
// Payloads missing required correlation fields are rejected, not coerced.

/// Payment provider notification body.
///
/// `{"id": 101, "type": "payment", "action": "payment.updated",
///   "data": {"id": "pay_1", "status": "approved",
///            "external_reference": "ORDER-123"}}`
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookBody {
    pub id: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub action: Option<String>,
    pub data: Option<PaymentWebhookData>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookData {
    pub id: Option<serde_json::Value>,
    pub status: Option<String>,
    pub external_reference: Option<String>,
}

/// Marketplace notification body.
///
/// `{"id": "evt_9", "event": "order/paid",
///   "order": {"id": 555, "reference": "ORDER-123", "status": "paid"}}`
#[derive(Debug, Deserialize)]
pub struct MarketplaceWebhookBody {
    pub id: Option<serde_json::Value>,
    pub event: String,
    pub order: Option<MarketplaceWebhookOrder>,
}

#[derive(Debug, Deserialize)]
pub struct MarketplaceWebhookOrder {
    pub id: Option<serde_json::Value>,
    pub reference: Option<String>,
    pub status: Option<String>,
}

/// Providers send ids as either JSON strings or integers; normalize both.
pub fn id_value_to_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_value_string_and_number() {
        assert_eq!(
            id_value_to_string(&serde_json::json!("pay_1")),
            Some("pay_1".to_string())
        );
        assert_eq!(
            id_value_to_string(&serde_json::json!(12345)),
            Some("12345".to_string())
        );
        assert_eq!(id_value_to_string(&serde_json::json!("")), None);
        assert_eq!(id_value_to_string(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_provider_status_aliases() {
        assert_eq!(
            ProviderStatus::from_str("in_process"),
            Some(ProviderStatus::Pending)
        );
        assert_eq!(ProviderStatus::from_str("shipped"), None);
    }
}
