//! Payment provider REST client.
//!
//! Some payment notifications carry only an event id; the full payment
//! (status, external reference) is fetched here, strictly after the
//! request has been authenticated.

use serde::Deserialize;

use crate::error::{AppError, Result};

/// Payment details as returned by `GET /v1/payments/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetails {
    pub id: serde_json::Value,
    pub status: Option<String>,
    pub external_reference: Option<String>,
}

pub struct PaymentApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PaymentApiClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails> {
        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("payment API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(payment_id = %payment_id, %status, body = %body, "payment API error");
            return Err(AppError::Upstream(format!(
                "payment API returned {status} for payment {payment_id}"
            )));
        }

        response
            .json::<PaymentDetails>()
            .await
            .map_err(|e| AppError::Upstream(format!("payment API response malformed: {e}")))
    }
}
