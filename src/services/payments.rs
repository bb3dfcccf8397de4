use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::config::PaymentConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
}

/// Payment collaborator boundary. The lifecycle manager calls this
/// synchronously for payment-dependent transitions and treats any failure
/// as a hard stop for that transition (fail closed).
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create an unconfirmed charge intent. An intent the caller never
    /// confirms (for example when the booking behind it is rejected) is
    /// expected to expire at the provider; nothing here cancels it.
    async fn create_charge(
        &self,
        amount: i64,
        metadata: serde_json::Value,
    ) -> AppResult<ChargeIntent>;

    async fn refund(&self, charge_id: &str, amount: i64) -> AppResult<RefundReceipt>;

    async fn confirmed(&self, payment_id: &str) -> AppResult<bool>;
}

/// HTTP-backed provider client. Protocol details beyond this thin surface
/// belong to the provider, not this service.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPaymentProvider {
    pub fn from_config(config: &PaymentConfig) -> Option<Self> {
        let base_url = config.base_url.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[derive(Debug, Deserialize)]
struct ConfirmationResponse {
    confirmed: bool,
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_charge(
        &self,
        amount: i64,
        metadata: serde_json::Value,
    ) -> AppResult<ChargeIntent> {
        let response = self
            .request(reqwest::Method::POST, "/charges")
            .json(&serde_json::json!({ "amount": amount, "metadata": metadata }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::PaymentFailed(format!(
                "charge creation returned {status}"
            )));
        }

        let intent: ChargeIntent = response.json().await?;
        info!(charge_id = %intent.id, amount, "Created payment charge");
        Ok(intent)
    }

    async fn refund(&self, charge_id: &str, amount: i64) -> AppResult<RefundReceipt> {
        let response = self
            .request(reqwest::Method::POST, "/refunds")
            .json(&serde_json::json!({ "charge_id": charge_id, "amount": amount }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::PaymentFailed(format!(
                "refund returned {status}"
            )));
        }

        let receipt: RefundReceipt = response.json().await?;
        info!(refund_id = %receipt.id, charge_id, amount, "Issued refund");
        Ok(receipt)
    }

    async fn confirmed(&self, payment_id: &str) -> AppResult<bool> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/charges/{payment_id}/confirmation"),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::PaymentFailed(format!(
                "confirmation check returned {status}"
            )));
        }

        let body: ConfirmationResponse = response.json().await?;
        Ok(body.confirmed)
    }
}
