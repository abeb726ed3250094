use async_trait::async_trait;
use serde::Deserialize;

use super::{PaymentGateway, PaymentIntent};
use crate::error::AppError;

const STRIPE_API: &str = "https://api.stripe.com/v1";

/// Minor units per major unit (satang per baht).
const MINOR_UNITS: i64 = 100;

/// Stripe-compatible payment intents over form-encoded HTTPS.
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    amount: i64,
    status: String,
}

impl From<IntentBody> for PaymentIntent {
    fn from(body: IntentBody) -> Self {
        PaymentIntent {
            id: body.id,
            client_secret: body.client_secret.unwrap_or_default(),
            amount: body.amount / MINOR_UNITS,
            status: body.status,
        }
    }
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self::with_base(STRIPE_API, secret_key)
    }

    pub fn with_base(api_base: &str, secret_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    async fn read_intent(resp: reqwest::Response, what: &str) -> Result<PaymentIntent, AppError> {
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("Stripe {} failed: {} - {}", what, status, text);
            return Err(AppError::Upstream(format!("stripe {} returned {}", what, status)));
        }
        let body: IntentBody = resp.json().await?;
        Ok(body.into())
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        booking_id: &str,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, AppError> {
        let minor = (amount * MINOR_UNITS).to_string();
        let form = [
            ("amount", minor.as_str()),
            ("currency", currency),
            ("payment_method_types[]", "promptpay"),
            ("metadata[booking_id]", booking_id),
            ("description", "Field booking deposit"),
        ];

        let resp = self
            .client
            .post(format!("{}/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(&form)
            .send()
            .await?;

        let intent = Self::read_intent(resp, "create intent").await?;
        tracing::info!("Stripe intent created: {} for booking {}", intent.id, booking_id);
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, AppError> {
        let resp = self
            .client
            .get(format!("{}/payment_intents/{}", self.api_base, intent_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::read_intent(resp, "retrieve intent").await
    }

    async fn refund(&self, intent_id: &str) -> Result<(), AppError> {
        let resp = self
            .client
            .post(format!("{}/refunds", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("refund-{}", intent_id))
            .form(&[("payment_intent", intent_id)])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("Stripe refund failed: {} - {}", status, text);
            return Err(AppError::Upstream(format!("stripe refund returned {}", status)));
        }

        tracing::info!("Stripe refund created for intent {}", intent_id);
        Ok(())
    }
}
