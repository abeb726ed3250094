//! Ports to the systems this service does not own: the scheduling system of
//! record, the payment processor and the customer messaging channel.

pub mod line;
pub mod scheduling;
pub mod stripe;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A reserved interval on one court, as reported by the scheduling system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchRequest {
    pub court_id: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub customer_name: String,
    pub phone_number: String,
    pub price: i64,
}

#[async_trait]
pub trait SchedulingApi: Send + Sync {
    async fn busy_intervals(&self, court_id: &str, date: NaiveDate) -> Result<Vec<BusyInterval>, AppError>;
    /// Returns the external match id. The scheduling system rejects overlaps.
    async fn create_match(&self, req: &MatchRequest) -> Result<String, AppError>;
    async fn update_price(&self, match_id: &str, price: i64) -> Result<(), AppError>;
    async fn cancel_match(&self, match_id: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    /// Major currency units.
    pub amount: i64,
    pub status: String,
}

impl PaymentIntent {
    /// Still waiting for the customer; safe to hand the same secret out again.
    pub fn is_reusable(&self) -> bool {
        matches!(
            self.status.as_str(),
            "requires_payment_method" | "requires_confirmation" | "requires_action" | "processing"
        )
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        booking_id: &str,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, AppError>;
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, AppError>;
    async fn refund(&self, intent_id: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn push(&self, user_id: &str, text: &str) -> Result<(), AppError>;
}
