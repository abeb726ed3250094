use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use super::{ok, ApiResult};
use crate::{auth, error::AppError, models::*, AppState};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /api/payments/intent
///
/// Deposit intent for the caller's unpaid booking.
pub async fn create_intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateIntentRequest>,
) -> ApiResult<DepositIntent> {
    let user_id = auth::extract_identity(&headers)?;
    let intent = state.payments.create_deposit(&body.booking_id, &user_id).await?;
    ok(intent)
}

/// POST /api/payments/webhook
///
/// Takes the raw body: the signature covers the exact bytes sent.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let outcome = state
        .payments
        .handle_webhook(signature, &body, Utc::now())
        .await?;
    tracing::debug!(?outcome, "Webhook handled");
    Ok(StatusCode::OK)
}
