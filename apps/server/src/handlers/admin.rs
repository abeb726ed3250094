use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use super::{ok, ApiResult};
use crate::{auth, booking::CancelOptions, models::*, AppState};

/// POST /api/admin/bookings/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CancelBookingRequest>,
) -> ApiResult<BookingResponse> {
    auth::require_staff(&headers, &state.config.admin_token)?;

    let opts = CancelOptions {
        reason: body.reason,
        is_refunded: body.is_refunded.unwrap_or(false),
        return_coupon: body.should_return_coupon.unwrap_or(false),
    };
    let booking = state.lifecycle.cancel(&body.match_id, opts, Utc::now()).await?;
    ok(BookingResponse { booking })
}

/// POST /api/admin/bookings/{id}/confirm
///
/// Payment taken at the venue.
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<BookingResponse> {
    auth::require_staff(&headers, &state.config.admin_token)?;
    let booking = state.lifecycle.confirm_by_staff(&id).await?;
    ok(BookingResponse { booking })
}

/// POST /api/admin/sweep
///
/// Run the timeout sweep now.
pub async fn sweep(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<SweepReport> {
    auth::require_staff(&headers, &state.config.admin_token)?;
    let report = state.sweeper.sweep(Utc::now()).await?;
    ok(report)
}
