use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use super::{ok, ApiResult};
use crate::{
    auth,
    coupons::{CouponContext, CouponSelection},
    error::AppError,
    models::*,
    pricing,
    AppState,
};

/// GET /api/fields
pub async fn list_fields(State(state): State<Arc<AppState>>) -> ApiResult<FieldsResponse> {
    ok(FieldsResponse {
        fields: state.catalog.all().cloned().collect(),
    })
}

/// GET /api/availability?date=YYYY-MM-DD[&durationMinutes=N]
///
/// Busy intervals per field, or free slots when a duration is given.
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AvailabilityQuery>,
) -> ApiResult<AvailabilityResponse> {
    let date = parse_date(&q.date)?;
    let fields = match q.duration_minutes {
        Some(duration) => state.availability.search(date, duration, Utc::now()).await?,
        None => state.availability.busy(date).await?,
    };
    ok(AvailabilityResponse {
        date,
        duration_minutes: q.duration_minutes,
        fields,
    })
}

/// GET /api/price
///
/// Price and best discount for a selection.
///
/// Anonymous callers get the undiscounted price.
pub async fn quote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<PriceQuery>,
) -> ApiResult<QuoteResponse> {
    let selection = parse_selection(q.field_id, &q.date, &q.start_time, &q.end_time)?;
    let field = state.catalog.require(selection.field_id)?;
    let original_price = pricing::price_selection(field, &selection)?;

    let coupons = match auth::optional_identity(&headers) {
        Some(user_id) => state.store.list_active_coupons(&user_id).await?,
        None => Vec::new(),
    };
    let ctx = CouponContext {
        price: original_price,
        field_id: field.id,
        payment_method: q.payment_method,
    };
    let applied = CouponSelection { manual: q.coupon_id }.resolve(&coupons, &ctx);

    ok(QuoteResponse {
        original_price,
        discount: applied.discount,
        final_price: applied.final_price,
        coupon_id: applied.coupon_id,
        manual_cleared: applied.manual_cleared,
    })
}

/// GET /api/coupons
///
/// Caller's unused coupons.
pub async fn my_coupons(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<CouponsResponse> {
    let user_id = auth::extract_identity(&headers)?;
    let coupons = state.store.list_active_coupons(&user_id).await?;
    ok(CouponsResponse { coupons })
}

/// POST /api/campaigns/{id}/collect
pub async fn collect_coupon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(campaign_id): Path<i64>,
) -> ApiResult<CouponResponse> {
    let user_id = auth::extract_identity(&headers)?;
    let campaign = state
        .store
        .find_campaign(campaign_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Campaign not found".into()))?;

    let coupon = state
        .store
        .issue_coupon(&campaign, &user_id, Utc::now())
        .await?
        .ok_or_else(|| AppError::Conflict("You already hold the maximum coupons for this campaign".into()))?;

    tracing::info!(campaign_id, coupon_id = coupon.id, user_id = %user_id, "Coupon collected");
    ok(CouponResponse { coupon })
}

/// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> ApiResult<CreateBookingResponse> {
    let user_id = auth::extract_identity(&headers)?;
    let request = body.validate(user_id, "web")?;
    let booking = state.lifecycle.create(request, Utc::now()).await?;

    ok(CreateBookingResponse {
        booking: BookingSummary {
            id: booking.id,
            price: booking.price,
            status: booking.status,
            timeout_at: booking.timeout_at,
        },
    })
}

/// GET /api/bookings/{id}
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<BookingResponse> {
    let user_id = auth::extract_identity(&headers)?;
    let booking = state.lifecycle.find(&id).await?;
    if booking.user_id != user_id {
        return Err(AppError::NotFound("Booking not found".into()));
    }
    ok(BookingResponse { booking })
}

/// POST /api/bookings/{id}/cancel
///
/// Owner cancel; a confirmed booking's coupon is burned.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UserCancelRequest>,
) -> ApiResult<BookingResponse> {
    let user_id = auth::extract_identity(&headers)?;
    let booking = state
        .lifecycle
        .cancel_by_owner(&id, &user_id, body.reason, Utc::now())
        .await?;
    ok(BookingResponse { booking })
}
