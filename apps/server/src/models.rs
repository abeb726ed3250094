use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::error::AppError;

// ── Status enums ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Qr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum CouponStatus {
    Active,
    Used,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum DiscountKind {
    Fixed,
    Percent,
}

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Field {
    pub id: i64,
    pub label: String,
    pub size_tag: String,
    pub price_pre: i64,
    pub price_post: i64,
    /// Court id in the scheduling system of record.
    #[serde(skip_serializing)]
    pub external_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    /// Mirrors the external match id.
    pub id: String,
    pub field_id: i64,
    pub user_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i64,
    pub original_price: i64,
    pub discount: i64,
    pub price: i64,
    pub status: BookingStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub admin_note: Option<String>,
    pub is_refunded: bool,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub discount_kind: DiscountKind,
    pub discount_value: i64,
    pub min_spend: Option<i64>,
    /// `None` or empty means every field.
    pub eligible_fields: Option<Json<Vec<i64>>>,
    /// `None` or empty means every payment method.
    pub eligible_payment_methods: Option<Json<Vec<PaymentMethod>>>,
    /// Coupons of this campaign currently counted as confirmed-consumed.
    pub redemption_count: i64,
    pub limit_per_user: i64,
}

impl Campaign {
    pub fn eligible_field_ids(&self) -> &[i64] {
        self.eligible_fields.as_ref().map(|j| j.0.as_slice()).unwrap_or(&[])
    }

    pub fn eligible_methods(&self) -> &[PaymentMethod] {
        self.eligible_payment_methods
            .as_ref()
            .map(|j| j.0.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserCoupon {
    pub id: i64,
    pub campaign_id: i64,
    pub user_id: String,
    pub status: CouponStatus,
    pub booking_id: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A coupon together with the campaign that defines its discount.
#[derive(Debug, Clone, Serialize)]
pub struct OwnedCoupon {
    #[serde(flatten)]
    pub coupon: UserCoupon,
    pub campaign: Campaign,
}

// ── Validated domain inputs ──

/// A field + date + start/end candidate for booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub field_id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Selection {
    /// Length in minutes; an end at or before the start wraps past midnight.
    pub fn duration_minutes(&self) -> i64 {
        let start = minute_of_day(self.start_time);
        let mut end = minute_of_day(self.end_time);
        if end <= start {
            end += 24 * 60;
        }
        end - start
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub selection: Selection,
    pub user_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub coupon_id: Option<i64>,
    pub payment_method: PaymentMethod,
    pub source: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub field_id: i64,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub customer_name: String,
    pub phone_number: String,
    pub coupon_id: Option<i64>,
    pub payment_method: PaymentMethod,
}

impl CreateBookingRequest {
    pub fn validate(self, user_id: String, source: &str) -> Result<NewBooking, AppError> {
        let selection = parse_selection(self.field_id, &self.date, &self.start_time, &self.end_time)?;
        let customer_name = self.customer_name.trim().to_string();
        if customer_name.is_empty() {
            return Err(AppError::Validation("Customer name is required".into()));
        }
        let phone_number = self.phone_number.trim().to_string();
        if phone_number.len() < 9 || !phone_number.chars().all(|c| c.is_ascii_digit() || c == '+') {
            return Err(AppError::Validation("Invalid phone number".into()));
        }
        Ok(NewBooking {
            selection,
            user_id,
            customer_name,
            phone_number,
            coupon_id: self.coupon_id,
            payment_method: self.payment_method,
            source: source.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct BookingSummary {
    pub id: String,
    pub price: i64,
    pub status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub booking: BookingSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    pub match_id: String,
    pub reason: Option<String>,
    pub is_refunded: Option<bool>,
    pub should_return_coupon: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserCancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub booking: Booking,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub booking_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositIntent {
    pub client_secret: String,
    pub amount: i64,
    pub payment_intent_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub date: String,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MinuteRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
    /// Busy intervals without a duration, free slots with one.
    pub fields: std::collections::BTreeMap<i64, Vec<MinuteRange>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuery {
    pub field_id: i64,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub payment_method: Option<PaymentMethod>,
    pub coupon_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub original_price: i64,
    pub discount: i64,
    pub final_price: i64,
    pub coupon_id: Option<i64>,
    pub manual_cleared: bool,
}

#[derive(Debug, Serialize)]
pub struct FieldsResponse {
    pub fields: Vec<Field>,
}

#[derive(Debug, Serialize)]
pub struct CouponsResponse {
    pub coupons: Vec<OwnedCoupon>,
}

#[derive(Debug, Serialize)]
pub struct CouponResponse {
    pub coupon: UserCoupon,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub total: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Response envelope: `{"success": true, ...data}` or `{"success": false, "error": "..."}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Parsing helpers ──

pub fn minute_of_day(t: NaiveTime) -> i64 {
    (t.hour() * 60 + t.minute()) as i64
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::Validation("Invalid date format".into()))
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| AppError::Validation("Invalid time format".into()))
}

pub fn parse_selection(
    field_id: i64,
    date: &str,
    start_time: &str,
    end_time: &str,
) -> Result<Selection, AppError> {
    let selection = Selection {
        field_id,
        date: parse_date(date)?,
        start_time: parse_time(start_time)?,
        end_time: parse_time(end_time)?,
    };
    if selection.start_time == selection.end_time {
        return Err(AppError::Validation("Booking must be longer than zero minutes".into()));
    }
    Ok(selection)
}
