//! Booking state machine: `pending_payment` → `confirmed` → `cancelled`.
//!
//! This is the only writer of booking and coupon status. Every transition is
//! a conditional write in the store, so concurrent request handlers, the
//! payment webhook and the timeout sweeper can race without locks here.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::FieldCatalog;
use crate::coupons::{self, CouponContext};
use crate::error::AppError;
use crate::models::*;
use crate::price_sync::PriceSync;
use crate::pricing;
use crate::store::{CancelPlan, CouponDisposition, Store};
use crate::upstream::{MatchRequest, Notifier, SchedulingApi};

pub const TIMEOUT_NOTE: &str = "payment timeout";

#[derive(Debug, Clone, Default)]
pub struct CancelOptions {
    pub reason: Option<String>,
    pub is_refunded: bool,
    pub return_coupon: bool,
}

#[derive(Debug)]
pub enum ConfirmOutcome {
    Confirmed,
    AlreadyConfirmed,
    /// Payment arrived after the booking was cancelled.
    LateForCancelled(Booking),
}

pub struct BookingLifecycle {
    store: Arc<dyn Store>,
    catalog: Arc<FieldCatalog>,
    scheduler: Arc<dyn SchedulingApi>,
    notifier: Arc<dyn Notifier>,
    price_sync: PriceSync,
    payment_window: chrono::Duration,
    offset: FixedOffset,
}

impl BookingLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<FieldCatalog>,
        scheduler: Arc<dyn SchedulingApi>,
        notifier: Arc<dyn Notifier>,
        price_sync: PriceSync,
        payment_window: chrono::Duration,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            catalog,
            scheduler,
            notifier,
            price_sync,
            payment_window,
            offset,
        }
    }

    pub async fn find(&self, id: &str) -> Result<Booking, AppError> {
        self.store
            .find_booking(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Booking not found".into()))
    }

    /// Prices the selection, escrows the coupon, reserves the slot in the
    /// scheduling system and persists the booking under the external match id.
    pub async fn create(&self, req: NewBooking, now: DateTime<Utc>) -> Result<Booking, AppError> {
        let sel = &req.selection;
        let field = self.catalog.require(sel.field_id)?;
        let duration = sel.duration_minutes();
        let original_price = pricing::price_selection(field, sel)?;

        let start_at = self
            .offset
            .from_local_datetime(&sel.date.and_time(sel.start_time))
            .single()
            .ok_or_else(|| AppError::Validation("Invalid start time".into()))?;
        let end_at = start_at + chrono::Duration::minutes(duration);
        if start_at <= now {
            return Err(AppError::Validation("Cannot book a time in the past".into()));
        }

        let mut discount = 0;
        let mut claim: Option<(i64, String)> = None;
        if let Some(coupon_id) = req.coupon_id {
            let owned = self
                .store
                .find_coupon(coupon_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Coupon not found".into()))?;
            if owned.coupon.user_id != req.user_id {
                return Err(AppError::Forbidden("Coupon belongs to another user".into()));
            }
            if owned.coupon.status != CouponStatus::Active {
                return Err(AppError::Conflict("Coupon already used".into()));
            }
            let ctx = CouponContext {
                price: original_price,
                field_id: field.id,
                payment_method: Some(req.payment_method),
            };
            if !coupons::is_eligible(&owned, &ctx) {
                return Err(AppError::Validation("Coupon is not valid for this booking".into()));
            }
            discount = coupons::discount_value(&owned, original_price);

            let key = format!("claim-{}", Uuid::new_v4());
            if !self.store.claim_coupon(coupon_id, &key, now).await? {
                return Err(AppError::Conflict("Coupon already used".into()));
            }
            claim = Some((coupon_id, key));
        }

        let price = coupons::final_price(original_price, discount);
        let (status, payment_status, timeout_at) = if price == 0 {
            (BookingStatus::Confirmed, PaymentStatus::Paid, None)
        } else if req.payment_method == PaymentMethod::Cash {
            (BookingStatus::Confirmed, PaymentStatus::Unpaid, None)
        } else {
            (
                BookingStatus::PendingPayment,
                PaymentStatus::Unpaid,
                Some(now + self.payment_window),
            )
        };

        let match_req = MatchRequest {
            court_id: field.external_id.clone(),
            start_time: start_at,
            end_time: end_at,
            customer_name: req.customer_name.clone(),
            phone_number: req.phone_number.clone(),
            price,
        };
        let match_id = match self.scheduler.create_match(&match_req).await {
            Ok(id) => id,
            Err(e) => {
                self.release_claim(claim.as_ref()).await;
                return Err(e);
            }
        };

        let booking = Booking {
            id: match_id.clone(),
            field_id: field.id,
            user_id: req.user_id,
            customer_name: req.customer_name,
            phone_number: req.phone_number,
            date: sel.date,
            start_time: sel.start_time,
            end_time: sel.end_time,
            duration_minutes: duration,
            original_price,
            discount: original_price - price,
            price,
            status,
            payment_method: req.payment_method,
            payment_status,
            payment_intent_id: None,
            timeout_at,
            admin_note: None,
            is_refunded: false,
            source: req.source,
            created_at: now,
            cancelled_at: None,
        };

        let claim_key = claim.as_ref().map(|(_, key)| key.as_str());
        if let Err(e) = self.store.insert_booking(&booking, claim_key).await {
            tracing::error!(
                target: "reconciliation",
                match_id = %match_id,
                coupon_id = ?claim.as_ref().map(|(id, _)| *id),
                error = %e,
                "Booking row not saved; external reservation is orphaned"
            );
            self.release_claim(claim.as_ref()).await;
            return Err(e);
        }

        self.price_sync.spawn(match_id.clone(), price);

        tracing::info!(
            booking_id = %match_id,
            field_id = field.id,
            price,
            status = status.as_str(),
            "Booking created"
        );
        Ok(booking)
    }

    async fn release_claim(&self, claim: Option<&(i64, String)>) {
        let Some((coupon_id, key)) = claim else {
            return;
        };
        if let Err(e) = self.store.release_claim(*coupon_id, key).await {
            tracing::error!(
                target: "reconciliation",
                coupon_id,
                claim_key = %key,
                error = %e,
                "Coupon stuck in escrow after failed booking"
            );
        }
    }

    /// Cancels a booking, deciding the fate of its escrowed coupons from the
    /// status it had just before the cancel.
    ///
    /// Repeat calls on a cancelled booking return it unchanged.
    pub async fn cancel(&self, id: &str, opts: CancelOptions, now: DateTime<Utc>) -> Result<Booking, AppError> {
        let booking = self.find(id).await?;
        self.cancel_observed(booking, opts, now).await
    }

    /// Cancels against the state in `booking`. When the row moved on in the
    /// meantime the cancel is not re-planned: a booking that is cancelled by
    /// now is returned as is, anything else is a conflict.
    async fn cancel_observed(
        &self,
        booking: Booking,
        opts: CancelOptions,
        now: DateTime<Utc>,
    ) -> Result<Booking, AppError> {
        let prior = booking.status;
        if prior == BookingStatus::Cancelled {
            return Ok(booking);
        }

        let disposition = if prior == BookingStatus::PendingPayment || opts.return_coupon {
            CouponDisposition::Release
        } else {
            CouponDisposition::Burn
        };
        let plan = CancelPlan {
            note: opts.reason,
            is_refunded: opts.is_refunded,
            disposition,
            restore_quota: prior == BookingStatus::Confirmed,
        };

        let id = booking.id.as_str();
        if self.store.cancel_booking(id, prior, &plan, now).await? {
            tracing::info!(
                booking_id = id,
                prior = prior.as_str(),
                disposition = ?disposition,
                "Booking cancelled"
            );
            self.cancel_external(id).await;
            return self.find(id).await;
        }

        let current = self.find(id).await?;
        if current.status == BookingStatus::Cancelled {
            return Ok(current);
        }
        tracing::warn!(
            target: "conflict",
            booking_id = id,
            expected = prior.as_str(),
            found = current.status.as_str(),
            "Booking changed state during cancel"
        );
        Err(AppError::Conflict("Booking is changing state, please retry".into()))
    }

    /// Customer-initiated cancel. Bookings of other users look missing.
    pub async fn cancel_by_owner(
        &self,
        id: &str,
        user_id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Booking, AppError> {
        let booking = self.find(id).await?;
        if booking.user_id != user_id {
            return Err(AppError::NotFound("Booking not found".into()));
        }
        let opts = CancelOptions {
            reason,
            is_refunded: false,
            return_coupon: false,
        };
        self.cancel(id, opts, now).await
    }

    /// Timeout cancel of an unpaid booking. Coupons always go back to the user.
    ///
    /// Returns `false` when the booking left `pending_payment` first.
    pub async fn expire(&self, booking: &Booking, now: DateTime<Utc>) -> Result<bool, AppError> {
        let plan = CancelPlan {
            note: Some(TIMEOUT_NOTE.into()),
            is_refunded: false,
            disposition: CouponDisposition::Release,
            restore_quota: false,
        };
        let won = self
            .store
            .cancel_booking(&booking.id, BookingStatus::PendingPayment, &plan, now)
            .await?;
        if !won {
            tracing::warn!(
                target: "conflict",
                booking_id = %booking.id,
                "Booking left pending_payment before the timeout cancel"
            );
            return Ok(false);
        }

        tracing::info!(booking_id = %booking.id, "Unpaid booking expired");
        self.cancel_external(&booking.id).await;

        let text = format!(
            "Your booking on {} at {}-{} was cancelled because the deposit was not paid in time.",
            booking.date.format("%d/%m/%Y"),
            booking.start_time.format("%H:%M"),
            booking.end_time.format("%H:%M"),
        );
        if let Err(e) = self.notifier.push(&booking.user_id, &text).await {
            tracing::warn!(booking_id = %booking.id, "Timeout notice not delivered: {}", e);
        }
        Ok(true)
    }

    /// `pending_payment` → `confirmed`/`paid`; counts escrowed coupons once.
    pub async fn confirm_payment(&self, id: &str) -> Result<ConfirmOutcome, AppError> {
        if self.store.confirm_payment(id).await? {
            tracing::info!(booking_id = id, "Booking confirmed by payment");
            return Ok(ConfirmOutcome::Confirmed);
        }

        let booking = self.find(id).await?;
        match booking.status {
            BookingStatus::Confirmed => Ok(ConfirmOutcome::AlreadyConfirmed),
            BookingStatus::Cancelled => {
                tracing::warn!(
                    target: "conflict",
                    booking_id = id,
                    "Payment succeeded for a booking that is already cancelled"
                );
                Ok(ConfirmOutcome::LateForCancelled(booking))
            }
            BookingStatus::PendingPayment => {
                Err(AppError::Conflict("Booking is changing state, please retry".into()))
            }
        }
    }

    /// Staff marks a booking paid at the venue.
    pub async fn confirm_by_staff(&self, id: &str) -> Result<Booking, AppError> {
        let booking = self.find(id).await?;
        match booking.status {
            BookingStatus::PendingPayment => {
                if let ConfirmOutcome::LateForCancelled(_) = self.confirm_payment(id).await? {
                    return Err(AppError::Conflict("Booking is cancelled".into()));
                }
            }
            BookingStatus::Confirmed => {
                if booking.payment_status != PaymentStatus::Paid {
                    self.store.settle_cash(id).await?;
                    tracing::info!(booking_id = id, "Cash balance settled");
                }
            }
            BookingStatus::Cancelled => {
                return Err(AppError::Conflict("Booking is cancelled".into()));
            }
        }
        self.find(id).await
    }

    async fn cancel_external(&self, match_id: &str) {
        if let Err(e) = self.scheduler.cancel_match(match_id).await {
            tracing::error!(
                target: "reconciliation",
                match_id,
                error = %e,
                "External reservation still active after local cancel"
            );
        }
    }
}
