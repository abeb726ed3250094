//! Deposit intents and asynchronous payment reconciliation.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::verify_webhook_signature;
use crate::booking::{BookingLifecycle, ConfirmOutcome};
use crate::config::Config;
use crate::error::AppError;
use crate::models::*;
use crate::store::Store;
use crate::upstream::PaymentGateway;

pub const EVENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_FAILED: &str = "payment_intent.payment_failed";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: IntentObject,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Ignored,
    Duplicate,
    Confirmed,
    AlreadyConfirmed,
    /// Paid after cancellation and refunded automatically.
    LateRefunded,
    /// Paid after cancellation; the refund needs an operator.
    LateRefundFailed,
    /// Redelivered payment for a booking that was paid, then cancelled.
    AlreadySettled,
    PaymentFailed,
}

pub struct PaymentReconciler {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    lifecycle: Arc<BookingLifecycle>,
    deposit_amount: i64,
    currency: String,
    webhook_secret: String,
    tolerance_secs: i64,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        lifecycle: Arc<BookingLifecycle>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            gateway,
            lifecycle,
            deposit_amount: config.deposit_amount,
            currency: config.payment_currency.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            tolerance_secs: config.webhook_tolerance_secs,
        }
    }

    /// Issues (or re-issues) the deposit intent of an unpaid booking.
    ///
    /// A still-open intent for the same amount is handed out again instead of
    /// creating a second one.
    pub async fn create_deposit(&self, booking_id: &str, caller: &str) -> Result<DepositIntent, AppError> {
        let booking = self.lifecycle.find(booking_id).await?;
        if booking.user_id != caller {
            return Err(AppError::NotFound("Booking not found".into()));
        }
        if booking.payment_status == PaymentStatus::Paid {
            return Err(AppError::Conflict("Booking already paid".into()));
        }
        if booking.status != BookingStatus::PendingPayment {
            return Err(AppError::Conflict("Booking is not awaiting payment".into()));
        }

        let amount = self.deposit_amount.min(booking.price);
        if amount <= 0 {
            return Err(AppError::Conflict("Nothing to pay".into()));
        }

        if let Some(previous) = booking.payment_intent_id.as_deref() {
            let existing = self.gateway.retrieve_intent(previous).await?;
            if existing.status == "succeeded" {
                return Err(AppError::Conflict("Payment already received".into()));
            }
            if existing.is_reusable() && existing.amount == amount {
                return Ok(DepositIntent {
                    client_secret: existing.client_secret,
                    amount,
                    payment_intent_id: existing.id,
                });
            }
        }

        let key = format!(
            "deposit-{}-{}",
            booking.id,
            booking.payment_intent_id.as_deref().unwrap_or("first")
        );
        let intent = self
            .gateway
            .create_intent(amount, &self.currency, &booking.id, &key)
            .await?;
        self.store.set_payment_intent(&booking.id, &intent.id).await?;

        tracing::info!(booking_id = %booking.id, intent_id = %intent.id, amount, "Deposit intent issued");
        Ok(DepositIntent {
            client_secret: intent.client_secret,
            amount,
            payment_intent_id: intent.id,
        })
    }

    /// Verifies and applies one webhook delivery.
    ///
    /// Each event id is applied at most once. When applying fails the event
    /// is forgotten again so the processor's redelivery can retry it.
    pub async fn handle_webhook(
        &self,
        signature: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, AppError> {
        verify_webhook_signature(
            &self.webhook_secret,
            signature,
            body,
            now.timestamp(),
            self.tolerance_secs,
        )?;

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Malformed event: {}", e)))?;

        if event.event_type != EVENT_SUCCEEDED && event.event_type != EVENT_FAILED {
            tracing::debug!("Ignoring webhook event: {}", event.event_type);
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(booking_id) = event.data.object.metadata.get("booking_id").cloned() else {
            tracing::warn!(event_id = %event.id, "Webhook missing booking_id in metadata");
            return Ok(WebhookOutcome::Ignored);
        };

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            booking_id = %booking_id,
            intent_id = %event.data.object.id,
            amount = event.data.object.amount,
            "Payment webhook"
        );

        if !self
            .store
            .record_payment_event(&event.id, &event.event_type, Some(&booking_id), now)
            .await?
        {
            tracing::info!(event_id = %event.id, "Duplicate webhook delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.apply(&event, &booking_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(forget) = self.store.forget_payment_event(&event.id).await {
                    tracing::error!(event_id = %event.id, "Could not release webhook event: {}", forget);
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, event: &WebhookEvent, booking_id: &str) -> Result<WebhookOutcome, AppError> {
        if event.event_type == EVENT_FAILED {
            self.store.mark_payment_failed(booking_id).await?;
            tracing::info!(booking_id, "Payment failed, booking left as is");
            return Ok(WebhookOutcome::PaymentFailed);
        }

        let outcome = match self.lifecycle.confirm_payment(booking_id).await {
            Ok(outcome) => outcome,
            Err(AppError::NotFound(_)) => {
                tracing::warn!(booking_id, "Payment for unknown booking");
                return Ok(WebhookOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };

        match outcome {
            ConfirmOutcome::Confirmed => Ok(WebhookOutcome::Confirmed),
            ConfirmOutcome::AlreadyConfirmed => Ok(WebhookOutcome::AlreadyConfirmed),
            ConfirmOutcome::LateForCancelled(booking) if booking.payment_status == PaymentStatus::Paid => {
                tracing::info!(booking_id, "Payment already settled before cancel, nothing to refund");
                Ok(WebhookOutcome::AlreadySettled)
            }
            ConfirmOutcome::LateForCancelled(booking) => {
                let intent_id = &event.data.object.id;
                match self.gateway.refund(intent_id).await {
                    Ok(()) => {
                        if !self.store.record_late_payment(&booking.id, true).await? {
                            tracing::warn!(
                                target: "conflict",
                                booking_id,
                                intent_id = %intent_id,
                                "Late payment was recorded concurrently"
                            );
                        }
                        tracing::info!(booking_id, intent_id = %intent_id, "Late payment refunded");
                        Ok(WebhookOutcome::LateRefunded)
                    }
                    Err(e) => {
                        tracing::error!(
                            target: "reconciliation",
                            booking_id,
                            intent_id = %intent_id,
                            error = %e,
                            "Late payment on cancelled booking could not be refunded"
                        );
                        self.store.record_late_payment(&booking.id, false).await?;
                        Ok(WebhookOutcome::LateRefundFailed)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::signature_header;
    use crate::booking::CancelOptions;
    use crate::testing::{harness, new_booking, Harness};
    use std::sync::atomic::Ordering;

    fn reconciler(h: &Harness) -> PaymentReconciler {
        PaymentReconciler::new(h.store.clone(), h.gateway.clone(), h.lifecycle.clone(), &h.config)
    }

    fn event(id: &str, kind: &str, booking_id: Option<&str>) -> Vec<u8> {
        let metadata = match booking_id {
            Some(b) => serde_json::json!({ "booking_id": b }),
            None => serde_json::json!({}),
        };
        serde_json::to_vec(&serde_json::json!({
            "id": id,
            "type": kind,
            "data": { "object": { "id": "pi_test", "amount": 50000, "metadata": metadata } }
        }))
        .unwrap()
    }

    async fn deliver(p: &PaymentReconciler, body: &[u8]) -> Result<WebhookOutcome, AppError> {
        let now = Utc::now();
        let sig = signature_header("whsec_test", now.timestamp(), body);
        p.handle_webhook(&sig, body, now).await
    }

    async fn pending(h: &Harness, coupon: Option<i64>) -> Booking {
        h.lifecycle
            .create(new_booking(coupon, PaymentMethod::Qr), Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_deposit_is_capped_and_reissued() {
        let h = harness().await;
        let p = reconciler(&h);
        let booking = pending(&h, None).await;

        let first = p.create_deposit(&booking.id, "U-owner").await.unwrap();
        assert_eq!(first.amount, 500);
        let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_intent_id.as_deref(), Some(first.payment_intent_id.as_str()));

        let second = p.create_deposit(&booking.id, "U-owner").await.unwrap();
        assert_eq!(second.payment_intent_id, first.payment_intent_id);
        assert_eq!(second.client_secret, first.client_secret);
        assert_eq!(h.gateway.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deposit_never_above_price() {
        let h = harness().await;
        let campaign = h.store.seed_campaign(DiscountKind::Fixed, 900, None, None).await;
        let coupon = h.store.issue_coupon(&campaign, "U-owner", Utc::now()).await.unwrap().unwrap();
        let booking = pending(&h, Some(coupon.id)).await;
        assert_eq!(booking.price, 300);

        let deposit = reconciler(&h).create_deposit(&booking.id, "U-owner").await.unwrap();
        assert_eq!(deposit.amount, 300);
    }

    #[tokio::test]
    async fn test_deposit_rejected_once_paid() {
        let h = harness().await;
        let p = reconciler(&h);
        let booking = pending(&h, None).await;
        let intent = p.create_deposit(&booking.id, "U-owner").await.unwrap();
        h.gateway.set_status(&intent.payment_intent_id, "succeeded");

        let err = p.create_deposit(&booking.id, "U-owner").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        h.lifecycle.confirm_payment(&booking.id).await.unwrap();
        let err = p.create_deposit(&booking.id, "U-owner").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.gateway.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deposit_hidden_from_other_users() {
        let h = harness().await;
        let booking = pending(&h, None).await;
        let err = reconciler(&h).create_deposit(&booking.id, "U-other").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_without_effect() {
        let h = harness().await;
        let p = reconciler(&h);
        let booking = pending(&h, None).await;
        let body = event("evt_1", EVENT_SUCCEEDED, Some(&booking.id));

        let err = p
            .handle_webhook("t=1,v1=00", &body, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
        let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::PendingPayment);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_counts_once() {
        let h = harness().await;
        let p = reconciler(&h);
        let campaign = h.store.seed_campaign(DiscountKind::Fixed, 100, None, None).await;
        let coupon = h.store.issue_coupon(&campaign, "U-owner", Utc::now()).await.unwrap().unwrap();
        let booking = pending(&h, Some(coupon.id)).await;
        let body = event("evt_1", EVENT_SUCCEEDED, Some(&booking.id));

        assert_eq!(deliver(&p, &body).await.unwrap(), WebhookOutcome::Confirmed);
        assert_eq!(deliver(&p, &body).await.unwrap(), WebhookOutcome::Duplicate);

        // a distinct event for the same payment is still a no-op
        let other = event("evt_2", EVENT_SUCCEEDED, Some(&booking.id));
        assert_eq!(deliver(&p, &other).await.unwrap(), WebhookOutcome::AlreadyConfirmed);

        let campaign = h.store.find_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.redemption_count, 1);
        let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_failed_payment_keeps_status() {
        let h = harness().await;
        let p = reconciler(&h);
        let booking = pending(&h, None).await;
        let body = event("evt_f", EVENT_FAILED, Some(&booking.id));

        assert_eq!(deliver(&p, &body).await.unwrap(), WebhookOutcome::PaymentFailed);
        let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::PendingPayment);
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_late_payment_refunded() {
        let h = harness().await;
        let p = reconciler(&h);
        let booking = pending(&h, None).await;
        h.lifecycle.expire(&booking, Utc::now()).await.unwrap();

        let body = event("evt_late", EVENT_SUCCEEDED, Some(&booking.id));
        assert_eq!(deliver(&p, &body).await.unwrap(), WebhookOutcome::LateRefunded);
        assert_eq!(*h.gateway.refunds.lock().unwrap(), vec!["pi_test".to_string()]);

        let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert!(stored.is_refunded);
    }

    #[tokio::test]
    async fn test_late_payment_refund_failure_left_for_operator() {
        let h = harness().await;
        let p = reconciler(&h);
        let booking = pending(&h, None).await;
        h.lifecycle
            .cancel(&booking.id, CancelOptions::default(), Utc::now())
            .await
            .unwrap();
        h.gateway.fail_refund.store(true, Ordering::SeqCst);

        let body = event("evt_late", EVENT_SUCCEEDED, Some(&booking.id));
        assert_eq!(deliver(&p, &body).await.unwrap(), WebhookOutcome::LateRefundFailed);
        let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert!(!stored.is_refunded);
    }

    #[tokio::test]
    async fn test_paid_then_cancelled_not_refunded_on_redelivery() {
        let h = harness().await;
        let p = reconciler(&h);
        let booking = pending(&h, None).await;

        let paid = event("evt_1", EVENT_SUCCEEDED, Some(&booking.id));
        assert_eq!(deliver(&p, &paid).await.unwrap(), WebhookOutcome::Confirmed);
        h.lifecycle
            .cancel(&booking.id, CancelOptions::default(), Utc::now())
            .await
            .unwrap();

        let again = event("evt_2", EVENT_SUCCEEDED, Some(&booking.id));
        assert_eq!(deliver(&p, &again).await.unwrap(), WebhookOutcome::AlreadySettled);
        assert!(h.gateway.refunds.lock().unwrap().is_empty());

        let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert!(!stored.is_refunded);
    }

    #[tokio::test]
    async fn test_late_payment_recorded_once() {
        let h = harness().await;
        let booking = pending(&h, None).await;
        h.lifecycle.expire(&booking, Utc::now()).await.unwrap();

        assert!(h.store.record_late_payment(&booking.id, true).await.unwrap());
        assert!(!h.store.record_late_payment(&booking.id, false).await.unwrap());
        let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
        assert!(stored.is_refunded);
    }

    #[tokio::test]
    async fn test_irrelevant_events_acknowledged() {
        let h = harness().await;
        let p = reconciler(&h);
        let other_type = event("evt_x", "charge.refunded", Some("M-1"));
        assert_eq!(deliver(&p, &other_type).await.unwrap(), WebhookOutcome::Ignored);

        let no_booking = event("evt_y", EVENT_SUCCEEDED, None);
        assert_eq!(deliver(&p, &no_booking).await.unwrap(), WebhookOutcome::Ignored);

        let unknown = event("evt_z", EVENT_SUCCEEDED, Some("M-404"));
        assert_eq!(deliver(&p, &unknown).await.unwrap(), WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_malformed_event_rejected() {
        let h = harness().await;
        let err = deliver(&reconciler(&h), b"not json").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
