use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::error::AppError;
use crate::models::*;

/// What happens to coupons escrowed against a booking when it is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponDisposition {
    /// Coupon goes back to ACTIVE with its escrow cleared.
    Release,
    /// Coupon stays USED; the user has spent it.
    Burn,
}

#[derive(Debug, Clone)]
pub struct CancelPlan {
    pub note: Option<String>,
    pub is_refunded: bool,
    pub disposition: CouponDisposition,
    /// Give back one campaign quota slot per escrowed coupon.
    pub restore_quota: bool,
}

/// Storage port for the booking core.
///
/// Every method that resolves a race is a conditional write: it reports
/// `false` (or `None`) when the row was not in the expected state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_fields(&self) -> Result<Vec<Field>, AppError>;

    async fn find_booking(&self, id: &str) -> Result<Option<Booking>, AppError>;
    /// Inserts the row, rebinds an escrow held under `claim_key` to the
    /// booking id, and counts the redemption if the booking starts confirmed.
    async fn insert_booking(&self, booking: &Booking, claim_key: Option<&str>) -> Result<(), AppError>;
    async fn cancel_booking(
        &self,
        id: &str,
        expected: BookingStatus,
        plan: &CancelPlan,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    /// `pending_payment` → `confirmed`/`paid`, counting every escrowed coupon.
    async fn confirm_payment(&self, id: &str) -> Result<bool, AppError>;
    /// Balance of a confirmed cash booking settled at the venue.
    async fn settle_cash(&self, id: &str) -> Result<bool, AppError>;
    async fn mark_payment_failed(&self, id: &str) -> Result<bool, AppError>;
    /// `false` when the payment was already recorded on the row.
    async fn record_late_payment(&self, id: &str, refunded: bool) -> Result<bool, AppError>;
    async fn set_payment_intent(&self, id: &str, intent_id: &str) -> Result<(), AppError>;
    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, AppError>;

    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, AppError>;
    async fn find_coupon(&self, id: i64) -> Result<Option<OwnedCoupon>, AppError>;
    async fn list_active_coupons(&self, user_id: &str) -> Result<Vec<OwnedCoupon>, AppError>;
    /// ACTIVE → USED under `claim_key`. `false` means someone else got it first.
    async fn claim_coupon(&self, coupon_id: i64, claim_key: &str, now: DateTime<Utc>) -> Result<bool, AppError>;
    async fn release_claim(&self, coupon_id: i64, claim_key: &str) -> Result<(), AppError>;
    /// `None` when the user already holds `limit_per_user` coupons of the campaign.
    async fn issue_coupon(
        &self,
        campaign: &Campaign,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserCoupon>, AppError>;

    /// `false` when the event id was already recorded.
    async fn record_payment_event(
        &self,
        event_id: &str,
        event_type: &str,
        booking_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    async fn forget_payment_event(&self, event_id: &str) -> Result<(), AppError>;
}

const BOOKING_COLUMNS: &str = "SELECT id, field_id, user_id, customer_name, phone_number, date,
            start_time, end_time, duration_minutes, original_price, discount, price,
            status, payment_method, payment_status, payment_intent_id, timeout_at,
            admin_note, is_refunded, source, created_at, cancelled_at
     FROM bookings";

const COUPON_COLUMNS: &str =
    "SELECT id, campaign_id, user_id, status, booking_id, used_at, created_at FROM user_coupons";

const CAMPAIGN_COLUMNS: &str = "SELECT id, name, discount_kind, discount_value, min_spend,
            eligible_fields, eligible_payment_methods, redemption_count, limit_per_user
     FROM campaigns";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Coupons currently escrowed under `booking_id` (a booking or claim key).
    #[cfg(test)]
    pub async fn escrowed_coupons(&self, booking_id: &str) -> Vec<UserCoupon> {
        sqlx::query_as::<_, UserCoupon>(&format!("{} WHERE booking_id = ? ORDER BY id ASC", COUPON_COLUMNS))
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }

    /// Fresh migrated in-memory database on a single connection.
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let pool = crate::db::connect("sqlite::memory:", 1).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        Self::new(pool)
    }

    #[cfg(test)]
    pub async fn seed_campaign(
        &self,
        kind: DiscountKind,
        value: i64,
        min_spend: Option<i64>,
        eligible_fields: Option<Vec<i64>>,
    ) -> Campaign {
        let id = sqlx::query(
            "INSERT INTO campaigns (name, discount_kind, discount_value, min_spend, eligible_fields, limit_per_user)
             VALUES ('test campaign', ?, ?, ?, ?, 2)",
        )
        .bind(kind)
        .bind(value)
        .bind(min_spend)
        .bind(eligible_fields.map(sqlx::types::Json))
        .execute(&self.pool)
        .await
        .unwrap()
        .last_insert_rowid();
        self.find_campaign(id).await.unwrap().unwrap()
    }

    async fn campaigns_by_id(&self, ids: &[i64]) -> Result<HashMap<i64, Campaign>, AppError> {
        let mut out = HashMap::new();
        for id in ids {
            if out.contains_key(id) {
                continue;
            }
            if let Some(c) = self.find_campaign(*id).await? {
                out.insert(*id, c);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_fields(&self) -> Result<Vec<Field>, AppError> {
        let fields = sqlx::query_as::<_, Field>(
            "SELECT id, label, size_tag, price_pre, price_post, external_id FROM fields ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(fields)
    }

    async fn find_booking(&self, id: &str) -> Result<Option<Booking>, AppError> {
        let booking = sqlx::query_as::<_, Booking>(&format!("{} WHERE id = ?", BOOKING_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    async fn insert_booking(&self, booking: &Booking, claim_key: Option<&str>) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO bookings (id, field_id, user_id, customer_name, phone_number, date,
             start_time, end_time, duration_minutes, original_price, discount, price,
             status, payment_method, payment_status, payment_intent_id, timeout_at,
             admin_note, is_refunded, source, created_at, cancelled_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&booking.id)
        .bind(booking.field_id)
        .bind(&booking.user_id)
        .bind(&booking.customer_name)
        .bind(&booking.phone_number)
        .bind(booking.date)
        .bind(booking.start_time)
        .bind(booking.end_time)
        .bind(booking.duration_minutes)
        .bind(booking.original_price)
        .bind(booking.discount)
        .bind(booking.price)
        .bind(booking.status)
        .bind(booking.payment_method)
        .bind(booking.payment_status)
        .bind(&booking.payment_intent_id)
        .bind(booking.timeout_at)
        .bind(&booking.admin_note)
        .bind(booking.is_refunded)
        .bind(&booking.source)
        .bind(booking.created_at)
        .bind(booking.cancelled_at)
        .execute(&mut *tx)
        .await?;

        if let Some(key) = claim_key {
            let rebound = sqlx::query(
                "UPDATE user_coupons SET booking_id = ? WHERE booking_id = ? AND status = 'USED'",
            )
            .bind(&booking.id)
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if rebound == 0 {
                tx.rollback().await?;
                return Err(AppError::Conflict("Coupon is no longer reserved".into()));
            }
        }

        if booking.status == BookingStatus::Confirmed {
            let campaign_ids: Vec<i64> = sqlx::query_scalar(
                "SELECT campaign_id FROM user_coupons WHERE booking_id = ? AND status = 'USED'",
            )
            .bind(&booking.id)
            .fetch_all(&mut *tx)
            .await?;
            for campaign_id in campaign_ids {
                sqlx::query("UPDATE campaigns SET redemption_count = redemption_count + 1 WHERE id = ?")
                    .bind(campaign_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn cancel_booking(
        &self,
        id: &str,
        expected: BookingStatus,
        plan: &CancelPlan,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let changed = sqlx::query(
            "UPDATE bookings SET status = 'cancelled', admin_note = COALESCE(?, admin_note),
             is_refunded = ?, cancelled_at = ?, timeout_at = NULL
             WHERE id = ? AND status = ?",
        )
        .bind(&plan.note)
        .bind(plan.is_refunded)
        .bind(now)
        .bind(id)
        .bind(expected)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if changed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if plan.restore_quota {
            let campaign_ids: Vec<i64> = sqlx::query_scalar(
                "SELECT campaign_id FROM user_coupons WHERE booking_id = ? AND status = 'USED'",
            )
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
            for campaign_id in campaign_ids {
                sqlx::query(
                    "UPDATE campaigns SET redemption_count = redemption_count - 1
                     WHERE id = ? AND redemption_count > 0",
                )
                .bind(campaign_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        if plan.disposition == CouponDisposition::Release {
            sqlx::query(
                "UPDATE user_coupons SET status = 'ACTIVE', booking_id = NULL, used_at = NULL
                 WHERE booking_id = ? AND status = 'USED'",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn confirm_payment(&self, id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let changed = sqlx::query(
            "UPDATE bookings SET status = 'confirmed', payment_status = 'paid', timeout_at = NULL
             WHERE id = ? AND status = 'pending_payment'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if changed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let campaign_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT campaign_id FROM user_coupons WHERE booking_id = ? AND status = 'USED'",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        for campaign_id in campaign_ids {
            sqlx::query("UPDATE campaigns SET redemption_count = redemption_count + 1 WHERE id = ?")
                .bind(campaign_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn settle_cash(&self, id: &str) -> Result<bool, AppError> {
        let changed = sqlx::query(
            "UPDATE bookings SET payment_status = 'paid'
             WHERE id = ? AND status = 'confirmed' AND payment_status != 'paid'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }

    async fn mark_payment_failed(&self, id: &str) -> Result<bool, AppError> {
        let changed = sqlx::query(
            "UPDATE bookings SET payment_status = 'failed' WHERE id = ? AND payment_status != 'paid'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }

    async fn record_late_payment(&self, id: &str, refunded: bool) -> Result<bool, AppError> {
        let changed = sqlx::query(
            "UPDATE bookings SET payment_status = 'paid', is_refunded = ?
             WHERE id = ? AND status = 'cancelled' AND payment_status != 'paid'",
        )
        .bind(refunded)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed > 0)
    }

    async fn set_payment_intent(&self, id: &str, intent_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE bookings SET payment_intent_id = ? WHERE id = ? AND payment_status != 'paid'")
            .bind(intent_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, AppError> {
        let bookings = sqlx::query_as::<_, Booking>(&format!(
            "{} WHERE status = 'pending_payment' AND timeout_at IS NOT NULL AND timeout_at < ?
             ORDER BY timeout_at ASC",
            BOOKING_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(bookings)
    }

    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, AppError> {
        let campaign = sqlx::query_as::<_, Campaign>(&format!("{} WHERE id = ?", CAMPAIGN_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(campaign)
    }

    async fn find_coupon(&self, id: i64) -> Result<Option<OwnedCoupon>, AppError> {
        let coupon = sqlx::query_as::<_, UserCoupon>(&format!("{} WHERE id = ?", COUPON_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(coupon) = coupon else {
            return Ok(None);
        };
        let campaign = self
            .find_campaign(coupon.campaign_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", coupon.campaign_id)))?;
        Ok(Some(OwnedCoupon { coupon, campaign }))
    }

    async fn list_active_coupons(&self, user_id: &str) -> Result<Vec<OwnedCoupon>, AppError> {
        let coupons = sqlx::query_as::<_, UserCoupon>(&format!(
            "{} WHERE user_id = ? AND status = 'ACTIVE' ORDER BY id ASC",
            COUPON_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = coupons.iter().map(|c| c.campaign_id).collect();
        let campaigns = self.campaigns_by_id(&ids).await?;

        Ok(coupons
            .into_iter()
            .filter_map(|coupon| {
                let campaign = campaigns.get(&coupon.campaign_id)?.clone();
                Some(OwnedCoupon { coupon, campaign })
            })
            .collect())
    }

    async fn claim_coupon(&self, coupon_id: i64, claim_key: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let changed = sqlx::query(
            "UPDATE user_coupons SET status = 'USED', booking_id = ?, used_at = ?
             WHERE id = ? AND status = 'ACTIVE'",
        )
        .bind(claim_key)
        .bind(now)
        .bind(coupon_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed == 1)
    }

    async fn release_claim(&self, coupon_id: i64, claim_key: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE user_coupons SET status = 'ACTIVE', booking_id = NULL, used_at = NULL
             WHERE id = ? AND booking_id = ? AND status = 'USED'",
        )
        .bind(coupon_id)
        .bind(claim_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn issue_coupon(
        &self,
        campaign: &Campaign,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserCoupon>, AppError> {
        let result = sqlx::query(
            "INSERT INTO user_coupons (campaign_id, user_id, status, created_at)
             SELECT ?, ?, 'ACTIVE', ?
             WHERE (SELECT COUNT(*) FROM user_coupons WHERE campaign_id = ? AND user_id = ?) < ?",
        )
        .bind(campaign.id)
        .bind(user_id)
        .bind(now)
        .bind(campaign.id)
        .bind(user_id)
        .bind(campaign.limit_per_user)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let coupon = sqlx::query_as::<_, UserCoupon>(&format!("{} WHERE id = ?", COUPON_COLUMNS))
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(coupon))
    }

    async fn record_payment_event(
        &self,
        event_id: &str,
        event_type: &str,
        booking_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO payment_events (event_id, event_type, booking_id, received_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(event_id)
        .bind(event_type)
        .bind(booking_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn forget_payment_event(&self, event_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM payment_events WHERE event_id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_booking;

    #[tokio::test]
    async fn test_booking_roundtrip_keeps_types() {
        let store = SqliteStore::in_memory().await;
        let booking = sample_booking("M-1", BookingStatus::PendingPayment);
        store.insert_booking(&booking, None).await.unwrap();

        let loaded = store.find_booking("M-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, BookingStatus::PendingPayment);
        assert_eq!(loaded.payment_method, PaymentMethod::Qr);
        assert_eq!(loaded.start_time, booking.start_time);
        assert_eq!(loaded.date, booking.date);
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let store = SqliteStore::in_memory().await;
        let campaign = store.seed_campaign(DiscountKind::Fixed, 100, None, None).await;
        let coupon = store.issue_coupon(&campaign, "U1", Utc::now()).await.unwrap().unwrap();

        assert!(store.claim_coupon(coupon.id, "claim-a", Utc::now()).await.unwrap());
        assert!(!store.claim_coupon(coupon.id, "claim-b", Utc::now()).await.unwrap());

        let escrow = store.escrowed_coupons("claim-a").await;
        assert_eq!(escrow.len(), 1);
        assert_eq!(escrow[0].status, CouponStatus::Used);
    }

    #[tokio::test]
    async fn test_release_claim_requires_matching_key() {
        let store = SqliteStore::in_memory().await;
        let campaign = store.seed_campaign(DiscountKind::Fixed, 100, None, None).await;
        let coupon = store.issue_coupon(&campaign, "U1", Utc::now()).await.unwrap().unwrap();
        store.claim_coupon(coupon.id, "claim-a", Utc::now()).await.unwrap();

        store.release_claim(coupon.id, "claim-other").await.unwrap();
        let still = store.find_coupon(coupon.id).await.unwrap().unwrap();
        assert_eq!(still.coupon.status, CouponStatus::Used);

        store.release_claim(coupon.id, "claim-a").await.unwrap();
        let back = store.find_coupon(coupon.id).await.unwrap().unwrap();
        assert_eq!(back.coupon.status, CouponStatus::Active);
        assert!(back.coupon.booking_id.is_none());
        assert!(back.coupon.used_at.is_none());
    }

    #[tokio::test]
    async fn test_issue_respects_limit_per_user() {
        let store = SqliteStore::in_memory().await;
        let campaign = store.seed_campaign(DiscountKind::Percent, 10, None, None).await;
        assert_eq!(campaign.limit_per_user, 2);

        assert!(store.issue_coupon(&campaign, "U1", Utc::now()).await.unwrap().is_some());
        assert!(store.issue_coupon(&campaign, "U1", Utc::now()).await.unwrap().is_some());
        assert!(store.issue_coupon(&campaign, "U1", Utc::now()).await.unwrap().is_none());
        assert!(store.issue_coupon(&campaign, "U2", Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_insert_rebinds_escrow_and_counts_confirmed() {
        let store = SqliteStore::in_memory().await;
        let campaign = store.seed_campaign(DiscountKind::Fixed, 100, None, None).await;
        let coupon = store.issue_coupon(&campaign, "U1", Utc::now()).await.unwrap().unwrap();
        store.claim_coupon(coupon.id, "claim-a", Utc::now()).await.unwrap();

        let mut booking = sample_booking("M-9", BookingStatus::Confirmed);
        booking.payment_method = PaymentMethod::Cash;
        booking.timeout_at = None;
        store.insert_booking(&booking, Some("claim-a")).await.unwrap();

        let escrow = store.escrowed_coupons("M-9").await;
        assert_eq!(escrow.len(), 1);
        let campaign = store.find_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.redemption_count, 1);
    }

    #[tokio::test]
    async fn test_insert_fails_when_claim_vanished() {
        let store = SqliteStore::in_memory().await;
        let booking = sample_booking("M-2", BookingStatus::PendingPayment);
        let err = store.insert_booking(&booking, Some("claim-missing")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(store.find_booking("M-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_conditional_on_expected_status() {
        let store = SqliteStore::in_memory().await;
        store
            .insert_booking(&sample_booking("M-3", BookingStatus::Confirmed), None)
            .await
            .unwrap();
        let plan = CancelPlan {
            note: Some("rain".into()),
            is_refunded: false,
            disposition: CouponDisposition::Release,
            restore_quota: false,
        };

        let wrong = store
            .cancel_booking("M-3", BookingStatus::PendingPayment, &plan, Utc::now())
            .await
            .unwrap();
        assert!(!wrong);

        let ok = store
            .cancel_booking("M-3", BookingStatus::Confirmed, &plan, Utc::now())
            .await
            .unwrap();
        assert!(ok);
        let b = store.find_booking("M-3").await.unwrap().unwrap();
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.admin_note.as_deref(), Some("rain"));
        assert!(b.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn test_counter_never_negative() {
        let store = SqliteStore::in_memory().await;
        let campaign = store.seed_campaign(DiscountKind::Fixed, 100, None, None).await;
        let coupon = store.issue_coupon(&campaign, "U1", Utc::now()).await.unwrap().unwrap();
        store.claim_coupon(coupon.id, "M-4", Utc::now()).await.unwrap();
        store
            .insert_booking(&sample_booking("M-4", BookingStatus::PendingPayment), None)
            .await
            .unwrap();

        // counter is 0; a restore must not push it below zero
        let plan = CancelPlan {
            note: None,
            is_refunded: false,
            disposition: CouponDisposition::Burn,
            restore_quota: true,
        };
        store
            .cancel_booking("M-4", BookingStatus::PendingPayment, &plan, Utc::now())
            .await
            .unwrap();
        let campaign = store.find_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.redemption_count, 0);
    }

    #[tokio::test]
    async fn test_expired_pending_selection() {
        let store = SqliteStore::in_memory().await;
        let now = Utc::now();

        let mut overdue = sample_booking("M-old", BookingStatus::PendingPayment);
        overdue.timeout_at = Some(now - chrono::Duration::minutes(1));
        store.insert_booking(&overdue, None).await.unwrap();

        let fresh = sample_booking("M-new", BookingStatus::PendingPayment);
        store.insert_booking(&fresh, None).await.unwrap();

        let mut confirmed = sample_booking("M-conf", BookingStatus::Confirmed);
        confirmed.timeout_at = Some(now - chrono::Duration::minutes(30));
        store.insert_booking(&confirmed, None).await.unwrap();

        let expired = store.list_expired_pending(now).await.unwrap();
        let ids: Vec<&str> = expired.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["M-old"]);
    }

    #[tokio::test]
    async fn test_payment_event_recorded_once() {
        let store = SqliteStore::in_memory().await;
        assert!(store
            .record_payment_event("evt_1", "payment_intent.succeeded", Some("M-1"), Utc::now())
            .await
            .unwrap());
        assert!(!store
            .record_payment_event("evt_1", "payment_intent.succeeded", Some("M-1"), Utc::now())
            .await
            .unwrap());
        store.forget_payment_event("evt_1").await.unwrap();
        assert!(store
            .record_payment_event("evt_1", "payment_intent.succeeded", Some("M-1"), Utc::now())
            .await
            .unwrap());
    }
}
