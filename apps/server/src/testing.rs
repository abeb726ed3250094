//! In-process fakes for the upstream ports, plus shared fixtures.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::booking::BookingLifecycle;
use crate::catalog::FieldCatalog;
use crate::config::Config;
use crate::error::AppError;
use crate::models::*;
use crate::price_sync::{PriceSync, RetryPolicy};
use crate::store::SqliteStore;
use crate::upstream::{BusyInterval, MatchRequest, Notifier, PaymentGateway, PaymentIntent, SchedulingApi};

#[derive(Default)]
pub struct FakeScheduler {
    pub busy: Mutex<HashMap<String, Vec<BusyInterval>>>,
    pub busy_calls: AtomicUsize,
    pub fail_busy: AtomicBool,
    pub fail_create: AtomicBool,
    /// Number of upcoming `update_price` calls that fail.
    pub failing_price_updates: AtomicU32,
    pub created: Mutex<Vec<MatchRequest>>,
    pub price_updates: Mutex<Vec<(String, i64)>>,
    pub cancelled: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl FakeScheduler {
    pub fn set_busy(&self, court: &str, intervals: Vec<BusyInterval>) {
        self.busy.lock().unwrap().insert(court.to_string(), intervals);
    }
}

#[async_trait]
impl SchedulingApi for FakeScheduler {
    async fn busy_intervals(&self, court_id: &str, _date: NaiveDate) -> Result<Vec<BusyInterval>, AppError> {
        self.busy_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_busy.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("scheduler down".into()));
        }
        Ok(self.busy.lock().unwrap().get(court_id).cloned().unwrap_or_default())
    }

    async fn create_match(&self, req: &MatchRequest) -> Result<String, AppError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("scheduler down".into()));
        }
        self.created.lock().unwrap().push(req.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("M-{}", n))
    }

    async fn update_price(&self, match_id: &str, price: i64) -> Result<(), AppError> {
        let failing = self.failing_price_updates.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_price_updates.store(failing - 1, Ordering::SeqCst);
            return Err(AppError::Upstream("scheduler busy".into()));
        }
        self.price_updates.lock().unwrap().push((match_id.to_string(), price));
        Ok(())
    }

    async fn cancel_match(&self, match_id: &str) -> Result<(), AppError> {
        self.cancelled.lock().unwrap().push(match_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub intents: Mutex<HashMap<String, PaymentIntent>>,
    pub created: AtomicUsize,
    pub refunds: Mutex<Vec<String>>,
    pub fail_refund: AtomicBool,
}

impl FakeGateway {
    pub fn set_status(&self, intent_id: &str, status: &str) {
        if let Some(intent) = self.intents.lock().unwrap().get_mut(intent_id) {
            intent.status = status.to_string();
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(
        &self,
        amount: i64,
        _currency: &str,
        _booking_id: &str,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, AppError> {
        let mut intents = self.intents.lock().unwrap();
        let id = format!("pi_{}", idempotency_key);
        if let Some(existing) = intents.get(&id) {
            return Ok(existing.clone());
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: format!("{}_secret", id),
            amount,
            status: "requires_payment_method".into(),
        };
        intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, AppError> {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| AppError::Upstream(format!("no such intent {}", intent_id)))
    }

    async fn refund(&self, intent_id: &str) -> Result<(), AppError> {
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("refund rejected".into()));
        }
        self.refunds.lock().unwrap().push(intent_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn push(&self, user_id: &str, text: &str) -> Result<(), AppError> {
        self.sent.lock().unwrap().push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

pub fn field(id: i64, pre: i64, post: i64) -> Field {
    Field {
        id,
        label: format!("Field {}", id),
        size_tag: "7-a-side".into(),
        price_pre: pre,
        price_post: post,
        external_id: format!("court-{:02}", id),
    }
}

/// Same rates as the seeded catalog.
pub fn catalog() -> Arc<FieldCatalog> {
    Arc::new(FieldCatalog::new(vec![
        field(1, 500, 700),
        field(2, 500, 700),
        field(3, 800, 1000),
    ]))
}

pub fn sample_booking(id: &str, status: BookingStatus) -> Booking {
    let now = Utc::now();
    Booking {
        id: id.to_string(),
        field_id: 1,
        user_id: "U-owner".into(),
        customer_name: "Somchai".into(),
        phone_number: "0812345678".into(),
        date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
        start_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        duration_minutes: 120,
        original_price: 1200,
        discount: 0,
        price: 1200,
        status,
        payment_method: PaymentMethod::Qr,
        payment_status: PaymentStatus::Unpaid,
        payment_intent_id: None,
        timeout_at: Some(now + chrono::Duration::minutes(10)),
        admin_note: None,
        is_refunded: false,
        source: "web".into(),
        created_at: now,
        cancelled_at: None,
    }
}

/// Qr booking on field 1, 17:00-19:00 on a future date (1200 before discount).
pub fn new_booking(coupon_id: Option<i64>, payment_method: PaymentMethod) -> NewBooking {
    NewBooking {
        selection: Selection {
            field_id: 1,
            date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            start_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        },
        user_id: "U-owner".into(),
        customer_name: "Somchai".into(),
        phone_number: "0812345678".into(),
        coupon_id,
        payment_method,
        source: "web".into(),
    }
}

/// Real store on an in-memory database, fakes for every upstream.
pub struct Harness {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub scheduler: Arc<FakeScheduler>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<FakeNotifier>,
    pub lifecycle: Arc<BookingLifecycle>,
}

pub async fn harness() -> Harness {
    let config = Config::for_tests();
    let store = Arc::new(SqliteStore::in_memory().await);
    let scheduler = Arc::new(FakeScheduler::default());
    let price_sync = PriceSync::new(
        scheduler.clone(),
        RetryPolicy {
            max_attempts: config.price_sync_max_attempts,
            base_delay: config.price_sync_base_delay,
        },
    );
    let notifier = Arc::new(FakeNotifier::default());
    let lifecycle = Arc::new(BookingLifecycle::new(
        store.clone(),
        catalog(),
        scheduler.clone(),
        notifier.clone(),
        price_sync,
        config.payment_window,
        config.venue_offset,
    ));
    Harness {
        config,
        store,
        scheduler,
        gateway: Arc::new(FakeGateway::default()),
        notifier,
        lifecycle,
    }
}
