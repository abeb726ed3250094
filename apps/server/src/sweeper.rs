use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::booking::BookingLifecycle;
use crate::error::AppError;
use crate::models::SweepReport;
use crate::store::Store;

/// Cancels `pending_payment` bookings whose payment window has elapsed.
///
/// Runs may overlap (the periodic loop and the staff trigger); the
/// conditional cancel makes every booking expire at most once.
pub struct TimeoutSweeper {
    store: Arc<dyn Store>,
    lifecycle: Arc<BookingLifecycle>,
}

impl TimeoutSweeper {
    pub fn new(store: Arc<dyn Store>, lifecycle: Arc<BookingLifecycle>) -> Self {
        Self { store, lifecycle }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let expired = self.store.list_expired_pending(now).await?;
        let mut report = SweepReport {
            total: expired.len(),
            ..Default::default()
        };

        for booking in &expired {
            match self.lifecycle.expire(booking, now).await {
                Ok(true) => report.cancelled += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(booking_id = %booking.id, "Timeout cancel failed: {}", e);
                }
            }
        }

        if report.total > 0 {
            tracing::info!(
                total = report.total,
                cancelled = report.cancelled,
                failed = report.failed,
                skipped = report.skipped,
                "Timeout sweep finished"
            );
        }
        Ok(report)
    }

    /// Periodic loop; spawned once at startup.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep(Utc::now()).await {
                tracing::error!("Timeout sweep failed: {}", e);
            }
        }
    }
}
