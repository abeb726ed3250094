use std::sync::Arc;
use std::time::Duration;

use crate::upstream::SchedulingApi;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait before `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }
}

/// Pushes the locally computed price onto the external match, which may
/// have been created at the scheduling system's own default price.
#[derive(Clone)]
pub struct PriceSync {
    scheduler: Arc<dyn SchedulingApi>,
    policy: RetryPolicy,
}

impl PriceSync {
    pub fn new(scheduler: Arc<dyn SchedulingApi>, policy: RetryPolicy) -> Self {
        Self { scheduler, policy }
    }

    pub fn spawn(&self, match_id: String, price: i64) -> tokio::task::JoinHandle<bool> {
        let this = self.clone();
        tokio::spawn(async move { this.push(&match_id, price).await })
    }

    /// Returns whether the external system accepted the price.
    pub async fn push(&self, match_id: &str, price: i64) -> bool {
        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.delay_for(attempt)).await;
            match self.scheduler.update_price(match_id, price).await {
                Ok(()) => {
                    tracing::debug!(match_id, price, attempt, "External price corrected");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(match_id, attempt, "Price correction failed: {}", e);
                }
            }
        }

        tracing::error!(
            target: "reconciliation",
            match_id,
            price,
            attempts = self.policy.max_attempts,
            "External price left uncorrected, manual fix needed"
        );
        false
    }
}
