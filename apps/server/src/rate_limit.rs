use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

/// Route groups with separate per-IP budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Read-only lookups: fields, availability, quotes.
    Public,
    /// Booking creation and customer cancels.
    Booking,
    /// Deposit intents and coupon collection.
    Account,
    Staff,
}

impl Tier {
    fn budget(self) -> (usize, Duration) {
        match self {
            Tier::Public => (60, Duration::from_secs(60)),
            Tier::Booking => (5, Duration::from_secs(300)),
            Tier::Account => (30, Duration::from_secs(60)),
            Tier::Staff => (120, Duration::from_secs(60)),
        }
    }
}

/// Sliding-window counter per (tier, client IP).
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    hits: Arc<DashMap<(Tier, IpAddr), Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Err(retry_after_secs)` once the budget for the window is spent.
    pub fn check(&self, tier: Tier, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let (max, window) = tier.budget();
        let mut hits = self.hits.entry((tier, ip)).or_default();
        hits.retain(|t| now.duration_since(*t) < window);

        if hits.len() >= max {
            let retry_after = (hits[0] + window).saturating_duration_since(now).as_secs().max(1);
            return Err(retry_after);
        }
        hits.push(now);
        Ok(())
    }

    /// Drops clients idle for a whole window. Run from a background task.
    pub fn cleanup(&self, now: Instant) {
        self.hits.retain(|(tier, _), hits| {
            let (_, window) = tier.budget();
            hits.retain(|t| now.duration_since(*t) < window);
            !hits.is_empty()
        });
    }
}

/// First `X-Forwarded-For` hop (reverse proxy), else the socket peer.
pub fn client_ip(req: &Request) -> IpAddr {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Middleware; mount with `from_fn_with_state((limiter, tier), rate_limit)`.
pub async fn rate_limit(
    State((limiter, tier)): State<(RateLimiter, Tier)>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    if let Err(retry_after) = limiter.check(tier, ip, Instant::now()) {
        tracing::warn!(?tier, %ip, "Rate limited");
        let body = ApiResponse::<()>::error(format!(
            "Too many requests. Try again in {} seconds",
            retry_after
        ));
        return (
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", retry_after.to_string())],
            Json(body),
        )
            .into_response();
    }
    next.run(req).await
}
