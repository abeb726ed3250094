//! Forwards ERROR-level events (reconciliation failures included) to the
//! operator LINE chat.
//!
//! At most one alert per `MIN_INTERVAL`, identical alerts muted for
//! `DEDUP_WINDOW`, and the HTTP push runs on a spawned task.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::upstream::line::{push_body, LINE_PUSH_URL};

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Rate limit plus duplicate suppression, keyed by a hash of the alert text.
struct Throttle {
    last_sent: Option<Instant>,
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            last_sent: None,
            recent: Vec::new(),
        }
    }

    fn admit(&mut self, key: u64, now: Instant) -> bool {
        self.recent.retain(|(_, at)| now.duration_since(*at) < DEDUP_WINDOW);

        if self.recent.iter().any(|(k, _)| *k == key) {
            return false;
        }
        if self.last_sent.is_some_and(|last| now.duration_since(last) < MIN_INTERVAL) {
            return false;
        }
        self.last_sent = Some(now);
        self.recent.push((key, now));
        true
    }
}

pub struct OpsAlertLayer {
    channel_token: String,
    target: String,
    http: reqwest::Client,
    throttle: Mutex<Throttle>,
}

impl OpsAlertLayer {
    pub fn new(channel_token: String, target: String) -> Self {
        Self {
            channel_token,
            target,
            http: reqwest::Client::new(),
            throttle: Mutex::new(Throttle::new()),
        }
    }
}

impl<S: Subscriber> Layer<S> for OpsAlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() != Level::ERROR {
            return;
        }

        let mut fields = AlertFields::default();
        event.record(&mut fields);
        let summary = fields.summary();

        let key = {
            let mut h = DefaultHasher::new();
            meta.target().hash(&mut h);
            summary.hash(&mut h);
            h.finish()
        };
        let admitted = match self.throttle.lock() {
            Ok(mut throttle) => throttle.admit(key, Instant::now()),
            Err(_) => false,
        };
        if !admitted {
            return;
        }

        // no runtime means we are shutting down or in a sync test; drop it
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let text = format!(
            "[{}] {}\n{}:{}\n{}",
            meta.target(),
            summary,
            meta.file().unwrap_or("?"),
            meta.line().unwrap_or(0),
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        );
        let body = push_body(&self.target, &text);
        let client = self.http.clone();
        let token = self.channel_token.clone();

        runtime.spawn(async move {
            let _ = client
                .post(LINE_PUSH_URL)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await;
        });
    }
}

/// Message plus structured fields, rendered `message (k=v, k=v)`.
#[derive(Default)]
struct AlertFields {
    message: String,
    extra: Vec<(&'static str, String)>,
}

impl AlertFields {
    fn summary(&self) -> String {
        let mut out = self.message.clone();
        if self.extra.is_empty() {
            return out;
        }
        let joined = self
            .extra
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        if out.is_empty() {
            return joined;
        }
        let _ = write!(out, " ({})", joined);
        out
    }

    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.extra.push((field.name(), value));
        }
    }
}

impl Visit for AlertFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.to_string());
    }
}
