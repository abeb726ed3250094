use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use url::Url;

use super::{BusyInterval, MatchRequest, SchedulingApi};
use crate::error::AppError;

/// JSON client for the scheduling system of record.
pub struct HttpScheduler {
    client: reqwest::Client,
    base: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct MatchesEnvelope {
    matches: Vec<ExternalMatch>,
}

#[derive(Debug, Deserialize)]
struct ExternalMatch {
    #[serde(flatten)]
    interval: BusyInterval,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedMatch {
    id: String,
}

impl HttpScheduler {
    pub fn new(base_url: &str, token: impl Into<String>) -> anyhow::Result<Self> {
        // join() drops the last path segment unless the base ends with '/'
        let base = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base
            .join(path)
            .map_err(|e| AppError::Upstream(format!("bad scheduler url {}: {}", path, e)))
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, AppError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let err = status_error(status, what);
        match err {
            // taken slot, no operator alert
            AppError::Conflict(_) => tracing::warn!("Scheduler {} refused: {} - {}", what, status, text),
            _ => tracing::error!("Scheduler {} failed: {} - {}", what, status, text),
        }
        Err(err)
    }
}

fn status_error(status: reqwest::StatusCode, what: &str) -> AppError {
    if status == reqwest::StatusCode::CONFLICT {
        return AppError::Conflict("This time slot is no longer available".into());
    }
    AppError::Upstream(format!("scheduler {} returned {}", what, status))
}

#[async_trait]
impl SchedulingApi for HttpScheduler {
    async fn busy_intervals(&self, court_id: &str, date: NaiveDate) -> Result<Vec<BusyInterval>, AppError> {
        let mut url = self.endpoint(&format!("courts/{}/matches", court_id))?;
        url.query_pairs_mut()
            .append_pair("date", &date.format("%Y-%m-%d").to_string());

        let resp = self.client.get(url).bearer_auth(&self.token).send().await?;
        let envelope: MatchesEnvelope = Self::check(resp, "busy lookup").await?.json().await?;

        Ok(envelope
            .matches
            .into_iter()
            .filter(|m| m.status.as_deref() != Some("cancelled"))
            .map(|m| m.interval)
            .collect())
    }

    async fn create_match(&self, req: &MatchRequest) -> Result<String, AppError> {
        let url = self.endpoint("matches")?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(req)
            .send()
            .await?;
        let created: CreatedMatch = Self::check(resp, "create match").await?.json().await?;
        tracing::info!("Scheduler match created: {} on {}", created.id, req.court_id);
        Ok(created.id)
    }

    async fn update_price(&self, match_id: &str, price: i64) -> Result<(), AppError> {
        let url = self.endpoint(&format!("matches/{}", match_id))?;
        let resp = self
            .client
            .patch(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "price": price }))
            .send()
            .await?;
        Self::check(resp, "update price").await?;
        Ok(())
    }

    async fn cancel_match(&self, match_id: &str) -> Result<(), AppError> {
        let url = self.endpoint(&format!("matches/{}/cancel", match_id))?;
        let resp = self.client.post(url).bearer_auth(&self.token).send().await?;
        Self::check(resp, "cancel match").await?;
        Ok(())
    }
}
