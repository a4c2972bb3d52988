//! Per-run state: active task page, timing records, and stored payloads.
//!
//! Each accepted `/solve` request gets its own [`RunContext`]; nothing here is
//! process-wide, so concurrent runs never see each other's deadlines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::RunLimits;

/// Maps task-page URL to the instant work on that page began.
#[derive(Debug, Clone, Default)]
pub struct TimingStore {
    inner: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl TimingStore {
    pub async fn get(&self, url: &str) -> Option<DateTime<Utc>> {
        self.inner.read().await.get(url).copied()
    }

    pub async fn set(&self, url: &str, started_at: DateTime<Utc>) {
        self.inner.write().await.insert(url.to_string(), started_at);
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

const BASE64_KEY_PREFIX: &str = "BASE64_KEY:";

/// Large base64 payloads kept out of the conversation.
///
/// Tools store encoded data here and hand the model a short placeholder;
/// submissions swap placeholders back for the real data.
#[derive(Debug, Clone, Default)]
pub struct Base64Store {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl Base64Store {
    /// Store `data` and return the placeholder that refers to it.
    pub async fn insert(&self, data: String) -> String {
        let key = format!("{}{}", BASE64_KEY_PREFIX, Uuid::new_v4().simple());
        self.inner.write().await.insert(key.clone(), data);
        key
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    /// Replace every known placeholder inside string values of `value`.
    pub async fn substitute(&self, value: &serde_json::Value) -> serde_json::Value {
        let store = self.inner.read().await;
        if store.is_empty() {
            return value.clone();
        }
        let pattern = match Regex::new(r"BASE64_KEY:[0-9a-f]{32}") {
            Ok(p) => p,
            Err(_) => return value.clone(),
        };
        substitute_value(value, &pattern, &store)
    }
}

fn substitute_value(
    value: &serde_json::Value,
    pattern: &Regex,
    store: &HashMap<String, String>,
) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(
            pattern
                .replace_all(s, |caps: &regex::Captures| {
                    store
                        .get(&caps[0])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute_value(v, pattern, store))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, pattern, store)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Which deadline was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overrun {
    /// Too long on the current page.
    TaskTimeLimit { elapsed: Duration },
    /// Too long since a rejected submission.
    RetryWindow { since_offset: Duration },
}

/// Evaluate both deadline conditions for one agent step.
///
/// With no recorded start for the page, neither condition is checked.
pub fn check_deadline(
    started_at: Option<DateTime<Utc>>,
    offset: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    limits: &RunLimits,
) -> Option<Overrun> {
    let started_at = started_at?;
    let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
    if elapsed >= limits.task_time_limit {
        return Some(Overrun::TaskTimeLimit { elapsed });
    }

    if let Some(offset) = offset {
        let since_offset = (now - offset).to_std().unwrap_or(Duration::ZERO);
        if since_offset > limits.retry_window {
            return Some(Overrun::RetryWindow { since_offset });
        }
    }

    None
}

#[derive(Debug)]
struct PageState {
    url: String,
    offset: Option<DateTime<Utc>>,
}

/// Everything a single run needs to know about where it is.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    /// URL the run was launched with
    pub seed_url: String,
    timing: TimingStore,
    base64: Base64Store,
    page: RwLock<PageState>,
}

impl RunContext {
    /// Create a run for `url`, recording now as the start of work on it.
    pub async fn start(url: &str) -> Arc<Self> {
        Self::start_at(url, Utc::now()).await
    }

    pub async fn start_at(url: &str, started_at: DateTime<Utc>) -> Arc<Self> {
        let timing = TimingStore::default();
        timing.set(url, started_at).await;

        Arc::new(Self {
            run_id: Uuid::new_v4(),
            seed_url: url.to_string(),
            timing,
            base64: Base64Store::default(),
            page: RwLock::new(PageState {
                url: url.to_string(),
                offset: None,
            }),
        })
    }

    pub fn timing(&self) -> &TimingStore {
        &self.timing
    }

    pub fn base64(&self) -> &Base64Store {
        &self.base64
    }

    pub async fn current_url(&self) -> String {
        self.page.read().await.url.clone()
    }

    pub async fn offset(&self) -> Option<DateTime<Utc>> {
        self.page.read().await.offset
    }

    /// Move on to the next task page. Only the active page keeps a timing record.
    pub async fn advance_to(&self, url: &str) {
        let now = Utc::now();
        {
            let mut page = self.page.write().await;
            page.url = url.to_string();
            page.offset = None;
        }
        self.timing.clear().await;
        self.timing.set(url, now).await;
        tracing::info!(run_id = %self.run_id, url = %url, "Advanced to next task page");
    }

    /// Open the retry window on the current page, starting now.
    pub async fn mark_retry(&self) {
        self.page.write().await.offset = Some(Utc::now());
    }

    /// Deadline status for the active page at `now`.
    pub async fn deadline_status(&self, now: DateTime<Utc>, limits: &RunLimits) -> Option<Overrun> {
        let (url, offset) = {
            let page = self.page.read().await;
            (page.url.clone(), page.offset)
        };
        let started_at = self.timing.get(&url).await;
        check_deadline(started_at, offset, now, limits)
    }
}
