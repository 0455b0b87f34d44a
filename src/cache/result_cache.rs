//! # Result Cache
//!
//! Terminal task outcomes keyed by task id with a time-to-live. A miss means
//! "unknown to the cache" and callers fall back to the task store.

use super::errors::CacheResult;
use super::provider::CacheProvider;
use crate::models::{TaskOutcome, TaskStatus};
use crate::orchestration::error_handler::StructuredError;
use crate::retry::CancellationSignal;
use crate::utils::serde::duration_secs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use uuid::Uuid;

const KEY_PREFIX: &str = "task_result:";

/// What a cached entry holds: a result or an error, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPayload {
    Result(Value),
    Error(StructuredError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub payload: ResultPayload,
    #[serde(default)]
    pub attempt_count: u32,
    pub cached_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
}

impl CachedResult {
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.cached_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn to_outcome(&self) -> TaskOutcome {
        let (result, error) = match &self.payload {
            ResultPayload::Result(value) => (Some(value.clone()), None),
            ResultPayload::Error(error) => (None, Some(error.clone())),
        };
        TaskOutcome {
            task_id: self.task_id,
            status: self.status,
            result,
            error,
            attempt_count: self.attempt_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    provider: CacheProvider,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(provider: CacheProvider, default_ttl: Duration) -> Self {
        Self {
            provider,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_enabled()
    }

    fn key(task_id: Uuid) -> String {
        format!("{KEY_PREFIX}{task_id}")
    }

    /// Store a terminal outcome. Non-cacheable statuses are skipped and
    /// reported as `Ok(false)`.
    pub async fn set(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        payload: ResultPayload,
        attempt_count: u32,
        ttl: Duration,
    ) -> CacheResult<bool> {
        if !status.is_cacheable() {
            debug!(task_id = %task_id, status = %status, "Skipping cache write for non-cacheable status");
            return Ok(false);
        }

        let entry = CachedResult {
            task_id,
            status,
            payload,
            attempt_count,
            cached_at: Utc::now(),
            ttl,
        };
        let encoded = serde_json::to_string(&entry)?;
        Ok(self.provider.set(&Self::key(task_id), &encoded, ttl).await)
    }

    /// Store an outcome with the default TTL
    pub async fn store_outcome(&self, outcome: &TaskOutcome) -> CacheResult<bool> {
        let payload = match (&outcome.error, &outcome.result) {
            (Some(error), _) => ResultPayload::Error(error.clone()),
            (None, Some(value)) => ResultPayload::Result(value.clone()),
            (None, None) => ResultPayload::Result(Value::Null),
        };
        self.set(
            outcome.task_id,
            outcome.status,
            payload,
            outcome.attempt_count,
            self.default_ttl,
        )
        .await
    }

    /// Cached entry, or `None` on miss, expiry or an undecodable entry
    pub async fn get(&self, task_id: Uuid) -> Option<CachedResult> {
        let key = Self::key(task_id);
        let raw = self.provider.get(&key).await?;

        let entry: CachedResult = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(task_id = %task_id, error = %e, "Dropping undecodable cache entry");
                self.provider.delete(&key).await;
                return None;
            }
        };

        if entry.is_expired_at(Utc::now()) {
            self.provider.delete(&key).await;
            return None;
        }
        Some(entry)
    }

    pub async fn invalidate(&self, task_id: Uuid) {
        self.provider.delete(&Self::key(task_id)).await;
    }

    pub async fn clear(&self) -> u64 {
        self.provider.delete_prefix(KEY_PREFIX).await
    }

    pub async fn health_check(&self) -> bool {
        self.provider.health_check().await.unwrap_or(false)
    }

    pub fn entry_count(&self) -> usize {
        self.provider.entry_count()
    }

    pub fn purge_expired(&self) -> usize {
        self.provider.purge_expired()
    }

    /// Sweep expired results every `interval` until `shutdown` fires.
    /// Entries written once and never read again would otherwise stay
    /// in memory forever.
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationSignal) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed = removed, "Swept expired cached results");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Result cache sweeper stopped");
        })
    }
}
