//! Cache provider with enum dispatch
//!
//! Consumers hold a [`CacheProvider`] and never see which backend is behind
//! it. Backend errors are logged and degrade to a miss: the cache is an
//! optimization, never the source of truth.

use super::errors::CacheResult;
use super::providers::{InMemoryCacheService, NoOpCacheService};
use super::traits::CacheService;
use crate::config::CacheConfig;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
enum CacheBackend {
    Memory(InMemoryCacheService),
    NoOp(NoOpCacheService),
}

impl CacheBackend {
    fn provider_name(&self) -> &'static str {
        match self {
            Self::Memory(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Self::Memory(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            Self::Memory(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match self {
            Self::Memory(s) => s.delete(key).await,
            Self::NoOp(s) => s.delete(key).await,
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        match self {
            Self::Memory(s) => s.delete_prefix(prefix).await,
            Self::NoOp(s) => s.delete_prefix(prefix).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::Memory(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheProvider {
    backend: CacheBackend,
}

impl CacheProvider {
    pub fn from_config(config: &CacheConfig) -> Self {
        if config.enabled {
            info!(
                backend = "memory",
                ttl_seconds = config.result_ttl_seconds,
                "Result cache initialized"
            );
            Self::memory()
        } else {
            info!("Result cache disabled by configuration");
            Self::noop()
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: CacheBackend::Memory(InMemoryCacheService::new()),
        }
    }

    pub fn noop() -> Self {
        Self {
            backend: CacheBackend::NoOp(NoOpCacheService::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, CacheBackend::NoOp(_))
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    /// Backend errors are reported as a miss
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    /// Best-effort write, returns whether the backend accepted it
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        match self.backend.set(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = key, error = %e, "Cache set failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(key = key, error = %e, "Cache delete failed");
        }
    }

    pub async fn delete_prefix(&self, prefix: &str) -> u64 {
        match self.backend.delete_prefix(prefix).await {
            Ok(count) => count,
            Err(e) => {
                warn!(prefix = prefix, error = %e, "Cache prefix delete failed");
                0
            }
        }
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.backend.health_check().await
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        match &self.backend {
            CacheBackend::Memory(s) => s.purge_expired(),
            CacheBackend::NoOp(_) => 0,
        }
    }

    /// Entries currently held, expired ones included until purged
    pub fn entry_count(&self) -> usize {
        match &self.backend {
            CacheBackend::Memory(s) => s.len(),
            CacheBackend::NoOp(_) => 0,
        }
    }
}
