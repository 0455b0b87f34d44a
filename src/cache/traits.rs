//! Cache service trait definition

use super::errors::CacheResult;
use std::time::Duration;

/// Key-value store with per-entry TTL, safe for concurrent use.
///
/// Values are opaque strings; typed layers such as
/// [`ResultCache`](super::ResultCache) serialize on top.
pub trait CacheService: Send + Sync {
    /// `Ok(Some(value))` on hit, `Ok(None)` on miss or expiry
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<String>>> + Send;

    /// Set a value in the cache with a TTL
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    fn delete(&self, key: &str) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete every key starting with `prefix`, returning how many were removed
    fn delete_prefix(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = CacheResult<u64>> + Send;

    fn health_check(&self) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    fn provider_name(&self) -> &'static str;
}
