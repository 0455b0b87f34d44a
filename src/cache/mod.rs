//! # Result Caching
//!
//! ```text
//! ResultCache                     <- typed terminal outcomes with TTL
//!   └── CacheProvider (enum)      <- dispatch, errors degrade to a miss
//!         ├── Memory(InMemoryCacheService)
//!         └── NoOp(NoOpCacheService)
//! ```

pub mod errors;
pub mod provider;
pub mod providers;
pub mod result_cache;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use provider::CacheProvider;
pub use providers::{InMemoryCacheService, NoOpCacheService};
pub use result_cache::{CachedResult, ResultCache, ResultPayload};
pub use traits::CacheService;
