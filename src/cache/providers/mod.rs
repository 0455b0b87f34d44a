//! Cache provider implementations

pub mod memory;
pub mod noop;

pub use memory::InMemoryCacheService;
pub use noop::NoOpCacheService;
