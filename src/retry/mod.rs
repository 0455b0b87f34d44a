//! # Retry
//!
//! Bounded re-execution of a failing handler with exponential backoff.
//!
//! - [`RetryPolicy`]: attempt budget, delay curve and the retryable /
//!   non-retryable [`ErrorKind`](crate::error::ErrorKind) sets
//! - [`RetryCoordinator`]: drives attempts, classifying each failure through
//!   the [`ErrorHandler`](crate::orchestration::error_handler::ErrorHandler)
//! - [`CancellationSignal`]: cooperative cancellation observed by handlers and
//!   by the backoff wait

pub mod cancellation;
pub mod coordinator;
pub mod policy;

pub use cancellation::CancellationSignal;
pub use coordinator::{RetryCoordinator, RetryEvent, RetryFailure};
pub use policy::RetryPolicy;
