//! # Messaging
//!
//! The broker seam between submission and execution. [`TaskBroker`] is the
//! contract any queueing backend satisfies; [`InMemoryBroker`] is the
//! in-process implementation.

pub mod broker;
pub mod errors;
pub mod in_memory;
pub mod message;

pub use broker::TaskBroker;
pub use errors::MessagingError;
pub use in_memory::InMemoryBroker;
pub use message::{MessageState, QueueStats, ReceiptHandle, ReceivedMessage, TaskMessage};
