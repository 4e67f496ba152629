//! LM access: transports, structural repair, shape validation, and logging.

pub mod client;
pub mod log;
pub mod repair;
pub mod shape;
pub mod transport;

pub use client::{interpret, LlmClient, LlmReply, RetryPolicy};
pub use shape::{Field, Shape, ShapeViolation};
pub use transport::{
    CommandTransport, CompletionRequest, HttpTransport, LlmTransport, UnconfiguredTransport,
};
