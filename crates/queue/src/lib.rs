pub mod client;
pub mod error;
pub mod sqs;

pub use client::{QueueClient, QueueMessage};
pub use error::QueueError;
pub use sqs::SqsQueue;
