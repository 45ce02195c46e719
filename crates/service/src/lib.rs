//! Long-running drivers: the event dispatch loop and the worker poll loop.

pub mod dispatcher;
pub mod error;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use error::ServiceError;
pub use worker::PollWorker;
