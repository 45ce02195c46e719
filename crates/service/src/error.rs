use thiserror::Error;

use strload_core::CoreError;
use strload_queue::QueueError;
use strload_store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("control store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
