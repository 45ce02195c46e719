use thiserror::Error;

use strload_store::{JobStatus, StoreError};

#[derive(Debug, Error)]
pub enum LoaderError {
    /// The destination rejected the load — a business-rule failure
    /// recorded as job status `failure`.
    #[error("load rejected by destination: {0}")]
    JobFailure(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("destination error: {0}")]
    Destination(#[source] sqlx::Error),

    #[error("control store error: {0}")]
    Store(#[from] StoreError),
}

impl LoaderError {
    /// Terminal job status this error records before propagating.
    pub fn job_status(&self) -> JobStatus {
        match self {
            LoaderError::JobFailure(_) => JobStatus::Failure,
            _ => JobStatus::Error,
        }
    }
}
