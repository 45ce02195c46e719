use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// The notification cannot be routed to any configured destination.
    /// Fatal to that message only; requires operator attention.
    #[error("unroutable notification: {0}")]
    Validation(String),

    #[error("malformed event body: {0}")]
    Malformed(#[from] serde_json::Error),
}
