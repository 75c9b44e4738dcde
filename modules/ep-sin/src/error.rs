use ep_common::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("batch too large: {0} envelopes (max {1})")]
    BatchTooLarge(usize, usize),
}

impl From<sqlx::Error> for SinError {
    fn from(err: sqlx::Error) -> Self {
        SinError::Storage(err.to_string())
    }
}
