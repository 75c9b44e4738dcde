use ep_common::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AncError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unknown escalation policy: {0}")]
    UnknownEscalationPolicy(String),
}

impl From<sqlx::Error> for AncError {
    fn from(err: sqlx::Error) -> Self {
        AncError::Storage(err.to_string())
    }
}
