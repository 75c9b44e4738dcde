use ep_common::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IafError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    #[error("http transport error: {0}")]
    Http(String),
}

impl From<sqlx::Error> for IafError {
    fn from(err: sqlx::Error) -> Self {
        IafError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for IafError {
    fn from(err: reqwest::Error) -> Self {
        IafError::Http(err.to_string())
    }
}
