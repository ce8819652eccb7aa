use vulngraph_client::{ClientError, IterationError, PageFailure, PageId};
use vulngraph_db::DbError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Store(#[from] DbError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{page}: {message}")]
    Page { page: PageId, message: String },
    #[error("job data `{0}` was never written; did its producing stage run?")]
    MissingData(&'static str),
    #[error("job data `{key}` is malformed: {message}")]
    InvalidData { key: &'static str, message: String },
}

impl From<IterationError<StageError>> for StageError {
    fn from(err: IterationError<StageError>) -> Self {
        match err {
            IterationError::Request(e) => StageError::Client(e),
            IterationError::Page {
                failure: PageFailure::Handler(e),
                ..
            } => e,
            IterationError::Page {
                page,
                failure: PageFailure::Fetch(e),
            } => StageError::Page {
                page,
                message: e.to_string(),
            },
        }
    }
}
