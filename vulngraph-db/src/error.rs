#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("job state lock poisoned")]
    Poisoned,
    #[error("{0}")]
    Other(String),
}
