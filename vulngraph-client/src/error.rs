use crate::resource::Resource;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("filter `{filter}` is not accepted by resource `{resource}`")]
    UnsupportedFilter {
        resource: Resource,
        filter: &'static str,
    },
    #[error("resource `{resource}` requires the `{filter}` filter")]
    MissingFilter {
        resource: Resource,
        filter: &'static str,
    },
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("vendor API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode `{resource}` page: {message}")]
    Decode { resource: Resource, message: String },
    #[error("response too large ({0} bytes)")]
    TooLarge(usize),
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
