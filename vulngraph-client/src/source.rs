use async_trait::async_trait;
use serde::Deserialize;

use crate::{ClientError, PageRequest, Resource};

/// Anything that can answer a page request with a raw response body.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<Vec<u8>, ClientError>;
}

#[async_trait]
impl<S: PageSource + ?Sized> PageSource for &S {
    async fn fetch(&self, request: &PageRequest) -> Result<Vec<u8>, ClientError> {
        (**self).fetch(request).await
    }
}

/// Body shape shared by every pageable resource.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Envelope<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    resource: Resource,
    body: &[u8],
) -> Result<Envelope<T>, ClientError> {
    serde_json::from_slice(body).map_err(|e| ClientError::Decode {
        resource,
        message: e.to_string(),
    })
}
