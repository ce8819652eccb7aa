use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{ClientError, PageRequest, PageSource, Resource};

const MAX_RESPONSE_BYTES: usize = 50_000_000;

/// Connection settings for [`HttpPageSource`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    /// Extra attempts after the first for transient failures.
    pub max_retries: usize,
    pub retry_delay: Duration,
}

/// Fetches pages from the vendor REST API with basic auth.
pub struct HttpPageSource {
    http: reqwest::Client,
    settings: HttpSettings,
}

impl HttpPageSource {
    pub fn new(settings: HttpSettings) -> Result<Self, ClientError> {
        if settings.api_url.trim().is_empty() {
            return Err(ClientError::Config("api_url is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("vulngraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, settings })
    }

    fn url(&self, resource: Resource) -> String {
        format!(
            "{}{}",
            self.settings.api_url.trim_end_matches('/'),
            endpoint(resource).0
        )
    }

    async fn send_once(&self, request: &PageRequest) -> Result<Vec<u8>, ClientError> {
        let (_, action, fixed) = endpoint(request.resource);
        let mut query: Vec<(&str, &str)> = vec![("action", action), ("output_format", "json")];
        query.extend_from_slice(fixed);
        query.extend(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let resp = self
            .http
            .get(self.url(request.resource))
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .header("X-Requested-With", "vulngraph")
            .query(&query)
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ClientError::Http(format!("failed to read response body: {e}")))?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(ClientError::TooLarge(bytes.len()));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, request: &PageRequest) -> Result<Vec<u8>, ClientError> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(body) => {
                    debug!(resource = %request.resource, bytes = body.len(), "fetched page");
                    return Ok(body);
                }
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    warn!(
                        resource = %request.resource,
                        attempt,
                        error = %e,
                        "retrying vendor request after failure"
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

type FixedParams = &'static [(&'static str, &'static str)];

/// Path, action and fixed query parameters per resource.
fn endpoint(resource: Resource) -> (&'static str, &'static str, FixedParams) {
    match resource {
        Resource::Hosts => ("/api/2.0/fo/asset/host/", "list", &[("details", "All")]),
        Resource::ScannedHostIds => (
            "/api/2.0/fo/asset/host/vm/detection/",
            "list",
            &[("show_results", "0")],
        ),
        Resource::Scans => ("/api/2.0/fo/scan/", "list", &[]),
        Resource::ScanResults => ("/api/2.0/fo/scan/", "fetch", &[("mode", "extended")]),
        Resource::Vulnerabilities => (
            "/api/2.0/fo/knowledge_base/vuln/",
            "list",
            &[("details", "All")],
        ),
        Resource::HostScans => ("/api/2.0/fo/scan/", "list", &[("show_ags", "0")]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> HttpSettings {
        HttpSettings {
            api_url: url.into(),
            username: "user".into(),
            password: "secret".into(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(matches!(
            HttpPageSource::new(settings("  ")),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let source = HttpPageSource::new(settings("https://qualysapi.example.com/")).unwrap();
        assert_eq!(
            source.url(Resource::Vulnerabilities),
            "https://qualysapi.example.com/api/2.0/fo/knowledge_base/vuln/"
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_transient_http_error() {
        let source = HttpPageSource::new(settings("http://127.0.0.1:1")).unwrap();
        let request = PageRequest {
            resource: Resource::Scans,
            params: vec![],
        };
        let err = source.fetch(&request).await.unwrap_err();
        assert!(err.is_transient(), "expected transient error, got: {err}");
    }
}
