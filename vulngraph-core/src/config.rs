use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vulngraph_client::{Filter, HttpSettings, PagingSettings};

/// Default look-back when no scan window is configured.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_PASSWORD_ENV: &str = "QUALYS_PASSWORD";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("`{0}` must be set")]
    Missing(&'static str),
    #[error("`api_url` must be an http(s) URL with a host, got {0:?}")]
    InvalidUrl(String),
    #[error("scan window is empty: min_scanned_since {min} is after max_scanned_since {max}")]
    EmptyWindow {
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    },
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("no password configured and ${0} is not set")]
    NoPassword(String),
}

/// Integration settings, loaded from TOML and overridden by CLI flags.
///
/// Timestamps are RFC 3339 strings. Every field except `api_url` and
/// `username` has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub api_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Environment variable consulted when `password` is unset.
    pub password_env: String,
    pub min_scanned_since: Option<DateTime<Utc>>,
    pub max_scanned_since: Option<DateTime<Utc>>,
    pub page_size: usize,
    pub vuln_batch_size: usize,
    /// Also target CVE vulnerabilities, not only catalog entries.
    pub include_cve_targets: bool,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub max_consecutive_failures: usize,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            username: String::new(),
            password: None,
            password_env: DEFAULT_PASSWORD_ENV.to_string(),
            min_scanned_since: None,
            max_scanned_since: None,
            page_size: 1000,
            vuln_batch_size: 250,
            include_cve_targets: false,
            request_timeout_secs: 60,
            max_retries: 2,
            retry_delay_ms: 2000,
            max_consecutive_failures: 3,
        }
    }
}

impl IntegrationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_at(Utc::now())
    }

    /// Like [`validate`](Self::validate), with defaulted window bounds
    /// resolved against `now`.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("username"));
        }
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Missing("api_url"));
        }
        api_host(&self.api_url)?;
        let (min, max) = self.scan_window(now);
        if min > max {
            return Err(ConfigError::EmptyWindow { min, max });
        }
        for (name, value) in [
            ("page_size", self.page_size),
            ("vuln_batch_size", self.vuln_batch_size),
            ("max_consecutive_failures", self.max_consecutive_failures),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("request_timeout_secs"));
        }
        Ok(())
    }

    /// Processed-scan window, defaulting to the last thirty days before `now`.
    pub fn scan_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let max = self.max_scanned_since.unwrap_or(now);
        let min = self
            .min_scanned_since
            .unwrap_or(max - chrono::Duration::days(DEFAULT_WINDOW_DAYS));
        (min, max)
    }

    pub fn window_filters(&self, now: DateTime<Utc>) -> Vec<Filter> {
        let (min, max) = self.scan_window(now);
        vec![Filter::ProcessedAfter(min), Filter::ProcessedBefore(max)]
    }

    /// Host of the web UI, used in links: `qualysapi.qg3.apps.qualys.com`
    /// becomes `qg3.apps.qualys.com`.
    pub fn ui_host(&self) -> Result<String, ConfigError> {
        let host = api_host(&self.api_url)?;
        Ok(host
            .strip_prefix("qualysapi.")
            .unwrap_or(host)
            .to_string())
    }

    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            return Ok(password.clone());
        }
        std::env::var(&self.password_env)
            .ok()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::NoPassword(self.password_env.clone()))
    }

    pub fn paging(&self) -> PagingSettings {
        PagingSettings {
            page_size: self.page_size,
            id_batch_size: self.vuln_batch_size,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    pub fn http_settings(&self) -> Result<HttpSettings, ConfigError> {
        Ok(HttpSettings {
            api_url: self.api_url.clone(),
            username: self.username.clone(),
            password: self.resolve_password()?,
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        })
    }
}

fn api_host(url: &str) -> Result<&str, ConfigError> {
    let rest = url
        .trim()
        .strip_prefix("https://")
        .or_else(|| url.trim().strip_prefix("http://"))
        .ok_or_else(|| ConfigError::InvalidUrl(url.to_string()))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default();
    if host.is_empty() {
        return Err(ConfigError::InvalidUrl(url.to_string()));
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minimal() -> IntegrationConfig {
        IntegrationConfig {
            api_url: "https://qualysapi.qg3.apps.qualys.com".into(),
            username: "analyst".into(),
            ..Default::default()
        }
    }

    #[test]
    fn toml_fills_defaults() {
        let cfg = IntegrationConfig::from_toml_str(
            r#"
            api_url = "https://qualysapi.qg2.apps.qualys.com/"
            username = "analyst"
            min_scanned_since = "2024-01-01T00:00:00Z"
            include_cve_targets = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.page_size, 1000);
        assert_eq!(cfg.vuln_batch_size, 250);
        assert_eq!(cfg.password_env, "QUALYS_PASSWORD");
        assert!(cfg.include_cve_targets);
        assert_eq!(
            cfg.min_scanned_since,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_toml_shape_is_a_parse_error() {
        let err = IntegrationConfig::from_toml_str("page_size = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = minimal();
        cfg.username = " ".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing("username"))));

        let mut cfg = minimal();
        cfg.api_url = "ftp://example.com".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidUrl(_))));

        let mut cfg = minimal();
        cfg.page_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Zero("page_size"))));

        let mut cfg = minimal();
        cfg.min_scanned_since = Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        cfg.max_scanned_since = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyWindow { .. })));
    }

    #[test]
    fn window_defaults_to_thirty_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let (min, max) = minimal().scan_window(now);
        assert_eq!(max, now);
        assert_eq!(min, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn future_min_with_default_max_is_an_empty_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let mut cfg = minimal();
        cfg.min_scanned_since = Some(Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap());
        assert!(matches!(
            cfg.validate_at(now),
            Err(ConfigError::EmptyWindow { max, .. }) if max == now
        ));
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyWindow { .. })));

        cfg.min_scanned_since = Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert!(cfg.validate_at(now).is_ok());
    }

    #[test]
    fn ui_host_strips_api_prefix() {
        assert_eq!(minimal().ui_host().unwrap(), "qg3.apps.qualys.com");

        let mut cfg = minimal();
        cfg.api_url = "https://user@qualysapi.qualys.eu:443/api/".into();
        assert_eq!(cfg.ui_host().unwrap(), "qualys.eu");

        cfg.api_url = "https://scanner.internal".into();
        assert_eq!(cfg.ui_host().unwrap(), "scanner.internal");
    }

    #[test]
    fn explicit_password_wins() {
        let mut cfg = minimal();
        cfg.password = Some("hunter2".into());
        cfg.password_env = "VULNGRAPH_TEST_UNSET_PASSWORD_VAR".into();
        assert_eq!(cfg.resolve_password().unwrap(), "hunter2");

        cfg.password = None;
        assert!(matches!(
            cfg.resolve_password(),
            Err(ConfigError::NoPassword(_))
        ));
    }
}
