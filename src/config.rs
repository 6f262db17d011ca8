//! Archive endpoint and client configuration.
//!
//! All endpoints default to the public ESO services. Every field can be
//! overridden programmatically, from a deserialized config file, or through
//! `ESOARC_*` environment variables (checked once at construction).

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Default TAP service base URL.
pub const DEFAULT_TAP_URL: &str = "https://archive.eso.org/tap_obs";

/// Default dataportal file download URL prefix.
pub const DEFAULT_DOWNLOAD_URL: &str = "https://dataportal.eso.org/dataPortal/file/";

/// Default SSO token endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://www.eso.org/sso/oidc/token";

/// Default CalSelector association service URL.
pub const DEFAULT_CALSELECTOR_URL: &str = "https://archive.eso.org/calselector/v1/associations";

/// Default FITS header endpoint.
pub const DEFAULT_HDR_URL: &str = "https://archive.eso.org/hdr";

/// Default APEX quicklook product listing endpoint.
pub const DEFAULT_APEX_URL: &str = "https://archive.eso.org/wdb/wdb/eso/apex_product/query";

/// Default row cap applied to catalogue queries. `-1` disables capping.
pub const DEFAULT_ROW_LIMIT: i64 = 50;

/// Connect timeout in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout in seconds. Generous because data products can be large.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No suitable cache directory is available.
    #[error("unable to determine cache directory (set ESOARC_CACHE_DIR, XDG_CACHE_HOME or HOME)")]
    CacheDirUnavailable,
}

/// Client configuration: endpoints, row cap, timeouts, cache location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// TAP service base URL (sync queries go to `{tap_url}/sync`).
    pub tap_url: String,
    /// Dataportal URL prefix; the dataset id is appended directly.
    pub download_url: String,
    /// SSO token endpoint used for the password grant.
    pub auth_url: String,
    /// CalSelector association service URL.
    pub calselector_url: String,
    /// FITS header endpoint; queried as `{hdr_url}?DpId={id}`.
    pub hdr_url: String,
    /// APEX quicklook product listing endpoint (CSV).
    pub apex_url: String,
    /// Row cap applied to catalogue queries. `-1` disables capping.
    pub row_limit: i64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Cache directory for query responses and downloaded files.
    pub cache_dir: Option<PathBuf>,
    /// Username used by `login` when none is passed explicitly.
    pub username: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            tap_url: DEFAULT_TAP_URL.to_string(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            calselector_url: DEFAULT_CALSELECTOR_URL.to_string(),
            hdr_url: DEFAULT_HDR_URL.to_string(),
            apex_url: DEFAULT_APEX_URL.to_string(),
            row_limit: DEFAULT_ROW_LIMIT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            cache_dir: None,
            username: None,
        }
    }
}

impl ArchiveConfig {
    /// Builds the configuration from defaults plus `ESOARC_*` environment
    /// overrides.
    ///
    /// Recognized variables: `ESOARC_TAP_URL`, `ESOARC_DOWNLOAD_URL`,
    /// `ESOARC_AUTH_URL`, `ESOARC_CALSELECTOR_URL`, `ESOARC_HDR_URL`,
    /// `ESOARC_APEX_URL`, `ESOARC_ROW_LIMIT`, `ESOARC_CACHE_DIR`,
    /// `ESOARC_USERNAME`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = sanitize_env_string(env::var_os("ESOARC_TAP_URL")) {
            config.tap_url = value;
        }
        if let Some(value) = sanitize_env_string(env::var_os("ESOARC_DOWNLOAD_URL")) {
            config.download_url = value;
        }
        if let Some(value) = sanitize_env_string(env::var_os("ESOARC_AUTH_URL")) {
            config.auth_url = value;
        }
        if let Some(value) = sanitize_env_string(env::var_os("ESOARC_CALSELECTOR_URL")) {
            config.calselector_url = value;
        }
        if let Some(value) = sanitize_env_string(env::var_os("ESOARC_HDR_URL")) {
            config.hdr_url = value;
        }
        if let Some(value) = sanitize_env_string(env::var_os("ESOARC_APEX_URL")) {
            config.apex_url = value;
        }
        if let Some(value) = sanitize_env_string(env::var_os("ESOARC_ROW_LIMIT"))
            && let Ok(limit) = value.parse::<i64>()
        {
            config.row_limit = limit;
        }
        if let Some(value) = sanitize_env_path(env::var_os("ESOARC_CACHE_DIR")) {
            config.cache_dir = Some(value);
        }
        if let Some(value) = sanitize_env_string(env::var_os("ESOARC_USERNAME")) {
            config.username = Some(value);
        }
        config
    }

    /// Resolves the effective cache directory.
    ///
    /// Preference order: explicit `cache_dir`, then `$XDG_CACHE_HOME/esoarc`,
    /// then `$HOME/.cache/esoarc`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CacheDirUnavailable`] if no candidate exists.
    pub fn resolve_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        resolve_cache_dir_from(
            sanitize_env_path(env::var_os("XDG_CACHE_HOME")),
            sanitize_env_path(env::var_os("HOME")),
        )
    }

    /// URL of the synchronous TAP query endpoint.
    #[must_use]
    pub fn tap_sync_url(&self) -> String {
        format!("{}/sync", self.tap_url.trim_end_matches('/'))
    }

    /// Download URL for a single dataset id.
    #[must_use]
    pub fn file_url(&self, dataset_id: &str) -> String {
        format!("{}{}", self.download_url, dataset_id)
    }

    /// Header endpoint URL for a single dataset id.
    #[must_use]
    pub fn header_url(&self, dataset_id: &str) -> String {
        format!("{}?DpId={}", self.hdr_url, urlencoding::encode(dataset_id))
    }
}

fn resolve_cache_dir_from(
    xdg_cache_home: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(xdg) = xdg_cache_home {
        return Ok(xdg.join("esoarc"));
    }
    if let Some(home) = home {
        return Ok(home.join(".cache").join("esoarc"));
    }
    Err(ConfigError::CacheDirUnavailable)
}

fn sanitize_env_string(value: Option<OsString>) -> Option<String> {
    let value = value?.to_string_lossy().trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_points_at_public_endpoints() {
        let config = ArchiveConfig::default();
        assert!(config.tap_url.contains("archive.eso.org"));
        assert!(config.download_url.ends_with('/'));
        assert_eq!(config.row_limit, DEFAULT_ROW_LIMIT);
    }

    #[test]
    fn test_tap_sync_url_strips_trailing_slash() {
        let config = ArchiveConfig {
            tap_url: "http://localhost:8080/tap/".to_string(),
            ..ArchiveConfig::default()
        };
        assert_eq!(config.tap_sync_url(), "http://localhost:8080/tap/sync");
    }

    #[test]
    fn test_file_url_appends_dataset_id() {
        let config = ArchiveConfig::default();
        let url = config.file_url("ADP.2021-07-16T10:21:46.394");
        assert!(url.ends_with("ADP.2021-07-16T10:21:46.394"));
    }

    #[test]
    fn test_header_url_encodes_dataset_id() {
        let config = ArchiveConfig {
            hdr_url: "http://localhost/hdr".to_string(),
            ..ArchiveConfig::default()
        };
        let url = config.header_url("A B");
        assert_eq!(url, "http://localhost/hdr?DpId=A%20B");
    }

    #[test]
    fn test_resolve_cache_dir_prefers_explicit_dir() {
        let config = ArchiveConfig {
            cache_dir: Some(PathBuf::from("/tmp/esoarc-test")),
            ..ArchiveConfig::default()
        };
        assert_eq!(
            config.resolve_cache_dir().unwrap(),
            PathBuf::from("/tmp/esoarc-test")
        );
    }

    #[test]
    fn test_resolve_cache_dir_prefers_xdg_over_home() {
        let resolved = resolve_cache_dir_from(
            Some(PathBuf::from("/tmp/xdg")),
            Some(PathBuf::from("/tmp/home")),
        )
        .unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/xdg/esoarc"));
    }

    #[test]
    fn test_resolve_cache_dir_falls_back_to_home() {
        let resolved = resolve_cache_dir_from(None, Some(PathBuf::from("/tmp/home"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/home/.cache/esoarc"));
    }

    #[test]
    fn test_resolve_cache_dir_errors_when_all_sources_missing() {
        let result = resolve_cache_dir_from(None, None);
        assert!(matches!(result, Err(ConfigError::CacheDirUnavailable)));
    }

    #[test]
    fn test_sanitize_env_string_rejects_blank_values() {
        assert!(sanitize_env_string(Some(OsString::from(""))).is_none());
        assert!(sanitize_env_string(Some(OsString::from("   "))).is_none());
        assert_eq!(
            sanitize_env_string(Some(OsString::from(" x "))),
            Some("x".to_string())
        );
    }
}
