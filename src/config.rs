use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// 1 GiB, the default cap on a whole upload request body.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1024 * 1024 * 1024;

/// Server settings loaded from an optional TOML file.
///
/// Every key is optional; a missing file section falls back to the defaults
/// below. The share root and bind address come from the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Maximum size of an upload request body, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Follow symbolic links that resolve inside the share root.
    /// When false, any link on a requested path is refused.
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Base URL advertised in QR codes, e.g. `http://192.168.1.20:8080`.
    /// Defaults to `http://<Host header>` of the request.
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            follow_symlinks: false,
            public_url: None,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Body limit in the form `DefaultBodyLimit` expects.
    pub fn upload_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes).unwrap_or(usize::MAX)
    }

    /// `public_url` without a trailing slash, if configured.
    pub fn public_base_url(&self) -> Option<&str> {
        self.public_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(!config.follow_symlinks);
        assert!(config.public_url.is_none());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let config = Config::from_toml("follow_symlinks = true\nmax_upload_bytes = 2048\n").unwrap();
        assert!(config.follow_symlinks);
        assert_eq!(config.max_upload_bytes, 2048);
        assert_eq!(config.upload_limit(), 2048);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = Config::from_toml("max_upload = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn public_url_is_trimmed() {
        let config = Config::from_toml("public_url = \"http://10.0.0.2:8080/\"").unwrap();
        assert_eq!(config.public_base_url(), Some("http://10.0.0.2:8080"));

        let config = Config::from_toml("public_url = \"\"").unwrap();
        assert_eq!(config.public_base_url(), None);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read(_)));
    }
}
