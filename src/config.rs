//! Configuration for credential discovery and token refresh.
//!
//! The environment is resolved exactly once, in [`AuthConfig::from_env`],
//! so discovery itself is deterministic over its inputs and testable
//! without process state.

use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;

/// Environment variable naming the API key fallback (cascade source 4).
pub const API_KEY_ENV: &str = "AUTHFLOW_API_KEY";

/// Environment variable overriding the OAuth token file path (cascade
/// source 2).
pub const CREDENTIALS_PATH_ENV: &str = "AUTHFLOW_CREDENTIALS_PATH";

/// Margin before actual expiry at which a token is proactively treated as
/// expired (5 minutes). Avoids races where a token expires mid-flight of
/// the outbound API call that will use it.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Timeout for the outbound refresh HTTP call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Inputs to the credential discovery cascade.
///
/// Explicit fields beat environment-derived ones; [`AuthConfig::from_env`]
/// captures the environment, and the builder methods layer explicit
/// overrides on top.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Explicit API key (cascade source 1); wins unconditionally.
    pub explicit_api_key: Option<String>,
    /// Overridden OAuth token file path (cascade source 2).
    pub custom_credentials_path: Option<PathBuf>,
    /// API key captured from [`API_KEY_ENV`] (cascade source 4).
    pub env_api_key: Option<String>,
    /// Margin before expiry at which refresh is triggered.
    pub refresh_threshold: Duration,
    /// Timeout applied to each refresh call.
    pub refresh_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            explicit_api_key: None,
            custom_credentials_path: None,
            env_api_key: None,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

impl AuthConfig {
    /// Capture discovery inputs from the process environment.
    ///
    /// Reads [`API_KEY_ENV`] and [`CREDENTIALS_PATH_ENV`]; blank values are
    /// treated as unset.
    pub fn from_env() -> Self {
        Self {
            custom_credentials_path: non_blank_env(CREDENTIALS_PATH_ENV).map(PathBuf::from),
            env_api_key: non_blank_env(API_KEY_ENV),
            ..Self::default()
        }
    }

    /// Set an explicit API key (cascade source 1).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.explicit_api_key = non_blank(key.into());
        self
    }

    /// Override the OAuth token file path (cascade source 2).
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.custom_credentials_path = Some(path.into());
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }
}

/// Platform default OAuth token file: `~/.config/authflow/credentials.json`.
///
/// `None` when no home directory can be resolved (e.g. stripped-down
/// containers), in which case the default-path source reports itself
/// unavailable.
pub fn default_credentials_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join(".config")
            .join("authflow")
            .join("credentials.json")
    })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn non_blank_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(non_blank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_no_sources() {
        let config = AuthConfig::default();
        assert!(config.explicit_api_key.is_none());
        assert!(config.custom_credentials_path.is_none());
        assert!(config.env_api_key.is_none());
        assert_eq!(config.refresh_threshold, DEFAULT_REFRESH_THRESHOLD);
    }

    #[test]
    fn blank_explicit_key_is_unset() {
        let config = AuthConfig::default().with_api_key("   ");
        assert!(config.explicit_api_key.is_none());
    }

    #[test]
    fn explicit_key_is_trimmed() {
        let config = AuthConfig::default().with_api_key(" key-1 ");
        assert_eq!(config.explicit_api_key.as_deref(), Some("key-1"));
    }

    #[test]
    #[serial]
    fn from_env_captures_variables() {
        std::env::set_var(API_KEY_ENV, "env-key");
        std::env::set_var(CREDENTIALS_PATH_ENV, "/tmp/tokens.json");
        let config = AuthConfig::from_env();
        std::env::remove_var(API_KEY_ENV);
        std::env::remove_var(CREDENTIALS_PATH_ENV);

        assert_eq!(config.env_api_key.as_deref(), Some("env-key"));
        assert_eq!(
            config.custom_credentials_path.as_deref(),
            Some(std::path::Path::new("/tmp/tokens.json"))
        );
    }

    #[test]
    #[serial]
    fn from_env_treats_blank_as_unset() {
        std::env::set_var(API_KEY_ENV, "  ");
        std::env::remove_var(CREDENTIALS_PATH_ENV);
        let config = AuthConfig::from_env();
        std::env::remove_var(API_KEY_ENV);

        assert!(config.env_api_key.is_none());
        assert!(config.custom_credentials_path.is_none());
    }
}
