//! Credential discovery cascade.
//!
//! Resolves exactly one credential from an ordered list of sources,
//! stopping at the first success and never combining sources:
//!
//! 1. explicit API key passed at construction
//! 2. OAuth token file at an overridden path
//! 3. OAuth token file at the platform default path
//! 4. API key from [`crate::config::API_KEY_ENV`]
//!
//! OAuth availability is soft: a token file that exists but cannot produce
//! a valid access token (absent record, schema failure, failed refresh)
//! makes the cascade fall through to the next source instead of wedging
//! the caller.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{AuthConfig, API_KEY_ENV};
use crate::refresh::TokenRefresher;
use crate::store::FileTokenStore;
use crate::token_manager::OAuthTokenManager;
use crate::types::{
    ApiKeySource, Credential, CredentialSource, DiscoveryResult, OAuthSource, SourceAttempt,
    TokenInfo,
};

/// Probes the ordered credential sources.
///
/// `discover()` is idempotent and uncached; caching policy belongs to
/// [`crate::UnifiedAuthManager`] so callers can force re-discovery without
/// rebuilding the component graph.
pub struct CredentialDiscovery {
    explicit_api_key: Option<String>,
    env_api_key: Option<String>,
    custom_manager: Option<Arc<OAuthTokenManager>>,
    default_manager: Option<Arc<OAuthTokenManager>>,
}

impl CredentialDiscovery {
    /// Build the cascade from resolved configuration.
    ///
    /// A token manager is created per candidate token file: one for the
    /// overridden path when configured, one for the platform default path
    /// when a home directory exists.
    pub fn new(config: &AuthConfig, refresher: Arc<dyn TokenRefresher>) -> Self {
        let custom_manager = config
            .custom_credentials_path
            .clone()
            .map(|path| file_manager(config, refresher.clone(), path));
        let default_manager = crate::config::default_credentials_path()
            .map(|path| file_manager(config, refresher.clone(), path));

        Self {
            explicit_api_key: config.explicit_api_key.clone(),
            env_api_key: config.env_api_key.clone(),
            custom_manager,
            default_manager,
        }
    }

    /// Replace the custom-path token manager (testing, alternate stores).
    pub fn with_custom_manager(mut self, manager: Arc<OAuthTokenManager>) -> Self {
        self.custom_manager = Some(manager);
        self
    }

    /// Replace the default-path token manager (testing, alternate stores).
    pub fn with_default_manager(mut self, manager: Arc<OAuthTokenManager>) -> Self {
        self.default_manager = Some(manager);
        self
    }

    /// Run the cascade once.
    ///
    /// Returns the winning credential together with every source probed
    /// and its outcome; sources below the winner are not probed and carry
    /// no entry.
    #[instrument(skip(self))]
    pub async fn discover(&self) -> DiscoveryResult {
        let mut attempts = Vec::new();

        // Source 1: explicit credential wins unconditionally.
        if let Some(key) = &self.explicit_api_key {
            info!("credential resolved from explicit API key");
            attempts.push(SourceAttempt::selected(CredentialSource::Explicit));
            return DiscoveryResult {
                credential: Some(Credential::ApiKey {
                    value: key.clone(),
                    source: ApiKeySource::Explicit,
                }),
                attempts,
            };
        }
        attempts.push(SourceAttempt::failed(
            CredentialSource::Explicit,
            "no explicit credential provided",
        ));

        // Source 2: OAuth token file at the overridden path.
        match self
            .probe_oauth(
                CredentialSource::CustomTokenFile,
                self.custom_manager.as_ref(),
                "no custom token path configured",
            )
            .await
        {
            Ok(access_token) => {
                info!("credential resolved from custom token file");
                attempts.push(SourceAttempt::selected(CredentialSource::CustomTokenFile));
                return DiscoveryResult {
                    credential: Some(Credential::OAuth {
                        access_token,
                        source: OAuthSource::ExplicitPath,
                    }),
                    attempts,
                };
            }
            Err(attempt) => attempts.push(attempt),
        }

        // Source 3: OAuth token file at the platform default path.
        match self
            .probe_oauth(
                CredentialSource::DefaultTokenFile,
                self.default_manager.as_ref(),
                "no default token path on this platform",
            )
            .await
        {
            Ok(access_token) => {
                info!("credential resolved from default token file");
                attempts.push(SourceAttempt::selected(CredentialSource::DefaultTokenFile));
                return DiscoveryResult {
                    credential: Some(Credential::OAuth {
                        access_token,
                        source: OAuthSource::DefaultPath,
                    }),
                    attempts,
                };
            }
            Err(attempt) => attempts.push(attempt),
        }

        // Source 4: API key from the environment.
        if let Some(key) = &self.env_api_key {
            info!("credential resolved from environment API key");
            attempts.push(SourceAttempt::selected(CredentialSource::EnvironmentKey));
            return DiscoveryResult {
                credential: Some(Credential::ApiKey {
                    value: key.clone(),
                    source: ApiKeySource::Environment,
                }),
                attempts,
            };
        }
        attempts.push(SourceAttempt::failed(
            CredentialSource::EnvironmentKey,
            format!("{} not set", API_KEY_ENV),
        ));

        warn!("no credentials found in any source");
        DiscoveryResult {
            credential: None,
            attempts,
        }
    }

    /// The live token manager behind an OAuth source, for callers that
    /// re-delegate token access after resolution.
    pub fn manager_for(&self, source: OAuthSource) -> Option<Arc<OAuthTokenManager>> {
        match source {
            OAuthSource::ExplicitPath => self.custom_manager.clone(),
            OAuthSource::DefaultPath => self.default_manager.clone(),
        }
    }

    /// Reload token material on every OAuth manager, clearing invalid
    /// state after external credential rotation.
    pub async fn reload(&self) {
        if let Some(manager) = &self.custom_manager {
            manager.reload().await;
        }
        if let Some(manager) = &self.default_manager {
            manager.reload().await;
        }
    }

    /// Diagnostic token info from the highest-priority OAuth source that
    /// has a record. Never refreshes.
    pub async fn token_info(&self) -> Option<TokenInfo> {
        for manager in [&self.custom_manager, &self.default_manager]
            .into_iter()
            .flatten()
        {
            let info = manager.token_info().await;
            if info.available {
                return Some(info);
            }
        }
        None
    }

    async fn probe_oauth(
        &self,
        source: CredentialSource,
        manager: Option<&Arc<OAuthTokenManager>>,
        missing_reason: &str,
    ) -> std::result::Result<String, SourceAttempt> {
        let Some(manager) = manager else {
            debug!(source = %source, "OAuth source not configured");
            return Err(SourceAttempt::failed(source, missing_reason));
        };
        match manager.get_valid_access_token().await {
            Ok(token) => Ok(token),
            Err(e) => {
                debug!(source = %source, error = %e, "OAuth source unusable, falling through");
                Err(SourceAttempt::failed(source, e.to_string()))
            }
        }
    }
}

fn file_manager(
    config: &AuthConfig,
    refresher: Arc<dyn TokenRefresher>,
    path: PathBuf,
) -> Arc<OAuthTokenManager> {
    Arc::new(
        OAuthTokenManager::new(Arc::new(FileTokenStore::new(path)), refresher)
            .with_refresh_threshold(config.refresh_threshold)
            .with_refresh_timeout(config.refresh_timeout),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, Result};
    use crate::refresh::TokenResponse;
    use crate::store::MemoryTokenStore;
    use crate::types::{AuthMethod, ProbeOutcome, TokenRecord};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl CountingRefresher {
        fn succeeding() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: true,
            }
        }

        fn counter(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::TokenRefresh("invalid_grant".to_string()));
            }
            Ok(TokenResponse {
                access_token: "refreshed".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
                expires_at: None,
                scope: None,
            })
        }
    }

    fn valid_record(token: &str) -> TokenRecord {
        TokenRecord::new(token, "rtk", Utc::now().timestamp() + 3600)
    }

    fn expired_record() -> TokenRecord {
        TokenRecord::new("stale", "rtk", Utc::now().timestamp() - 10)
    }

    fn manager_over(store: MemoryTokenStore, refresher: CountingRefresher) -> Arc<OAuthTokenManager> {
        Arc::new(OAuthTokenManager::new(
            Arc::new(store),
            Arc::new(refresher),
        ))
    }

    fn empty_discovery(config: &AuthConfig) -> CredentialDiscovery {
        // Deterministic managers: both sources backed by empty stores.
        CredentialDiscovery::new(config, Arc::new(CountingRefresher::succeeding()))
            .with_custom_manager(manager_over(
                MemoryTokenStore::new(),
                CountingRefresher::succeeding(),
            ))
            .with_default_manager(manager_over(
                MemoryTokenStore::new(),
                CountingRefresher::succeeding(),
            ))
    }

    #[tokio::test]
    async fn explicit_key_wins_and_lower_sources_go_unprobed() {
        let config = AuthConfig::default().with_api_key("explicit-x");
        let refresher = CountingRefresher::succeeding();
        let calls = refresher.counter();
        let discovery = empty_discovery(&config).with_custom_manager(manager_over(
            MemoryTokenStore::with_record(valid_record("oauth-token")),
            refresher,
        ));

        let result = discovery.discover().await;
        assert_eq!(
            result.credential,
            Some(Credential::ApiKey {
                value: "explicit-x".to_string(),
                source: ApiKeySource::Explicit,
            })
        );
        // Only the winning source appears; the OAuth file was never probed.
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].source, CredentialSource::Explicit);
        assert_eq!(result.attempts[0].outcome, ProbeOutcome::Selected);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn custom_token_file_beats_default_and_env() {
        let mut config = AuthConfig::default();
        config.env_api_key = Some("env-key".to_string());

        let discovery = empty_discovery(&config)
            .with_custom_manager(manager_over(
                MemoryTokenStore::with_record(valid_record("custom-token")),
                CountingRefresher::succeeding(),
            ))
            .with_default_manager(manager_over(
                MemoryTokenStore::with_record(valid_record("default-token")),
                CountingRefresher::succeeding(),
            ));

        let result = discovery.discover().await;
        assert_eq!(
            result.credential,
            Some(Credential::OAuth {
                access_token: "custom-token".to_string(),
                source: OAuthSource::ExplicitPath,
            })
        );
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(
            result.attempts[1],
            SourceAttempt::selected(CredentialSource::CustomTokenFile)
        );
    }

    #[tokio::test]
    async fn default_token_file_beats_env_key() {
        let mut config = AuthConfig::default();
        config.env_api_key = Some("env-key".to_string());

        let discovery = empty_discovery(&config).with_default_manager(manager_over(
            MemoryTokenStore::with_record(valid_record("default-token")),
            CountingRefresher::succeeding(),
        ));

        let result = discovery.discover().await;
        assert_eq!(
            result.credential,
            Some(Credential::OAuth {
                access_token: "default-token".to_string(),
                source: OAuthSource::DefaultPath,
            })
        );
        assert_eq!(result.method(), AuthMethod::OAuth);
    }

    #[tokio::test]
    async fn empty_custom_store_falls_through_to_default() {
        let config = AuthConfig::default();
        let discovery = empty_discovery(&config).with_default_manager(manager_over(
            MemoryTokenStore::with_record(valid_record("default-token")),
            CountingRefresher::succeeding(),
        ));

        let result = discovery.discover().await;
        assert_eq!(result.selected_source(), Some(CredentialSource::DefaultTokenFile));

        let custom = &result.attempts[1];
        assert_eq!(custom.source, CredentialSource::CustomTokenFile);
        assert!(matches!(custom.outcome, ProbeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn unrefreshable_token_degrades_to_env_key() {
        // An OAuth file whose token is expired and whose refresh fails
        // must not wedge the cascade when an API key is available.
        let mut config = AuthConfig::default();
        config.env_api_key = Some("env-key".to_string());

        let failing = CountingRefresher::failing();
        let calls = failing.counter();
        let discovery = empty_discovery(&config).with_custom_manager(manager_over(
            MemoryTokenStore::with_record(expired_record()),
            failing,
        ));

        let result = discovery.discover().await;
        assert_eq!(
            result.credential,
            Some(Credential::ApiKey {
                value: "env-key".to_string(),
                source: ApiKeySource::Environment,
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let custom = &result.attempts[1];
        match &custom.outcome {
            ProbeOutcome::Failed(reason) => assert!(reason.contains("refresh failed")),
            other => panic!("expected failed probe, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn exhausted_cascade_reports_every_source() {
        let config = AuthConfig::default();
        let discovery = empty_discovery(&config);

        let result = discovery.discover().await;
        assert!(result.credential.is_none());
        assert_eq!(result.method(), AuthMethod::None);
        assert_eq!(result.attempts.len(), 4);
        for attempt in &result.attempts {
            assert!(matches!(attempt.outcome, ProbeOutcome::Failed(_)));
        }

        let err = result.require().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("explicit"));
        assert!(msg.contains(API_KEY_ENV));
    }

    #[tokio::test]
    async fn discovery_is_idempotent() {
        let mut config = AuthConfig::default();
        config.env_api_key = Some("env-key".to_string());
        let discovery = empty_discovery(&config);

        let first = discovery.discover().await;
        let second = discovery.discover().await;
        assert_eq!(first.credential, second.credential);
        assert_eq!(first.attempts, second.attempts);
    }

    #[tokio::test]
    async fn manager_for_returns_the_live_oauth_manager() {
        let config = AuthConfig::default();
        let manager = manager_over(
            MemoryTokenStore::with_record(valid_record("custom-token")),
            CountingRefresher::succeeding(),
        );
        let discovery = empty_discovery(&config).with_custom_manager(manager.clone());

        let live = discovery.manager_for(OAuthSource::ExplicitPath).unwrap();
        assert!(Arc::ptr_eq(&live, &manager));
    }

    #[tokio::test]
    async fn token_info_prefers_the_custom_source() {
        let config = AuthConfig::default();
        let discovery = empty_discovery(&config)
            .with_custom_manager(manager_over(
                MemoryTokenStore::with_record(valid_record("custom-token")),
                CountingRefresher::succeeding(),
            ))
            .with_default_manager(manager_over(
                MemoryTokenStore::with_record(expired_record()),
                CountingRefresher::succeeding(),
            ));

        let info = discovery.token_info().await.unwrap();
        assert!(info.is_valid);
    }
}
