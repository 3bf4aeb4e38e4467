//! Unified authentication façade.
//!
//! [`UnifiedAuthManager`] is the one object application code holds. It
//! runs the discovery cascade once, caches the resolution, and
//! re-delegates every OAuth credential access through the live
//! [`OAuthTokenManager`] so refresh keeps working for long-lived holders.
//!
//! ```no_run
//! use std::sync::Arc;
//! use authflow::{AuthConfig, HttpRefresher, RefreshConfig, UnifiedAuthManager};
//!
//! # async fn example() -> authflow::Result<()> {
//! let config = AuthConfig::from_env();
//! let refresher = Arc::new(HttpRefresher::new(RefreshConfig::new(
//!     "https://auth.example.com/oauth/token",
//! )));
//! let auth = UnifiedAuthManager::new(&config, refresher);
//!
//! let credential = auth.credential().await?;
//! println!("authenticated via {}", credential.method());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::config::AuthConfig;
use crate::discovery::CredentialDiscovery;
use crate::error::Result;
use crate::refresh::TokenRefresher;
use crate::token_manager::OAuthTokenManager;
use crate::types::{
    AuthMethod, Credential, CredentialSource, DiscoveryResult, SourceAttempt, TokenInfo,
};

/// Diagnostic report over every credential source.
///
/// Produced by [`UnifiedAuthManager::status`]; the `Display` impl renders
/// a human-readable summary for CLIs and logs.
#[derive(Debug, Clone)]
pub struct AuthStatus {
    /// The method a fresh discovery run resolved to.
    pub method: AuthMethod,
    /// The winning source, if any.
    pub selected_source: Option<CredentialSource>,
    /// Every source probed, in cascade order, with its outcome.
    pub attempts: Vec<SourceAttempt>,
    /// Token diagnostics from the highest-priority OAuth source holding a
    /// record.
    pub oauth: Option<TokenInfo>,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.method == AuthMethod::None {
            "no credentials found"
        } else {
            "valid"
        };
        writeln!(f, "authentication: {}", verdict)?;
        writeln!(f, "method: {}", self.method)?;
        match &self.selected_source {
            Some(source) => writeln!(f, "source: {}", source)?,
            None => writeln!(f, "source: n/a")?,
        }
        write!(f, "sources probed:")?;
        for attempt in &self.attempts {
            write!(f, "\n  - {}", attempt)?;
        }
        if let Some(info) = &self.oauth {
            write!(
                f,
                "\noauth token: valid={} expires_at={}",
                info.is_valid,
                info.expires_at
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            )?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct Resolution {
    credential: Credential,
    manager: Option<Arc<OAuthTokenManager>>,
}

/// Combines discovery and refresh behind one handle.
///
/// Discovery runs once and is cached; OAuth-sourced credentials are
/// re-fetched from the live token manager on every
/// [`credential`](Self::credential) call, so holders automatically see
/// refreshed tokens without re-running discovery. After a hard downstream
/// authentication failure (e.g. HTTP 401),
/// [`invalidate_and_rediscover`](Self::invalidate_and_rediscover) re-probes
/// the sources in case credentials were rotated externally.
pub struct UnifiedAuthManager {
    discovery: CredentialDiscovery,
    resolved: RwLock<Option<Resolution>>,
}

impl UnifiedAuthManager {
    pub fn new(config: &AuthConfig, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_discovery(CredentialDiscovery::new(config, refresher))
    }

    /// Wrap a preconfigured discovery cascade (testing, alternate stores).
    pub fn with_discovery(discovery: CredentialDiscovery) -> Self {
        Self {
            discovery,
            resolved: RwLock::new(None),
        }
    }

    /// Whether any source can currently produce a credential.
    pub async fn has_credential(&self) -> bool {
        self.resolve().await.is_ok()
    }

    /// The resolved authentication method, [`AuthMethod::None`] when the
    /// cascade is exhausted.
    pub async fn auth_method(&self) -> AuthMethod {
        match self.resolve().await {
            Ok(resolution) => resolution.credential.method(),
            Err(_) => AuthMethod::None,
        }
    }

    /// The current credential.
    ///
    /// API-key resolutions return the same value every call. OAuth
    /// resolutions re-invoke the live token manager each call, which
    /// transparently refreshes near expiry; once that manager turns
    /// invalid this fails without re-running discovery; call
    /// [`invalidate_and_rediscover`](Self::invalidate_and_rediscover) to
    /// re-attempt the cascade.
    ///
    /// # Errors
    ///
    /// [`crate::AuthError::NoCredentials`] when no source produced a
    /// credential; refresh and storage errors from the live token manager
    /// for OAuth resolutions.
    #[instrument(skip(self))]
    pub async fn credential(&self) -> Result<Credential> {
        let resolution = self.resolve().await?;
        match (&resolution.credential, &resolution.manager) {
            (Credential::OAuth { source, .. }, Some(manager)) => {
                let access_token = manager.get_valid_access_token().await?;
                Ok(Credential::OAuth {
                    access_token,
                    source: *source,
                })
            }
            _ => Ok(resolution.credential),
        }
    }

    /// Drop the cached resolution, reload token material, and re-run the
    /// cascade.
    #[instrument(skip(self))]
    pub async fn invalidate_and_rediscover(&self) -> DiscoveryResult {
        info!("invalidating cached credential resolution");
        let mut guard = self.resolved.write().await;
        *guard = None;
        self.discovery.reload().await;

        let result = self.discovery.discover().await;
        if let Some(credential) = &result.credential {
            *guard = Some(self.resolution_for(credential.clone()));
        }
        result
    }

    /// Diagnostic report: a fresh probe of every source plus OAuth token
    /// info. Does not touch the cached resolution.
    pub async fn status(&self) -> AuthStatus {
        let result = self.discovery.discover().await;
        let oauth = self.discovery.token_info().await;
        AuthStatus {
            method: result.method(),
            selected_source: result.selected_source(),
            attempts: result.attempts,
            oauth,
        }
    }

    async fn resolve(&self) -> Result<Resolution> {
        {
            let guard = self.resolved.read().await;
            if let Some(resolution) = guard.as_ref() {
                return Ok(resolution.clone());
            }
        }

        let mut guard = self.resolved.write().await;
        // Another caller may have resolved while we waited for the lock.
        if let Some(resolution) = guard.as_ref() {
            return Ok(resolution.clone());
        }

        let credential = self.discovery.discover().await.require()?;
        info!(source = %credential.source(), "credential resolved");
        let resolution = self.resolution_for(credential);
        *guard = Some(resolution.clone());
        Ok(resolution)
    }

    fn resolution_for(&self, credential: Credential) -> Resolution {
        let manager = match &credential {
            Credential::OAuth { source, .. } => self.discovery.manager_for(*source),
            Credential::ApiKey { .. } => None,
        };
        Resolution {
            credential,
            manager,
        }
    }
}
