//! OAuth token lifecycle.
//!
//! [`OAuthTokenManager`] owns one refreshable credential: lazy load from
//! its [`TokenStore`], expiry-aware refresh through its [`TokenRefresher`],
//! and thread-safe caching. The whole check-then-refresh sequence runs
//! under a single mutex, so at most one refresh is ever in flight per
//! manager instance no matter how many callers race on it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DEFAULT_REFRESH_THRESHOLD, DEFAULT_REFRESH_TIMEOUT};
use crate::error::{AuthError, Result};
use crate::refresh::TokenRefresher;
use crate::store::TokenStore;
use crate::types::{TokenInfo, TokenRecord};

/// Lifecycle state of the managed token.
///
/// `Loaded` covers both valid and expiring material; expiry is
/// re-evaluated against the wall clock on every access rather than
/// tracked by a background timer. `Invalid` is terminal until
/// [`OAuthTokenManager::reload`] or reconstruction.
#[derive(Debug, Clone)]
enum TokenState {
    NotLoaded,
    Loaded(TokenRecord),
    Invalid(String),
}

#[derive(Debug)]
struct ManagerState {
    state: TokenState,
    last_loaded_at: Option<i64>,
}

/// Manages one refreshable OAuth credential.
///
/// [`get_valid_access_token`](Self::get_valid_access_token) either returns
/// a token outside its refresh threshold or fails with a typed error; it
/// never returns a token known to be expired.
///
/// The manager is designed to be shared: wrap it in an [`Arc`] and call it
/// from as many tasks as needed. Callers arriving while a refresh is in
/// flight block until it completes, then observe the refreshed token.
pub struct OAuthTokenManager {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_threshold: Duration,
    refresh_timeout: Duration,
    state: Mutex<ManagerState>,
}

impl OAuthTokenManager {
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            state: Mutex::new(ManagerState {
                state: TokenState::NotLoaded,
                last_loaded_at: None,
            }),
        }
    }

    /// Margin before expiry at which a token is proactively refreshed.
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Deadline for each outbound refresh call; exceeding it counts as a
    /// refresh failure.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Return a non-expired access token, refreshing first if the cached
    /// record is inside its refresh threshold.
    ///
    /// The full sequence (read cached state, decide expired, refresh,
    /// persist, update cache) runs atomically with respect to other
    /// callers on this instance.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenRefresh`] on the attempt whose refresh fails
    ///   (network error, rejection, timeout, malformed payload).
    /// - [`AuthError::Storage`] when the refreshed record cannot be
    ///   persisted; the cache is left untouched so a later call retries.
    /// - [`AuthError::Authentication`] once the manager is invalid (no
    ///   usable record, or a previous refresh failed).
    #[instrument(skip(self))]
    pub async fn get_valid_access_token(&self) -> Result<String> {
        let mut guard = self.state.lock().await;
        let record = self.loaded_record(&mut guard).await?;

        if !record.is_expired_within(self.refresh_threshold) {
            debug!(expires_at = record.expires_at, "cached token still valid");
            return Ok(record.access_token);
        }

        info!(expires_at = record.expires_at, "token expired or expiring soon, refreshing");
        self.refresh_and_commit(&mut guard, record).await
    }

    /// Refresh immediately, bypassing the expiry check.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self) -> Result<String> {
        let mut guard = self.state.lock().await;
        let record = self.loaded_record(&mut guard).await?;
        info!("forcing token refresh");
        self.refresh_and_commit(&mut guard, record).await
    }

    /// Non-mutating peek: whether a loaded record is currently outside its
    /// refresh threshold. Never loads and never refreshes.
    pub async fn is_valid(&self) -> bool {
        let guard = self.state.lock().await;
        matches!(
            &guard.state,
            TokenState::Loaded(record) if !record.is_expired_within(self.refresh_threshold)
        )
    }

    /// Absolute expiry of the cached record, unix seconds.
    pub async fn expires_at(&self) -> Option<i64> {
        match &self.state.lock().await.state {
            TokenState::Loaded(record) => Some(record.expires_at),
            _ => None,
        }
    }

    /// When the record was last loaded from the store, unix seconds.
    pub async fn last_loaded_at(&self) -> Option<i64> {
        self.state.lock().await.last_loaded_at
    }

    /// Drop cached state and reload from the store.
    ///
    /// The only way out of the invalid state short of reconstruction;
    /// useful when credentials were rotated externally. Returns whether a
    /// usable record was loaded.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> bool {
        let mut guard = self.state.lock().await;
        guard.state = self.load_state().await;
        guard.last_loaded_at = Some(Utc::now().timestamp());
        matches!(guard.state, TokenState::Loaded(_))
    }

    /// Diagnostic snapshot. Loads lazily on first use but never refreshes.
    pub async fn token_info(&self) -> TokenInfo {
        let mut guard = self.state.lock().await;
        if matches!(guard.state, TokenState::NotLoaded) {
            guard.state = self.load_state().await;
            guard.last_loaded_at = Some(Utc::now().timestamp());
        }
        match &guard.state {
            TokenState::Loaded(record) => TokenInfo {
                available: true,
                is_valid: !record.is_expired_within(self.refresh_threshold),
                expires_at: Some(record.expires_at),
                scopes: record.scope.clone().unwrap_or_default(),
            },
            _ => TokenInfo {
                available: false,
                is_valid: false,
                expires_at: None,
                scopes: Vec::new(),
            },
        }
    }

    async fn load_state(&self) -> TokenState {
        match self.store.load().await {
            Ok(Some(record)) => {
                debug!(expires_at = record.expires_at, "loaded token record from store");
                TokenState::Loaded(record)
            }
            Ok(None) => {
                warn!("no token record found in store");
                TokenState::Invalid("no token record found in store".to_string())
            }
            // Load failures soften to "no usable record"; only save
            // failures surface as storage errors.
            Err(e) => {
                warn!(error = %e, "failed to load token record");
                TokenState::Invalid(format!("unable to load token record: {}", e))
            }
        }
    }

    async fn loaded_record(&self, guard: &mut ManagerState) -> Result<TokenRecord> {
        if matches!(guard.state, TokenState::NotLoaded) {
            guard.state = self.load_state().await;
            guard.last_loaded_at = Some(Utc::now().timestamp());
        }
        match &guard.state {
            TokenState::Loaded(record) => Ok(record.clone()),
            TokenState::Invalid(reason) => Err(AuthError::Authentication(reason.clone())),
            TokenState::NotLoaded => Err(AuthError::Authentication(
                "token material has not been loaded".to_string(),
            )),
        }
    }

    async fn refresh_and_commit(
        &self,
        guard: &mut ManagerState,
        record: TokenRecord,
    ) -> Result<String> {
        let outcome = timeout(
            self.refresh_timeout,
            self.refresher.refresh(&record.refresh_token),
        )
        .await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(error = %e, "token refresh failed");
                guard.state = TokenState::Invalid(e.to_string());
                return Err(e);
            }
            Err(_) => {
                let reason = format!("refresh timed out after {:?}", self.refresh_timeout);
                error!("token refresh timed out");
                guard.state = TokenState::Invalid(reason.clone());
                return Err(AuthError::TokenRefresh(reason));
            }
        };

        let new_record = match response.into_record(&record) {
            Ok(new_record) => new_record,
            Err(e) => {
                error!(error = %e, "token refresh returned unusable payload");
                guard.state = TokenState::Invalid(e.to_string());
                return Err(e);
            }
        };

        // Persist before updating the cache: a crash between the two steps
        // recovers the refreshed token from storage on restart.
        self.store.save(&new_record).await?;

        let token = new_record.access_token.clone();
        info!(expires_at = new_record.expires_at, "access token refreshed");
        guard.state = TokenState::Loaded(new_record);
        Ok(token)
    }
}
