//! # authflow
//!
//! Credential resolution and token-lifecycle management for
//! bearer-token-authenticated HTTP APIs.
//!
//! ## Overview
//!
//! Given an ambient environment (token files, environment variables,
//! explicit parameters), `authflow` deterministically resolves which
//! credential to use and, when the winner is a refreshable OAuth token,
//! keeps it valid for the lifetime of the process: expiry-aware automatic
//! refresh, thread-safe caching, persistence before visibility, and
//! graceful fallback to lower-priority sources when OAuth breaks.
//!
//! ## Features
//!
//! - Ordered discovery cascade (explicit key, custom token file, default
//!   token file, environment key) with first-success-wins semantics
//! - Pre-emptive token refresh with a configurable threshold
//! - At most one refresh in flight per manager, no thundering herd
//! - Crash-safe persistence: tokens are saved before they are served
//! - Pluggable storage ([`TokenStore`]) and transport ([`TokenRefresher`])
//!
//! ## Usage
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
//! if auth.has_credential().await {
//!     let credential = auth.credential().await?;
//!     // Present credential.bearer() to the wrapped API.
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod refresh;
pub mod store;
pub mod token_manager;
pub mod types;

pub use config::{AuthConfig, API_KEY_ENV, CREDENTIALS_PATH_ENV};
pub use discovery::CredentialDiscovery;
pub use error::{AuthError, Result};
pub use manager::{AuthStatus, UnifiedAuthManager};
pub use refresh::{HttpRefresher, RefreshConfig, TokenRefresher, TokenResponse};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token_manager::OAuthTokenManager;
pub use types::{
    ApiKeySource, AuthMethod, Credential, CredentialSource, DiscoveryResult, OAuthSource,
    ProbeOutcome, SourceAttempt, TokenInfo, TokenRecord,
};
