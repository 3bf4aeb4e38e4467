//! Token refresh transport.
//!
//! [`TokenRefresher`] is the seam between the token manager and the OAuth
//! token endpoint: one `POST` with `grant_type=refresh_token` that either
//! returns new token material or fails. Retry and backoff belong to
//! callers wrapping [`crate::OAuthTokenManager::get_valid_access_token`],
//! not here.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AuthError, Result};
use crate::types::TokenRecord;

/// Token endpoint configuration for [`HttpRefresher`].
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// The OAuth token endpoint URL.
    pub token_url: String,
    /// Client identifier, if the endpoint requires one.
    pub client_id: Option<String>,
    /// Client secret for confidential clients.
    pub client_secret: Option<String>,
}

impl RefreshConfig {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: None,
            client_secret: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }
}

/// Successful payload from the token endpoint.
///
/// Servers report expiry either as relative `expires_in` seconds or as an
/// absolute `expires_at` timestamp; [`TokenResponse::absolute_expiry`]
/// normalizes to absolute at receipt. A missing `refresh_token` means the
/// server reuses the current one.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Relative lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Absolute expiry, unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Space-delimited scope list.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry in unix seconds, anchoring `expires_in` to the
    /// current wall clock when the server reported a relative lifetime.
    pub fn absolute_expiry(&self) -> Result<i64> {
        if let Some(at) = self.expires_at {
            return Ok(at);
        }
        if let Some(expires_in) = self.expires_in {
            return Ok(Utc::now().timestamp() + expires_in);
        }
        Err(AuthError::TokenRefresh(
            "token response carries neither expires_at nor expires_in".to_string(),
        ))
    }

    /// Fold this response into a new durable record, keeping `previous`
    /// material where the server omitted it.
    pub fn into_record(self, previous: &TokenRecord) -> Result<TokenRecord> {
        let expires_at = self.absolute_expiry()?;
        let scope = match self.scope {
            Some(s) => Some(s.split_whitespace().map(str::to_string).collect()),
            None => previous.scope.clone(),
        };
        Ok(TokenRecord {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .unwrap_or_else(|| previous.refresh_token.clone()),
            expires_at,
            scope,
        })
    }
}

/// Transport contract for the refresh call.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for new token material.
    ///
    /// # Errors
    ///
    /// `TokenRefresh` on network failure, non-2xx status, or a malformed
    /// body.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse>;
}

/// `reqwest`-backed refresher.
///
/// Performs `POST <token_url>` with a form body of
/// `grant_type=refresh_token`, `refresh_token=<current>` and the
/// configured client credentials. The overall deadline is applied by the
/// token manager, not here.
pub struct HttpRefresher {
    config: RefreshConfig,
    client: reqwest::Client,
}

impl HttpRefresher {
    pub fn new(config: RefreshConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured client (proxies, TLS pinning).
    pub fn with_client(config: RefreshConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(client_id) = &self.config.client_id {
            params.push(("client_id", client_id));
        }
        if let Some(client_secret) = &self.config.client_secret {
            params.push(("client_secret", client_secret));
        }

        debug!(token_url = %self.config.token_url, "refreshing access token");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenRefresh(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            warn!(status = status.as_u16(), error = %body, "token endpoint rejected refresh");
            return Err(AuthError::TokenRefresh(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::TokenRefresh(format!("malformed token response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn previous() -> TokenRecord {
        TokenRecord {
            access_token: "old-access".to_string(),
            refresh_token: "old-refresh".to_string(),
            expires_at: 100,
            scope: Some(vec!["inference".to_string()]),
        }
    }

    #[test]
    fn absolute_expiry_prefers_expires_at() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            expires_at: Some(42),
            scope: None,
        };
        assert_eq!(response.absolute_expiry().unwrap(), 42);
    }

    #[test]
    fn absolute_expiry_anchors_expires_in() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            expires_at: None,
            scope: None,
        };
        let now = Utc::now().timestamp();
        let expiry = response.absolute_expiry().unwrap();
        assert!(expiry >= now + 3595 && expiry <= now + 3605);
    }

    #[test]
    fn missing_expiry_is_a_refresh_failure() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: None,
            expires_at: None,
            scope: None,
        };
        assert!(matches!(
            response.absolute_expiry().unwrap_err(),
            AuthError::TokenRefresh(_)
        ));
    }

    #[test]
    fn into_record_keeps_old_refresh_token_when_omitted() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_in: None,
            expires_at: Some(2_000_000_000),
            scope: None,
        };
        let record = response.into_record(&previous()).unwrap();
        assert_eq!(record.access_token, "new-access");
        assert_eq!(record.refresh_token, "old-refresh");
        assert_eq!(record.scope, Some(vec!["inference".to_string()]));
    }

    #[test]
    fn into_record_takes_rotated_refresh_token() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: Some("new-refresh".to_string()),
            expires_in: None,
            expires_at: Some(2_000_000_000),
            scope: Some("inference profile".to_string()),
        };
        let record = response.into_record(&previous()).unwrap();
        assert_eq!(record.refresh_token, "new-refresh");
        assert_eq!(
            record.scope,
            Some(vec!["inference".to_string(), "profile".to_string()])
        );
    }

    #[test]
    fn response_parses_minimal_payload() {
        let json = r#"{"access_token":"a","expires_in":3600}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "a");
        assert!(response.refresh_token.is_none());
        assert_eq!(response.expires_in, Some(3600));
    }
}
