use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Where an API key credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiKeySource {
    /// Passed explicitly at construction time.
    Explicit,
    /// Read from the designated environment variable.
    Environment,
}

/// Where an OAuth credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OAuthSource {
    /// Token file at a caller- or environment-overridden path.
    ExplicitPath,
    /// Token file at the platform default path.
    DefaultPath,
}

/// The authentication method a resolution produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthMethod {
    /// A refreshable OAuth access token.
    OAuth,
    /// A static API key.
    ApiKey,
    /// No credential available.
    #[default]
    None,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::OAuth => "oauth",
            AuthMethod::ApiKey => "api_key",
            AuthMethod::None => "none",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved credential.
///
/// A `Credential` is a snapshot: once returned to a caller it never mutates.
/// A new resolution call is required to observe refreshed OAuth material.
///
/// The `Debug` implementation redacts token material.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// A static API key.
    ApiKey { value: String, source: ApiKeySource },
    /// An OAuth access token.
    OAuth {
        access_token: String,
        source: OAuthSource,
    },
}

impl Credential {
    /// The bearer string to present to the wrapped API.
    pub fn bearer(&self) -> &str {
        match self {
            Credential::ApiKey { value, .. } => value,
            Credential::OAuth { access_token, .. } => access_token,
        }
    }

    /// The authentication method this credential belongs to.
    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::ApiKey { .. } => AuthMethod::ApiKey,
            Credential::OAuth { .. } => AuthMethod::OAuth,
        }
    }

    /// The discovery source that produced this credential.
    pub fn source(&self) -> CredentialSource {
        match self {
            Credential::ApiKey {
                source: ApiKeySource::Explicit,
                ..
            } => CredentialSource::Explicit,
            Credential::ApiKey {
                source: ApiKeySource::Environment,
                ..
            } => CredentialSource::EnvironmentKey,
            Credential::OAuth {
                source: OAuthSource::ExplicitPath,
                ..
            } => CredentialSource::CustomTokenFile,
            Credential::OAuth {
                source: OAuthSource::DefaultPath,
                ..
            } => CredentialSource::DefaultTokenFile,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey { source, .. } => f
                .debug_struct("ApiKey")
                .field("value", &"[REDACTED]")
                .field("source", source)
                .finish(),
            Credential::OAuth { source, .. } => f
                .debug_struct("OAuth")
                .field("access_token", &"[REDACTED]")
                .field("source", source)
                .finish(),
        }
    }
}

/// The ordered credential sources the discovery cascade probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialSource {
    /// Explicit API key passed at construction.
    Explicit,
    /// OAuth token file at an overridden path.
    CustomTokenFile,
    /// OAuth token file at the platform default path.
    DefaultTokenFile,
    /// API key from the designated environment variable.
    EnvironmentKey,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Explicit => "explicit",
            CredentialSource::CustomTokenFile => "custom_token_file",
            CredentialSource::DefaultTokenFile => "default_token_file",
            CredentialSource::EnvironmentKey => "environment_key",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of probing a single discovery source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The source produced the winning credential.
    Selected,
    /// The source was probed and did not produce a credential.
    Failed(String),
}

/// One entry in the record of sources a discovery run probed.
///
/// Sources below the winning one are never probed and carry no entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttempt {
    pub source: CredentialSource,
    pub outcome: ProbeOutcome,
}

impl SourceAttempt {
    pub fn selected(source: CredentialSource) -> Self {
        Self {
            source,
            outcome: ProbeOutcome::Selected,
        }
    }

    pub fn failed(source: CredentialSource, reason: impl Into<String>) -> Self {
        Self {
            source,
            outcome: ProbeOutcome::Failed(reason.into()),
        }
    }
}

impl fmt::Display for SourceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            ProbeOutcome::Selected => write!(f, "{} (selected)", self.source),
            ProbeOutcome::Failed(reason) => write!(f, "{} ({})", self.source, reason),
        }
    }
}

/// The product of one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    /// The winning credential, if any source produced one.
    pub credential: Option<Credential>,
    /// Every source probed, in cascade order, with its outcome.
    pub attempts: Vec<SourceAttempt>,
}

impl DiscoveryResult {
    /// The method of the winning credential, or [`AuthMethod::None`].
    pub fn method(&self) -> AuthMethod {
        self.credential
            .as_ref()
            .map(Credential::method)
            .unwrap_or_default()
    }

    /// The source that won, if any.
    pub fn selected_source(&self) -> Option<CredentialSource> {
        self.credential.as_ref().map(Credential::source)
    }

    /// Convert into a credential, or a `NoCredentials` error carrying the
    /// per-source failure reasons.
    pub fn require(self) -> crate::error::Result<Credential> {
        match self.credential {
            Some(credential) => Ok(credential),
            None => Err(crate::error::AuthError::NoCredentials {
                attempts: self.attempts,
            }),
        }
    }
}

/// The durable OAuth token state.
///
/// Persisted as JSON with the fixed schema
/// `{access_token, refresh_token, expires_at, scope?}` where `expires_at`
/// is absolute unix seconds. Absolute time avoids clock-drift ambiguity
/// across refresh calls.
///
/// The `Debug` implementation redacts token material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry, unix seconds.
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
}

impl TokenRecord {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            scope: None,
        }
    }

    /// Build a record from a relative `expires_in`, anchoring it to the
    /// current wall clock.
    pub fn from_expires_in(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: i64,
    ) -> Self {
        Self::new(
            access_token,
            refresh_token,
            Utc::now().timestamp() + expires_in,
        )
    }

    /// Whether the token is expired or will expire within `threshold`.
    ///
    /// A token long past expiry and a token expiring inside the threshold
    /// are treated identically; the distinction only matters for logging.
    pub fn is_expired_within(&self, threshold: Duration) -> bool {
        Utc::now().timestamp() >= self.expires_at - threshold.as_secs() as i64
    }

    /// Time remaining until actual expiry, or `None` if already expired.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let remaining = self.expires_at - Utc::now().timestamp();
        if remaining <= 0 {
            None
        } else {
            Some(Duration::from_secs(remaining as u64))
        }
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Diagnostic snapshot of a token manager's view of its record.
///
/// Produced by [`crate::OAuthTokenManager::token_info`]; never triggers a
/// refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    /// Whether any token record could be loaded.
    pub available: bool,
    /// Whether the record is currently inside its validity window.
    pub is_valid: bool,
    /// Absolute expiry, unix seconds.
    pub expires_at: Option<i64>,
    pub scopes: Vec<String>,
}
