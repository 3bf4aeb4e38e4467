use thiserror::Error;

use crate::types::SourceAttempt;

/// Errors produced by credential resolution and token lifecycle management.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token storage read or write failure.
    ///
    /// Load failures are softened to "no record found" inside the token
    /// manager; save failures always surface, since they mean a freshly
    /// refreshed token was not persisted.
    #[error("token storage error: {0}")]
    Storage(String),

    /// The refresh call failed, timed out, or returned an unusable payload.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// No valid credential could be produced by the manager.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Every discovery source was exhausted.
    #[error("no credentials found; {}", describe_attempts(.attempts))]
    NoCredentials { attempts: Vec<SourceAttempt> },

    /// Token material failed schema validation.
    #[error("invalid token record: {0}")]
    InvalidRecord(String),
}

fn describe_attempts(attempts: &[SourceAttempt]) -> String {
    if attempts.is_empty() {
        return "no sources were probed".to_string();
    }
    let parts: Vec<String> = attempts.iter().map(|a| a.to_string()).collect();
    format!("sources tried: {}", parts.join("; "))
}

pub type Result<T> = std::result::Result<T, AuthError>;
