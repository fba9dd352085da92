//! Error types for Ldapsync

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Message shown to end users for every login failure
pub const GENERIC_LOGIN_FAILURE: &str = "Invalid username or password";

#[derive(Error, Debug)]
pub enum Error {
    // Transport Errors
    #[error("Directory connection failed: {0}")]
    Connection(String),

    // Authentication Errors
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Directory authentication is disabled")]
    AuthDisabled,

    #[error("Directory account is disabled")]
    AccountDisabled,

    #[error("Directory account is not provisioned locally")]
    AccountNotProvisioned,

    // Resolution Errors
    #[error("No directory entry matches the supplied username")]
    NotFound,

    #[error("Username matches {count} directory entries")]
    Ambiguous { count: usize },

    // Directory Operation Errors
    #[error("Directory search failed: {0}")]
    Search(String),

    #[error("Directory synchronization failed: {0}")]
    Sync(String),

    // Configuration Errors
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("No directory configuration is active")]
    NotConfigured,

    // Local Store Errors
    #[error("Identity conflict: {0}")]
    Conflict(String),

    #[error("Directory user not found: {0}")]
    UserNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Connection(_) => "ConnectionError",
            Error::InvalidCredentials => "InvalidCredentials",
            Error::AuthDisabled => "AuthDisabled",
            Error::AccountDisabled => "AccountDisabled",
            Error::AccountNotProvisioned => "AccountNotProvisioned",
            Error::NotFound => "NotFound",
            Error::Ambiguous { .. } => "Ambiguous",
            Error::Search(_) => "SearchError",
            Error::Sync(_) => "SyncError",
            Error::Validation(_) => "ValidationError",
            Error::NotConfigured => "NotConfigured",
            Error::Conflict(_) => "ConflictError",
            Error::UserNotFound(_) => "NotFound",
            Error::Database(_) => "InternalError",
            Error::Internal(_) => "InternalError",
            Error::Io(_) => "InternalError",
            Error::Other(_) => "InternalError",
        }
    }

    /// Failures that must look identical to a login caller.
    ///
    /// Collapsing these prevents account enumeration: a missing entry, an
    /// ambiguous match and a wrong password are indistinguishable outside
    /// the engine.
    pub fn is_login_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidCredentials
                | Error::NotFound
                | Error::Ambiguous { .. }
                | Error::AccountDisabled
                | Error::AccountNotProvisioned
        )
    }

    /// Text safe to return to an unauthenticated caller
    pub fn public_message(&self) -> String {
        if self.is_login_failure() {
            GENERIC_LOGIN_FAILURE.to_string()
        } else {
            match self {
                Error::AuthDisabled => "Directory login is not available".to_string(),
                Error::Conflict(_) => {
                    "This account conflicts with an existing user".to_string()
                }
                Error::Connection(_) | Error::Search(_) => {
                    "Directory service is unavailable".to_string()
                }
                _ => "Internal error".to_string(),
            }
        }
    }

    /// Whether a retry on a fresh connection may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_failures_share_public_message() {
        let failures = [
            Error::InvalidCredentials,
            Error::NotFound,
            Error::Ambiguous { count: 2 },
            Error::AccountDisabled,
        ];

        for err in &failures {
            assert!(err.is_login_failure());
            assert_eq!(err.public_message(), GENERIC_LOGIN_FAILURE);
        }
    }

    #[test]
    fn test_admin_errors_keep_specific_code() {
        assert_eq!(Error::Connection("refused".into()).code(), "ConnectionError");
        assert_eq!(Error::Sync("bind".into()).code(), "SyncError");
        assert_eq!(Error::Validation("x".into()).code(), "ValidationError");
        assert!(!Error::AuthDisabled.is_login_failure());
    }
}
