//! Error types for the OIDC filter

use std::io;

use thiserror::Error;

/// Result type alias for the OIDC filter
pub type Result<T> = std::result::Result<T, Error>;

/// OIDC filter errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dynamic client registration failed (fatal at startup)
    #[error("Client registration failed: {0}")]
    RegistrationFailed(String),

    /// Provider discovery document or key set could not be obtained
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The callback `state` was forged, expired, or not bound to this browser
    #[error("State mismatch: {0}")]
    StateMismatch(String),

    /// Authorization code could not be exchanged for tokens
    #[error("Code exchange failed: {0}")]
    CodeExchangeFailed(String),

    /// The provider's ID token failed validation
    #[error("ID token invalid: {0}")]
    IdTokenInvalid(String),

    /// The local session token failed verification
    #[error("Session invalid: {0}")]
    Session(#[from] SessionError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a session token is rejected.
///
/// All of them collapse to "no valid session" at the decision boundary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// `exp` is at or before the current time
    #[error("session expired")]
    Expired,
    /// Signature does not verify against the session certificate
    #[error("bad signature")]
    BadSignature,
    /// `iss` is not the configured session issuer
    #[error("issuer mismatch")]
    IssuerMismatch,
    /// `aud` does not contain the configured session audience
    #[error("audience mismatch")]
    AudienceMismatch,
    /// Not a decodable token
    #[error("malformed token")]
    Malformed,
}

impl SessionError {
    /// Stable reason code for logs
    #[must_use]
    pub fn reason_code(self) -> &'static str {
        match self {
            Self::Expired => "session_expired",
            Self::BadSignature => "session_bad_signature",
            Self::IssuerMismatch => "session_issuer_mismatch",
            Self::AudienceMismatch => "session_audience_mismatch",
            Self::Malformed => "session_malformed",
        }
    }
}

impl Error {
    /// Generic reason code exposed to the proxy and browser
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_invalid",
            Self::RegistrationFailed(_) => "registration_failed",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::StateMismatch(_) => "state_mismatch",
            Self::CodeExchangeFailed(_) => "code_exchange_failed",
            Self::IdTokenInvalid(_) => "id_token_invalid",
            Self::Session(e) => e.reason_code(),
            Self::Io(_) | Self::Json(_) | Self::Http(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status used when this error terminates a callback or logout request
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::StateMismatch(_) => 400,
            Self::IdTokenInvalid(_) | Self::Session(_) => 401,
            Self::ProviderUnavailable(_) | Self::CodeExchangeFailed(_) | Self::Http(_) => 502,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_keep_their_kind_in_the_reason_code() {
        let err = Error::from(SessionError::Expired);
        assert_eq!(err.reason_code(), "session_expired");
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn reason_codes_carry_no_detail() {
        let err = Error::CodeExchangeFailed("HTTP 400 - invalid_grant: code reused".to_string());
        assert_eq!(err.reason_code(), "code_exchange_failed");
        assert!(!err.reason_code().contains("invalid_grant"));
    }

    #[test]
    fn callback_statuses() {
        assert_eq!(Error::StateMismatch(String::new()).http_status(), 400);
        assert_eq!(Error::IdTokenInvalid(String::new()).http_status(), 401);
        assert_eq!(Error::ProviderUnavailable(String::new()).http_status(), 502);
        assert_eq!(Error::Internal(String::new()).http_status(), 500);
    }
}
