//! Locally-signed session tokens.
//!
//! A session is a compact JWS carrying `sub`, `iss`, `aud`, `iat` and `exp`,
//! signed with the filter's private key. Verification checks the signature
//! first, then issuer, audience and expiry. A token whose `exp` equals the
//! current second is already expired.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Header, Validation};
use serde::{Deserialize, Serialize};

use super::keys::SigningKeys;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::{Error, Result};

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Authenticated subject
    pub sub: String,
    /// Session issuer
    pub iss: String,
    /// Session audience
    pub aud: String,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiry (Unix seconds)
    pub exp: u64,
}

/// A freshly minted session
#[derive(Debug, Clone)]
pub struct Session {
    /// Signed token, stored in the session cookie
    pub token: String,
    /// Claims inside `token`
    pub claims: SessionClaims,
}

impl Session {
    /// Seconds until expiry, relative to `now`
    #[must_use]
    pub fn remaining(&self, now: u64) -> u64 {
        self.claims.exp.saturating_sub(now)
    }
}

/// Mints and verifies session tokens
#[derive(Debug, Clone)]
pub struct SessionCodec {
    keys: Arc<SigningKeys>,
    issuer: String,
    audience: String,
    lifetime: Duration,
}

impl SessionCodec {
    /// Create a codec with explicit issuer, audience and lifetime
    #[must_use]
    pub fn new(keys: Arc<SigningKeys>, issuer: String, audience: String, lifetime: Duration) -> Self {
        Self {
            keys,
            issuer,
            audience,
            lifetime,
        }
    }

    /// Create a codec from the `session` config section (namespaced issuer and audience)
    #[must_use]
    pub fn from_config(keys: Arc<SigningKeys>, config: &SessionConfig) -> Self {
        Self::new(
            keys,
            config.effective_issuer(),
            config.effective_audience(),
            config.lifetime,
        )
    }

    /// Session issuer
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Session audience
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Certificate PEM external verifiers use to check sessions
    #[must_use]
    pub fn certificate_pem(&self) -> &str {
        self.keys.certificate_pem()
    }

    /// Mint a session for `subject`, expiring no later than `not_after`
    pub fn mint(&self, subject: &str, not_after: Option<u64>) -> Result<Session> {
        self.mint_at(subject, unix_now(), not_after)
    }

    /// Mint a session as of `now` (Unix seconds)
    ///
    /// The expiry is `now + lifetime`, capped at `not_after` (normally the ID
    /// token's own expiry).
    ///
    /// # Errors
    ///
    /// Returns `Error::IdTokenInvalid` if the cap is not in the future, and
    /// `Error::Internal` if signing fails.
    pub fn mint_at(&self, subject: &str, now: u64, not_after: Option<u64>) -> Result<Session> {
        let mut exp = now.saturating_add(self.lifetime.as_secs());
        if let Some(cap) = not_after {
            exp = exp.min(cap);
        }
        if exp <= now {
            return Err(Error::IdTokenInvalid(
                "token expires before a session could be issued".to_string(),
            ));
        }

        let claims = SessionClaims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp,
        };
        let header = Header::new(self.keys.algorithm());
        let token = jsonwebtoken::encode(&header, &claims, self.keys.encoding_key())
            .map_err(|e| Error::Internal(format!("Failed to sign session: {e}")))?;

        Ok(Session { token, claims })
    }

    /// Verify a session token against the current time
    pub fn verify(&self, token: &str) -> std::result::Result<SessionClaims, SessionError> {
        self.verify_at(token, unix_now())
    }

    /// Verify a session token as of `now` (Unix seconds)
    ///
    /// # Errors
    ///
    /// Returns the first failing check: signature, issuer, audience, expiry.
    pub fn verify_at(
        &self,
        token: &str,
        now: u64,
    ) -> std::result::Result<SessionClaims, SessionError> {
        // Claim checks run below in a fixed order, after the signature
        let mut validation = Validation::new(self.keys.algorithm());
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let claims = jsonwebtoken::decode::<SessionClaims>(token, self.keys.decoding_key(), &validation)
            .map_err(|e| classify(&e))?
            .claims;

        if claims.iss != self.issuer {
            return Err(SessionError::IssuerMismatch);
        }
        if claims.aud != self.audience {
            return Err(SessionError::AudienceMismatch);
        }
        if claims.exp <= now {
            return Err(SessionError::Expired);
        }
        Ok(claims)
    }

    /// Mint and verify a throwaway session to prove the key and certificate match
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the certificate does not verify the key's signatures.
    pub fn self_check(&self) -> Result<()> {
        let now = unix_now();
        let probe = self.mint_at("startup-probe", now, None)?;
        self.verify_at(&probe.token, now).map_err(|e| {
            Error::Config(format!(
                "session private key does not match certificate: {e}"
            ))
        })?;
        Ok(())
    }
}

fn classify(error: &jsonwebtoken::errors::Error) -> SessionError {
    match error.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidKeyFormat => SessionError::BadSignature,
        _ => SessionError::Malformed,
    }
}

/// Current Unix time in seconds
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
