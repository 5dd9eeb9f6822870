//! ID token validation.
//!
//! # Checks, in order
//!
//! 1. The header names an asymmetric algorithm and a key in the provider's
//!    JWKS (an unknown `kid` triggers one rate-limited JWKS refresh).
//! 2. Signature and `exp`, with 60 seconds of clock leeway.
//! 3. `iss` equals the issuer in the discovery document.
//! 4. `aud` (string or array) contains our `client_id`.
//! 5. `nonce`, if present, equals the flow nonce. A missing `nonce` is only
//!    rejected when strict nonce checking is configured.
//! 6. The configured subject claim is present and a string.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header, Validation};
use serde_json::{Map, Value};
use tracing::debug;

use super::metadata::ProviderMetadata;
use super::state::nonce_matches;
use crate::{Error, Result};

/// Clock skew tolerated on `exp`
const LEEWAY_SECS: u64 = 60;

/// Identity extracted from a validated ID token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdToken {
    /// Value of the configured subject claim
    pub subject: String,
    /// Token expiry (Unix seconds)
    pub exp: u64,
}

/// Validates ID tokens returned by the token endpoint
pub struct IdTokenValidator {
    metadata: Arc<ProviderMetadata>,
    client_id: String,
    subject_claim: String,
    require_nonce: bool,
}

impl IdTokenValidator {
    /// Create a validator for one relying-party client
    #[must_use]
    pub fn new(
        metadata: Arc<ProviderMetadata>,
        client_id: String,
        subject_claim: String,
        require_nonce: bool,
    ) -> Self {
        Self {
            metadata,
            client_id,
            subject_claim,
            require_nonce,
        }
    }

    /// Validate `token` for the flow that issued `expected_nonce`
    ///
    /// # Errors
    ///
    /// Returns `Error::IdTokenInvalid` for any failed check, and
    /// `Error::ProviderUnavailable` if the provider's keys cannot be loaded.
    pub async fn validate(&self, token: &str, expected_nonce: &str) -> Result<VerifiedIdToken> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| invalid(format!("bad header: {e}")))?;
        let validation = build_validation(&header)?;

        let key = self
            .metadata
            .key_for(header.kid.as_deref())
            .await?
            .ok_or_else(|| invalid(format!("unknown signing key {:?}", header.kid)))?;

        let claims = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)
            .map_err(|e| invalid(e.to_string()))?
            .claims;

        let metadata = self.metadata.get().await?;
        let issuer = &metadata.document.issuer;
        match claims.get("iss").and_then(Value::as_str) {
            Some(iss) if iss == issuer => {}
            other => {
                return Err(invalid(format!(
                    "issuer mismatch: expected {issuer}, got {other:?}"
                )));
            }
        }

        check_audience(claims.get("aud").unwrap_or(&Value::Null), &self.client_id)?;

        match claims.get("nonce").and_then(Value::as_str) {
            Some(nonce) if !nonce_matches(expected_nonce, nonce) => {
                return Err(invalid("nonce mismatch".to_string()));
            }
            Some(_) => {}
            None if self.require_nonce => return Err(invalid("nonce claim missing".to_string())),
            None => debug!("ID token carries no nonce claim"),
        }

        let subject = claims
            .get(&self.subject_claim)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                invalid(format!(
                    "subject claim '{}' missing or not a string",
                    self.subject_claim
                ))
            })?
            .to_string();

        let exp = claims
            .get("exp")
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid("exp claim missing".to_string()))?;

        Ok(VerifiedIdToken { subject, exp })
    }
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Result<Validation> {
    let alg = match header.alg {
        alg @ (Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512
        | Algorithm::ES256
        | Algorithm::ES384) => alg,
        other => return Err(invalid(format!("unsupported algorithm {other:?}"))),
    };

    let mut v = Validation::new(alg);
    v.leeway = LEEWAY_SECS;
    // iss and aud are checked by hand against the live discovery document
    v.validate_aud = false;
    v.set_required_spec_claims(&["exp"]);
    Ok(v)
}

/// Validate that the token's `aud` claim contains `client_id`.
fn check_audience(aud_claim: &Value, client_id: &str) -> Result<()> {
    let matches = match aud_claim {
        Value::String(s) => s == client_id,
        Value::Array(arr) => arr.iter().any(|v| v.as_str() == Some(client_id)),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(invalid(format!("audience does not contain {client_id}")))
    }
}

fn invalid(detail: String) -> Error {
    Error::IdTokenInvalid(detail)
}
