//! Stateless, tamper-evident `state` parameter.
//!
//! Encoded as `base64url(json) "." base64url(hmac_sha256(json))`. The JSON
//! holds the URL the browser originally asked for, a per-flow nonce and the
//! issue time. Nothing is stored server-side.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, KeyInit, Mac};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::session::unix_now;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Decoded contents of a `state` parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    /// URL to return to after the callback
    #[serde(rename = "u")]
    pub original_url: String,
    /// Anti-forgery nonce, also sent to the provider as `nonce`
    #[serde(rename = "n")]
    pub nonce: String,
    /// Issue time (Unix seconds)
    #[serde(rename = "t")]
    pub issued_at: u64,
}

/// Seals and opens `state` values
#[derive(Clone)]
pub struct StateCodec {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl StateCodec {
    /// Create a codec; states older than `ttl` are rejected
    #[must_use]
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl,
        }
    }

    /// Issue a state for `original_url` with a fresh nonce
    pub fn issue(&self, original_url: &str) -> Result<(String, AuthorizationState)> {
        self.issue_at(original_url, unix_now())
    }

    /// Issue a state as of `now` (Unix seconds)
    pub fn issue_at(&self, original_url: &str, now: u64) -> Result<(String, AuthorizationState)> {
        let state = AuthorizationState {
            original_url: original_url.to_string(),
            nonce: generate_nonce(),
            issued_at: now,
        };
        let payload = serde_json::to_vec(&state)?;
        let encoded = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(self.sign(&payload)?)
        );
        Ok((encoded, state))
    }

    /// Check the MAC and age of a returned state
    pub fn open(&self, encoded: &str) -> Result<AuthorizationState> {
        self.open_at(encoded, unix_now())
    }

    /// Check the MAC and age of a returned state as of `now`
    ///
    /// # Errors
    ///
    /// Every failure is `Error::StateMismatch`.
    pub fn open_at(&self, encoded: &str, now: u64) -> Result<AuthorizationState> {
        let (payload_b64, mac_b64) = encoded
            .split_once('.')
            .ok_or_else(|| mismatch("malformed state"))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| mismatch("malformed state"))?;
        let presented = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| mismatch("malformed state"))?;

        let expected = self.sign(&payload)?;
        if !bool::from(expected.as_slice().ct_eq(&presented)) {
            return Err(mismatch("state signature invalid"));
        }

        let state: AuthorizationState =
            serde_json::from_slice(&payload).map_err(|_| mismatch("malformed state"))?;

        let age = now.saturating_sub(state.issued_at);
        if age >= self.ttl.as_secs() || state.issued_at > now.saturating_add(60) {
            return Err(mismatch("state expired"));
        }
        Ok(state)
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Internal(format!("Invalid state key: {e}")))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Constant-time equality of a flow nonce and a presented one
#[must_use]
pub fn nonce_matches(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// 128-bit random nonce, base64url encoded
fn generate_nonce() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn mismatch(detail: &str) -> Error {
    Error::StateMismatch(detail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn codec() -> StateCodec {
        StateCodec::new(b"test-secret", Duration::from_secs(600))
    }

    #[test]
    fn issued_state_opens() {
        let codec = codec();
        let (encoded, issued) = codec
            .issue_at("https://app.example.com/orders?page=2", NOW)
            .unwrap();
        let opened = codec.open_at(&encoded, NOW + 30).unwrap();
        assert_eq!(opened, issued);
        assert_eq!(opened.original_url, "https://app.example.com/orders?page=2");
    }

    #[test]
    fn nonces_are_not_reused() {
        let codec = codec();
        let (a, sa) = codec.issue_at("https://app.example.com/", NOW).unwrap();
        let (b, sb) = codec.issue_at("https://app.example.com/", NOW).unwrap();
        assert_ne!(sa.nonce, sb.nonce);
        assert_ne!(a, b);
        assert_eq!(sa.nonce.len(), 22);
    }

    #[test]
    fn state_is_url_safe() {
        let (encoded, _) = codec().issue_at("https://app.example.com/a b?c=d&e", NOW).unwrap();
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        );
    }

    #[test]
    fn forged_payload_is_rejected() {
        let codec = codec();
        let (encoded, mut state) = codec.issue_at("https://app.example.com/", NOW).unwrap();
        let (_, mac) = encoded.split_once('.').unwrap();
        state.original_url = "https://evil.example.com/".to_string();
        let forged = format!(
            "{}.{mac}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&state).unwrap())
        );
        assert!(matches!(
            codec.open_at(&forged, NOW),
            Err(Error::StateMismatch(_))
        ));
    }

    #[test]
    fn other_secret_is_rejected() {
        let (encoded, _) = codec().issue_at("https://app.example.com/", NOW).unwrap();
        let other = StateCodec::new(b"another-secret", Duration::from_secs(600));
        assert!(matches!(
            other.open_at(&encoded, NOW),
            Err(Error::StateMismatch(_))
        ));
    }

    #[test]
    fn expired_state_is_rejected() {
        let codec = codec();
        let (encoded, _) = codec.issue_at("https://app.example.com/", NOW).unwrap();
        assert!(codec.open_at(&encoded, NOW + 599).is_ok());
        assert!(matches!(
            codec.open_at(&encoded, NOW + 600),
            Err(Error::StateMismatch(_))
        ));
    }

    #[test]
    fn garbage_is_a_mismatch() {
        let codec = codec();
        for garbage in ["", "abc", "abc.def", "!!!.???", "."] {
            assert!(matches!(
                codec.open_at(garbage, NOW),
                Err(Error::StateMismatch(_))
            ));
        }
    }

    #[test]
    fn nonce_comparison() {
        assert!(nonce_matches("abc", "abc"));
        assert!(!nonce_matches("abc", "abd"));
        assert!(!nonce_matches("abc", "ab"));
    }
}
