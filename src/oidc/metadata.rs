//! Provider discovery document and signing keys.
//!
//! # Refresh policy
//!
//! - The document and its JWKS are fetched together and published as one
//!   immutable [`Metadata`] snapshot; readers never see a half-updated pair.
//! - A snapshot is served without network traffic until it is older than
//!   `discovery_ttl`.
//! - At most one fetch runs at a time. Callers that queue behind a fetch reuse
//!   its outcome instead of starting another one.
//! - A failed refresh keeps serving the previous snapshot, with a warning,
//!   until it is older than `max_staleness`. Without any snapshot the caller
//!   gets [`Error::ProviderUnavailable`].
//! - Refreshes that have a snapshot to fall back on (TTL expiry, an ID token
//!   signed with an unknown `kid`) are attempted at most once per
//!   `min_refresh_interval`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Path of the discovery document below the issuer URL
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// OpenID Provider Metadata (OpenID Connect Discovery 1.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDocument {
    /// Issuer identifier; ID tokens must carry it as `iss`
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// JWKS URL
    pub jwks_uri: String,

    /// RP-initiated logout endpoint (optional)
    #[serde(default)]
    pub end_session_endpoint: Option<String>,

    /// Dynamic client registration endpoint (optional)
    #[serde(default)]
    pub registration_endpoint: Option<String>,
}

/// One consistent view of the provider
#[derive(Debug)]
pub struct Metadata {
    /// Discovery document
    pub document: ProviderDocument,
    /// Signing keys published at `jwks_uri`
    pub keys: JwkSet,
    fetched_at: Instant,
}

impl Metadata {
    /// Time since this snapshot was fetched
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Look up an ID-token verification key
    #[must_use]
    pub fn decoding_key(&self, kid: Option<&str>) -> Option<DecodingKey> {
        find_key_in_jwks(&self.keys, kid)
    }
}

#[derive(Default)]
struct RefreshState {
    last_attempt: Option<Instant>,
    last_error: Option<String>,
}

/// Shared, lazily-populated provider metadata cache
pub struct ProviderMetadata {
    issuer: String,
    discovery_url: String,
    http: reqwest::Client,
    ttl: Duration,
    max_staleness: Duration,
    min_refresh_interval: Duration,
    current: ArcSwapOption<Metadata>,
    /// Completed fetches, successful or not. A caller that observed an older
    /// count before queueing on `refresh` reuses the newer outcome.
    fetches: AtomicU64,
    refresh: Mutex<RefreshState>,
}

impl ProviderMetadata {
    /// Create an empty cache for the configured provider
    #[must_use]
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> Self {
        Self {
            issuer: config.url.trim_end_matches('/').to_string(),
            discovery_url: discovery_url(&config.url),
            http,
            ttl: config.discovery_ttl,
            max_staleness: config.max_staleness,
            min_refresh_interval: config.min_refresh_interval,
            current: ArcSwapOption::empty(),
            fetches: AtomicU64::new(0),
            refresh: Mutex::new(RefreshState::default()),
        }
    }

    /// URL the discovery document is read from
    #[must_use]
    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }

    /// Current snapshot, fetching it if absent or older than the TTL
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderUnavailable` when no usable snapshot exists and
    /// the provider cannot be reached.
    pub async fn get(&self) -> Result<Arc<Metadata>> {
        let observed = self.fetches.load(Ordering::Acquire);
        let Some(current) = self.current.load_full() else {
            return self.refresh_observed(observed, None).await;
        };
        if current.age() < self.ttl {
            return Ok(current);
        }

        debug!(age = ?current.age(), "Provider metadata expired, refreshing");
        // With a copy to fall back on, retries against a failing provider are spaced out
        self.refresh_observed(observed, Some(self.min_refresh_interval))
            .await
    }

    /// Fetch a new snapshot regardless of age
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderUnavailable` when the fetch fails and no
    /// snapshot within the staleness ceiling exists.
    pub async fn refresh(&self) -> Result<Arc<Metadata>> {
        let observed = self.fetches.load(Ordering::Acquire);
        self.refresh_observed(observed, None).await
    }

    /// Find the key for an ID token's `kid`, refreshing once on a miss
    ///
    /// Returns `Ok(None)` if the key is still unknown after the refresh, or if
    /// a forced refresh happened too recently to try again.
    pub async fn key_for(&self, kid: Option<&str>) -> Result<Option<DecodingKey>> {
        let metadata = self.get().await?;
        if let Some(key) = metadata.decoding_key(kid) {
            return Ok(Some(key));
        }

        debug!(kid = ?kid, "Signing key not in cached JWKS, refreshing");
        let observed = self.fetches.load(Ordering::Acquire);
        let metadata = self
            .refresh_observed(observed, Some(self.min_refresh_interval))
            .await?;
        Ok(metadata.decoding_key(kid))
    }

    async fn refresh_observed(
        &self,
        observed: u64,
        min_interval: Option<Duration>,
    ) -> Result<Arc<Metadata>> {
        let mut state = self.refresh.lock().await;

        if self.fetches.load(Ordering::Acquire) != observed {
            // Someone else fetched while we waited
            return self.serve_current(state.last_error.as_deref());
        }
        if let (Some(min), Some(last)) = (min_interval, state.last_attempt) {
            if last.elapsed() < min {
                debug!("Forced refresh suppressed, last attempt too recent");
                return self.serve_current(state.last_error.as_deref());
            }
        }

        state.last_attempt = Some(Instant::now());
        let result = match self.fetch().await {
            Ok(metadata) => {
                let metadata = Arc::new(metadata);
                self.current.store(Some(Arc::clone(&metadata)));
                state.last_error = None;
                info!(
                    issuer = %metadata.document.issuer,
                    keys = metadata.keys.keys.len(),
                    "Provider metadata loaded"
                );
                Ok(metadata)
            }
            Err(e) => {
                let detail = e.to_string();
                state.last_error = Some(detail.clone());
                let served = self.serve_current(Some(&detail));
                if let Ok(stale) = &served {
                    warn!(
                        error = %detail,
                        age = ?stale.age(),
                        "Provider metadata refresh failed, serving stale copy"
                    );
                }
                served
            }
        };
        // Counted only once the outcome is visible to lock-free readers
        self.fetches.fetch_add(1, Ordering::AcqRel);
        result
    }

    fn serve_current(&self, last_error: Option<&str>) -> Result<Arc<Metadata>> {
        match self.current.load_full() {
            Some(current) if current.age() < self.max_staleness => Ok(current),
            Some(_) => Err(Error::ProviderUnavailable(format!(
                "cached metadata exceeded staleness ceiling: {}",
                last_error.unwrap_or("refresh failed")
            ))),
            None => Err(Error::ProviderUnavailable(
                last_error.unwrap_or("metadata not loaded").to_string(),
            )),
        }
    }

    async fn fetch(&self) -> Result<Metadata> {
        debug!(url = %self.discovery_url, "Fetching provider discovery document");
        let document: ProviderDocument = self.get_json(&self.discovery_url).await?;
        if document.issuer.trim_end_matches('/') != self.issuer {
            return Err(Error::ProviderUnavailable(format!(
                "discovery document issuer {} does not match configured provider {}",
                document.issuer, self.issuer
            )));
        }

        debug!(url = %document.jwks_uri, "Fetching provider JWKS");
        let keys: JwkSet = self.get_json(&document.jwks_uri).await?;

        Ok(Metadata {
            document,
            keys,
            fetched_at: Instant::now(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "GET {url}: HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("GET {url}: invalid body: {e}")))
    }
}

/// Discovery document URL for an issuer
#[must_use]
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{DISCOVERY_PATH}", issuer.trim_end_matches('/'))
}

/// Find a JWK by `kid` and convert it to a `DecodingKey`.
///
/// A token without `kid` is accepted only when the set holds a single key.
fn find_key_in_jwks(jwks: &JwkSet, kid: Option<&str>) -> Option<DecodingKey> {
    let jwk = match kid {
        Some(kid) => jwks
            .keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?,
        None if jwks.keys.len() == 1 => &jwks.keys[0],
        None => return None,
    };

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}
