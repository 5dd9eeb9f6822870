//! Authorization Code flow.
//!
//! ```text
//! UNAUTHENTICATED --build_redirect--> REDIRECTED (state issued)
//! REDIRECTED --handle_callback ok--> AUTHENTICATED (session minted)
//! REDIRECTED --handle_callback err--> DENIED
//! AUTHENTICATED --handle_logout--> UNAUTHENTICATED
//! ```
//!
//! Nothing about a flow is kept server-side: the signed `state` carries the
//! original URL and nonce from redirect to callback.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::id_token::IdTokenValidator;
use super::keys::SigningKeys;
use super::metadata::ProviderMetadata;
use super::session::{Session, SessionClaims, SessionCodec};
use super::state::{AuthorizationState, StateCodec, nonce_matches};
use crate::config::Config;
use crate::{Error, Result};

/// Where to send the browser to start a login
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Provider authorization URL
    pub url: String,
    /// The state embedded in `url`
    pub state: AuthorizationState,
}

/// Result of a successful callback
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    /// Newly minted session
    pub session: Session,
    /// URL the browser asked for before logging in
    pub original_url: String,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

/// OAuth error response
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Drives redirect, callback and logout for one relying-party client
pub struct FlowEngine {
    http_client: reqwest::Client,
    metadata: Arc<ProviderMetadata>,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    logout_target: String,
    scope: String,
    states: StateCodec,
    id_tokens: IdTokenValidator,
    sessions: SessionCodec,
}

impl FlowEngine {
    /// Wire a flow engine from a config that already holds client credentials
    #[must_use]
    pub fn new(
        config: &Config,
        metadata: Arc<ProviderMetadata>,
        keys: Arc<SigningKeys>,
        http_client: reqwest::Client,
    ) -> Self {
        let states = StateCodec::new(keys.state_secret(), config.session.state_ttl);
        let sessions = SessionCodec::from_config(keys, &config.session);
        let id_tokens = IdTokenValidator::new(
            Arc::clone(&metadata),
            config.client.client_id.clone(),
            config.session.subject_claim.clone(),
            config.provider.require_id_token_nonce,
        );

        Self {
            http_client,
            metadata,
            client_id: config.client.client_id.clone(),
            client_secret: config.client.client_secret.clone(),
            redirect_url: config.client.redirect_url.clone(),
            logout_target: config.logout_target().to_string(),
            scope: scope_string(&config.provider.scopes),
            states,
            id_tokens,
            sessions,
        }
    }

    /// Session codec used for minted sessions
    #[must_use]
    pub fn sessions(&self) -> &SessionCodec {
        &self.sessions
    }

    /// Provider metadata cache
    #[must_use]
    pub fn metadata(&self) -> &Arc<ProviderMetadata> {
        &self.metadata
    }

    /// Build the provider authorization URL for a browser headed to `original_url`
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderUnavailable` if discovery has never succeeded.
    pub async fn build_redirect(&self, original_url: &str) -> Result<LoginRedirect> {
        let metadata = self.metadata.get().await?;
        let (encoded, state) = self.states.issue(original_url)?;

        let mut url = Url::parse(&metadata.document.authorization_endpoint).map_err(|e| {
            Error::ProviderUnavailable(format!("Invalid authorization endpoint: {e}"))
        })?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", &self.redirect_url);
            params.append_pair("scope", &self.scope);
            params.append_pair("state", &encoded);
            params.append_pair("nonce", &state.nonce);
        }

        Ok(LoginRedirect {
            url: url.into(),
            state,
        })
    }

    /// Complete a login from the callback's `code` and `state`
    ///
    /// `presented_nonce` is the nonce the browser returned alongside the
    /// callback, when browser binding is enabled.
    ///
    /// # Errors
    ///
    /// - `Error::StateMismatch` before any network call when `state` is
    ///   forged, expired, or its nonce differs from `presented_nonce`
    /// - `Error::CodeExchangeFailed` when the token endpoint refuses the code
    /// - `Error::IdTokenInvalid` when the returned ID token fails validation
    pub async fn handle_callback(
        &self,
        code: &str,
        state: &str,
        presented_nonce: Option<&str>,
    ) -> Result<CallbackOutcome> {
        let state = self.states.open(state)?;
        if let Some(presented) = presented_nonce {
            if !nonce_matches(&state.nonce, presented) {
                return Err(Error::StateMismatch(
                    "nonce does not match the one issued".to_string(),
                ));
            }
        }

        let id_token = self.exchange_code(code).await?;
        let verified = self.id_tokens.validate(&id_token, &state.nonce).await?;
        let session = self.sessions.mint(&verified.subject, Some(verified.exp))?;

        info!(subject = %verified.subject, "Login completed");
        Ok(CallbackOutcome {
            session,
            original_url: state.original_url,
        })
    }

    /// URL to send the browser to after clearing its session
    ///
    /// Falls back to the logout target itself when the provider has no
    /// end-session endpoint or cannot be reached.
    pub async fn handle_logout(&self, session: Option<&SessionClaims>) -> String {
        if let Some(claims) = session {
            info!(subject = %claims.sub, "Logout");
        }

        let end_session = match self.metadata.get().await {
            Ok(metadata) => metadata.document.end_session_endpoint.clone(),
            Err(e) => {
                warn!(error = %e, "Provider unavailable during logout, skipping end-session");
                None
            }
        };

        match end_session.as_deref().map(|ep| end_session_url(ep, &self.logout_target, &self.client_id)) {
            Some(Ok(url)) => url,
            Some(Err(e)) => {
                warn!(error = %e, "Invalid end-session endpoint, redirecting to logout target");
                self.logout_target.clone()
            }
            None => self.logout_target.clone(),
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let metadata = self.metadata.get().await?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
        ];

        debug!(endpoint = %metadata.document.token_endpoint, "Exchanging authorization code");
        let response = self
            .http_client
            .post(&metadata.document.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::CodeExchangeFailed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => format!(
                    "{} {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                ),
                Err(_) => body,
            };
            return Err(Error::CodeExchangeFailed(format!("HTTP {status} - {}", detail.trim())));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::CodeExchangeFailed(format!("invalid token response: {e}")))?;

        token_response
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::IdTokenInvalid("token response carries no id_token".to_string()))
    }
}

/// Space-separated scope list, always including `openid`
fn scope_string(scopes: &[String]) -> String {
    let mut all: Vec<&str> = vec!["openid"];
    for scope in scopes.iter().map(|s| s.trim()) {
        if !scope.is_empty() && !all.contains(&scope) {
            all.push(scope);
        }
    }
    all.join(" ")
}

fn end_session_url(endpoint: &str, post_logout: &str, client_id: &str) -> Result<String> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| Error::ProviderUnavailable(format!("Invalid end-session endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("post_logout_redirect_uri", post_logout)
        .append_pair("client_id", client_id);
    Ok(url.into())
}
