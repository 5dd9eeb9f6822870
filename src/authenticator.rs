//! The authorization facade.
//!
//! Composes path classification, session verification and the login flow
//! into the three operations the listeners expose: the per-request decision,
//! the login callback and logout. Everything here is transport-neutral; the
//! gRPC and HTTP adapters in [`crate::server`] translate to and from wire
//! types.

use std::collections::HashMap;
use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::oidc::{
    ClientRegistrar, FlowEngine, PathClass, PathMatcher, ProviderMetadata, SessionCodec,
    SigningKeys, ensure_client_credentials, strip_query, unix_now,
};
use crate::Result;

/// Login callback path
pub const CALLBACK_PATH: &str = "/_auth/callback";
/// Logout path
pub const LOGOUT_PATH: &str = "/_auth/logout";
/// Session certificate path
pub const CERTIFICATE_PATH: &str = "/_auth/certificate";
/// Cookie binding the flow nonce to the browser, when enabled
pub const NONCE_COOKIE: &str = "oidc_nonce";

/// The filter's own endpoints pass without a session; nothing else under `/_auth/` does
fn is_filter_endpoint(path: &str) -> bool {
    matches!(
        strip_query(path),
        CALLBACK_PATH | LOGOUT_PATH | CERTIFICATE_PATH
    )
}

/// Request attributes relevant to a decision
#[derive(Debug, Clone, Default)]
pub struct CheckInput {
    /// HTTP method
    pub method: String,
    /// Request path, including any query string
    pub path: String,
    /// Request headers, keys lowercase
    pub headers: HashMap<String, String>,
}

impl CheckInput {
    /// Raw `cookie` header, if any
    #[must_use]
    pub fn cookie_header(&self) -> Option<&str> {
        self.headers.get("cookie").map(String::as_str)
    }
}

/// Outcome of a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through
    Allow {
        /// Headers to set (overwriting) on the upstream request
        headers: Vec<(String, String)>,
        /// Headers to strip from the upstream request
        remove_headers: Vec<String>,
        /// Reason code
        reason: &'static str,
    },
    /// Answer the browser with a 302 to `location`
    Redirect {
        /// Provider authorization URL
        location: String,
        /// `Set-Cookie` values to send with the redirect
        set_cookies: Vec<String>,
        /// Reason code
        reason: &'static str,
    },
    /// Answer with `status` and no redirect
    Deny {
        /// HTTP status
        status: u16,
        /// `Set-Cookie` values to send with the denial
        set_cookies: Vec<String>,
        /// Reason code
        reason: &'static str,
    },
}

impl Decision {
    /// Reason code for logs
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Allow { reason, .. } | Self::Redirect { reason, .. } | Self::Deny { reason, .. } => {
                *reason
            }
        }
    }

    /// True for [`Decision::Allow`]
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Query parameters of the login callback
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Signed state
    pub state: Option<String>,
    /// Provider error code
    pub error: Option<String>,
    /// Provider error description
    pub error_description: Option<String>,
}

/// Transport-neutral HTTP response from the callback and logout operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code
    pub status: u16,
    /// Headers, in order (may repeat `set-cookie`)
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: String,
}

impl HttpReply {
    fn redirect(location: &str, set_cookies: Vec<String>) -> Self {
        let mut headers = vec![("location".to_string(), location.to_string())];
        headers.extend(set_cookies.into_iter().map(|c| ("set-cookie".to_string(), c)));
        Self {
            status: 302,
            headers,
            body: String::new(),
        }
    }

    fn error_page(status: u16, reason: &str, set_cookies: Vec<String>) -> Self {
        let mut headers = vec![(
            "content-type".to_string(),
            "text/html; charset=utf-8".to_string(),
        )];
        headers.extend(set_cookies.into_iter().map(|c| ("set-cookie".to_string(), c)));
        Self {
            status,
            headers,
            body: format!(
                "<!DOCTYPE html><html><head><title>Authentication failed</title></head>\
                 <body><h1>Authentication failed</h1><p>Reason: {reason}</p></body></html>"
            ),
        }
    }

    /// First value of a header, by lowercase name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All `set-cookie` values
    #[must_use]
    pub fn set_cookies(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k == "set-cookie")
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Cookie attributes shared by every cookie the filter sets
#[derive(Debug, Clone)]
struct CookieSettings {
    session_name: String,
    secure: bool,
    bind_state: bool,
    state_ttl_secs: u64,
}

impl CookieSettings {
    fn create(&self, name: &str, value: String, max_age_secs: u64) -> String {
        Cookie::build((name.to_string(), value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(
                i64::try_from(max_age_secs).unwrap_or(i64::MAX),
            ))
            .build()
            .to_string()
    }

    fn clear(&self, name: &str) -> String {
        self.create(name, String::new(), 0)
    }
}

/// Decides requests, completes logins and logs users out
pub struct Authenticator {
    paths: PathMatcher,
    flow: FlowEngine,
    base_url: String,
    cookies: CookieSettings,
    subject_header: String,
    forward_token_header: Option<String>,
}

impl Authenticator {
    /// Assemble from a config holding client credentials and a wired flow engine
    #[must_use]
    pub fn new(config: &Config, flow: FlowEngine) -> Self {
        Self {
            paths: PathMatcher::from_config(&config.paths),
            flow,
            base_url: config.client.base_url.trim_end_matches('/').to_string(),
            cookies: CookieSettings {
                session_name: config.session.cookie_name.clone(),
                secure: config.session.secure_cookie,
                bind_state: config.session.bind_state_cookie,
                state_ttl_secs: config.session.state_ttl.as_secs(),
            },
            subject_header: config.session.subject_header.to_ascii_lowercase(),
            forward_token_header: config
                .session
                .forward_token_header
                .as_ref()
                .map(|h| h.to_ascii_lowercase()),
        }
    }

    /// Run the startup phase and build a ready authenticator
    ///
    /// Registers the client if needed, loads and self-checks the signing
    /// key, and warms the provider metadata cache. A warm-up failure is
    /// logged and retried lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unusable key material and
    /// `Error::RegistrationFailed` if DCR fails.
    pub async fn start(
        config: Config,
        registrar: &dyn ClientRegistrar,
        http_client: reqwest::Client,
    ) -> Result<Self> {
        config.validate()?;
        let config = ensure_client_credentials(config, registrar).await?;

        let keys = Arc::new(SigningKeys::load(
            &config.session.private_key_file,
            &config.session.certificate_file,
        )?);
        SessionCodec::from_config(Arc::clone(&keys), &config.session).self_check()?;
        info!(algorithm = ?keys.algorithm(), "Session signing key loaded");

        let metadata = Arc::new(ProviderMetadata::new(&config.provider, http_client.clone()));
        if let Err(e) = metadata.get().await {
            warn!(error = %e, url = %metadata.discovery_url(), "Provider metadata warm-up failed");
        }

        let flow = FlowEngine::new(&config, metadata, keys, http_client);
        Ok(Self::new(&config, flow))
    }

    /// Flow engine (sessions, metadata)
    #[must_use]
    pub fn flow(&self) -> &FlowEngine {
        &self.flow
    }

    /// Certificate PEM for external session verifiers
    #[must_use]
    pub fn certificate_pem(&self) -> &str {
        self.flow.sessions().certificate_pem()
    }

    /// Decide a single request
    pub async fn check(&self, request: &CheckInput) -> Decision {
        let decision = self.decide(request).await;
        debug!(
            method = %request.method,
            path = %request.path,
            reason = decision.reason(),
            "Decision"
        );
        decision
    }

    async fn decide(&self, request: &CheckInput) -> Decision {
        let path = request.path.as_str();
        if is_filter_endpoint(path) || self.paths.classify(path) == PathClass::Exempt {
            return Decision::Allow {
                headers: Vec::new(),
                remove_headers: vec![self.subject_header.clone()],
                reason: "path_exempt",
            };
        }

        let mut set_cookies = Vec::new();
        let mut reason = "session_missing";

        if let Some(token) = cookie_value(request.cookie_header(), &self.cookies.session_name) {
            match self.flow.sessions().verify(&token) {
                Ok(claims) => {
                    let mut headers = vec![(self.subject_header.clone(), claims.sub)];
                    if let Some(name) = &self.forward_token_header {
                        headers.push((name.clone(), token));
                    }
                    return Decision::Allow {
                        headers,
                        remove_headers: Vec::new(),
                        reason: "session_valid",
                    };
                }
                Err(e) => {
                    debug!(reason = e.reason_code(), "Session rejected");
                    set_cookies.push(self.cookies.clear(&self.cookies.session_name));
                    reason = "session_invalid";
                }
            }
        }

        let original_url = self.original_url(path);
        match self.flow.build_redirect(&original_url).await {
            Ok(redirect) => {
                if self.cookies.bind_state {
                    set_cookies.push(self.cookies.create(
                        NONCE_COOKIE,
                        redirect.state.nonce,
                        self.cookies.state_ttl_secs,
                    ));
                }
                Decision::Redirect {
                    location: redirect.url,
                    set_cookies,
                    reason,
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot start login");
                Decision::Deny {
                    status: 401,
                    set_cookies,
                    reason: e.reason_code(),
                }
            }
        }
    }

    /// Complete a login at the callback endpoint
    pub async fn callback(&self, params: &CallbackParams, cookie_header: Option<&str>) -> HttpReply {
        let mut set_cookies = Vec::new();
        if self.cookies.bind_state {
            set_cookies.push(self.cookies.clear(NONCE_COOKIE));
        }

        if let Some(error) = &params.error {
            warn!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or(""),
                "Provider returned an error to the callback"
            );
            return HttpReply::error_page(400, "provider_error", set_cookies);
        }
        let (Some(code), Some(state)) = (params.code.as_deref(), params.state.as_deref()) else {
            return HttpReply::error_page(400, "missing_parameters", set_cookies);
        };

        // With binding on, a missing cookie must fail the nonce comparison
        let presented_nonce = self
            .cookies
            .bind_state
            .then(|| cookie_value(cookie_header, NONCE_COOKIE).unwrap_or_default());

        match self
            .flow
            .handle_callback(code, state, presented_nonce.as_deref())
            .await
        {
            Ok(outcome) => {
                let max_age = outcome.session.remaining(unix_now());
                set_cookies.push(self.cookies.create(
                    &self.cookies.session_name,
                    outcome.session.token,
                    max_age,
                ));
                HttpReply::redirect(&outcome.original_url, set_cookies)
            }
            Err(e) => {
                warn!(error = %e, reason = e.reason_code(), "Login callback rejected");
                HttpReply::error_page(e.http_status(), e.reason_code(), set_cookies)
            }
        }
    }

    /// Clear the session and send the browser to the provider's logout
    pub async fn logout(&self, cookie_header: Option<&str>) -> HttpReply {
        let claims = cookie_value(cookie_header, &self.cookies.session_name)
            .and_then(|token| self.flow.sessions().verify(&token).ok());
        let location = self.flow.handle_logout(claims.as_ref()).await;
        HttpReply::redirect(
            &location,
            vec![self.cookies.clear(&self.cookies.session_name)],
        )
    }

    fn original_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/", self.base_url)
        }
    }
}

/// Value of a named cookie in a `cookie` header; empty values count as absent
fn cookie_value(header: Option<&str>, name: &str) -> Option<String> {
    Cookie::split_parse(header?)
        .filter_map(std::result::Result::ok)
        .find(|c| c.name() == name && !c.value().is_empty())
        .map(|c| c.value().to_string())
}
