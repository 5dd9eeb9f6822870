//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
    value::{Uncased, UncasedStr},
};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::{Error, Result};

/// Flat variable names understood for compatibility with existing deployments.
///
/// Each maps onto a nested config key.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("PROVIDER_URL", "provider.url"),
    ("CLIENT_ID", "client.client_id"),
    ("CLIENT_SECRET", "client.client_secret"),
    ("REDIRECT_URL", "client.redirect_url"),
    ("LOGOUT_URL", "client.logout_url"),
    ("APP_BASE_URL", "client.base_url"),
    ("DCR_ENDPOINT", "dcr.endpoint"),
    ("DCR_USER", "dcr.user"),
    ("DCR_PASSWORD", "dcr.password"),
    ("NON_SECURE_PATHS", "paths.non_secure"),
    ("SECURE_PATHS", "paths.secure"),
    ("PRIVATE_KEY_FILE", "session.private_key_file"),
    ("CERTIFICATE_FILE", "session.certificate_file"),
    ("JWT_ISSUER", "session.jwt_issuer"),
    ("JWT_AUDIENCE", "session.jwt_audience"),
    ("SUBJECT_CLAIM", "session.subject_claim"),
    ("CELL_NAMESPACE", "session.namespace"),
    ("FILTER_LISTENER_PORT", "server.filter_port"),
    ("HTTP_CALLBACK_LISTENER_PORT", "server.callback_port"),
];

/// Presence of this variable (any value) disables discovery TLS verification.
const SKIP_CERT_VERIFY_ENV: &str = "SKIP_DISCOVERY_URL_CERT_VERIFY";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// OIDC provider configuration
    pub provider: ProviderConfig,
    /// Relying-party client identity and URLs
    pub client: ClientConfig,
    /// Dynamic client registration (used when no static credentials are set)
    pub dcr: DcrConfig,
    /// Protected / exempt path lists
    pub paths: PathsConfig,
    /// Local session token configuration
    pub session: SessionConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind both listeners to
    pub host: String,
    /// Port of the ext_authz gRPC decision listener
    pub filter_port: u16,
    /// Port of the HTTP callback/logout listener
    pub callback_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            filter_port: 15800,
            callback_port: 15810,
        }
    }
}

/// OIDC provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Issuer URL; discovery is read from `{url}/.well-known/openid-configuration`
    pub url: String,
    /// Disable TLS certificate verification for provider calls (test environments only)
    pub skip_cert_verify: bool,
    /// Scopes requested in the authorization redirect
    pub scopes: Vec<String>,
    /// Reject ID tokens that carry no `nonce` claim
    pub require_id_token_nonce: bool,
    /// How long a fetched discovery document is served before refreshing
    #[serde(with = "humantime_serde")]
    pub discovery_ttl: Duration,
    /// How long a stale document may still be served while refreshes fail
    #[serde(with = "humantime_serde")]
    pub max_staleness: Duration,
    /// Minimum spacing between refreshes forced by an unknown signing key id
    #[serde(with = "humantime_serde")]
    pub min_refresh_interval: Duration,
    /// Timeout for discovery, token and registration calls
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            skip_cert_verify: false,
            scopes: vec!["openid".to_string()],
            require_id_token_nonce: false,
            discovery_ttl: Duration::from_secs(3600),
            max_staleness: Duration::from_secs(86_400),
            min_refresh_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl ProviderConfig {
    /// Build the outbound HTTP client shared by discovery, token exchange and DCR
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .danger_accept_invalid_certs(self.skip_cert_verify)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
    }
}

/// Relying-party client identity and URLs
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// OAuth client id (empty when obtained through DCR)
    pub client_id: String,
    /// OAuth client secret (empty when obtained through DCR)
    pub client_secret: String,
    /// Callback URL registered with the provider
    pub redirect_url: String,
    /// Where the provider sends the browser after logout
    pub logout_url: String,
    /// Public base URL of the protected application
    pub base_url: String,
}

/// Dynamic client registration endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DcrConfig {
    /// Registration endpoint
    pub endpoint: String,
    /// Basic-auth user
    pub user: String,
    /// Basic-auth password
    pub password: String,
}

/// Path policy lists
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathsConfig {
    /// Allow-list of protected path prefixes; when non-empty everything else is exempt
    #[serde(deserialize_with = "deserialize_path_list")]
    pub secure: Vec<String>,
    /// Exempt path prefixes, used only while `secure` is empty
    #[serde(deserialize_with = "deserialize_path_list")]
    pub non_secure: Vec<String>,
}

/// Local session token and cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// PEM private key used to sign sessions
    pub private_key_file: PathBuf,
    /// PEM certificate holding the matching public key
    pub certificate_file: PathBuf,
    /// Session `iss` before namespacing
    pub jwt_issuer: String,
    /// Session `aud` before namespacing
    pub jwt_audience: String,
    /// Namespace appended to issuer and audience as `{value}.{namespace}`
    pub namespace: String,
    /// ID-token claim that becomes the session subject
    pub subject_claim: String,
    /// Session cookie name
    pub cookie_name: String,
    /// Upper bound on session lifetime (also capped by the ID token's `exp`)
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
    /// How long an issued `state` stays acceptable at the callback
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,
    /// Mark cookies `Secure`
    pub secure_cookie: bool,
    /// Bind the flow nonce to the browser with a short-lived cookie
    pub bind_state_cookie: bool,
    /// Upstream header carrying the subject on allowed requests
    pub subject_header: String,
    /// Upstream header carrying the raw session token, if set
    pub forward_token_header: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            private_key_file: PathBuf::new(),
            certificate_file: PathBuf::new(),
            jwt_issuer: "oidc-filter".to_string(),
            jwt_audience: "oidc-filter".to_string(),
            namespace: String::new(),
            subject_claim: "sub".to_string(),
            cookie_name: "oidc_session".to_string(),
            lifetime: Duration::from_secs(3600),
            state_ttl: Duration::from_secs(600),
            secure_cookie: true,
            bind_state_cookie: false,
            subject_header: "x-auth-subject".to_string(),
            forward_token_header: None,
        }
    }
}

impl SessionConfig {
    /// Session issuer, namespaced when a namespace is configured
    #[must_use]
    pub fn effective_issuer(&self) -> String {
        namespaced(&self.jwt_issuer, &self.namespace)
    }

    /// Session audience, namespaced when a namespace is configured
    #[must_use]
    pub fn effective_audience(&self) -> String {
        namespaced(&self.jwt_audience, &self.namespace)
    }
}

fn namespaced(value: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        value.to_string()
    } else {
        format!("{value}.{namespace}")
    }
}

/// Deserialize a path list given either as a sequence or a comma-separated string.
///
/// Entries are whitespace-trimmed and empty entries dropped.
fn deserialize_path_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    let raw = match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => s.split(',').map(String::from).collect(),
        StringOrVec::Vec(v) => v,
    };
    Ok(clean_paths(raw))
}

/// Trim entries and drop empty ones
#[must_use]
pub fn clean_paths<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths
        .into_iter()
        .map(|p| p.as_ref().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from an optional YAML file and the environment
    ///
    /// Precedence, lowest first: file, `OIDC_FILTER_*` nested variables,
    /// flat legacy variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(Env::prefixed("OIDC_FILTER_").split("__"))
            .merge(Env::raw().filter_map(legacy_key));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        if env::var_os(SKIP_CERT_VERIFY_ENV).is_some() {
            config.provider.skip_cert_verify = true;
        }

        Ok(config)
    }

    /// Check that the configuration can drive a running filter
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first missing or malformed setting,
    /// including when neither static client credentials nor a complete DCR
    /// setup is present.
    pub fn validate(&self) -> Result<()> {
        require_url("provider URL", &self.provider.url)?;
        require_url("redirect URL", &self.client.redirect_url)?;
        require_url("application base URL", &self.client.base_url)?;
        if !self.client.logout_url.is_empty() {
            require_url("logout URL", &self.client.logout_url)?;
        }

        if self.session.private_key_file.as_os_str().is_empty() {
            return Err(Error::Config("private key file is required".to_string()));
        }
        if self.session.certificate_file.as_os_str().is_empty() {
            return Err(Error::Config("certificate file is required".to_string()));
        }
        if self.session.subject_claim.trim().is_empty() {
            return Err(Error::Config("subject claim must not be empty".to_string()));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(Error::Config("session cookie name must not be empty".to_string()));
        }

        if !self.has_static_credentials() && !self.has_dcr_credentials() {
            return Err(Error::Config(
                "either client id and client secret, or DCR endpoint, user and password must be set"
                    .to_string(),
            ));
        }
        if !self.has_static_credentials() {
            require_url("DCR endpoint", &self.dcr.endpoint)?;
        }

        Ok(())
    }

    /// Both client id and secret are statically configured
    #[must_use]
    pub fn has_static_credentials(&self) -> bool {
        !self.client.client_id.is_empty() && !self.client.client_secret.is_empty()
    }

    /// Endpoint, user and password for DCR are all configured
    #[must_use]
    pub fn has_dcr_credentials(&self) -> bool {
        !self.dcr.endpoint.is_empty() && !self.dcr.user.is_empty() && !self.dcr.password.is_empty()
    }

    /// Post-logout redirect target (logout URL, falling back to the base URL)
    #[must_use]
    pub fn logout_target(&self) -> &str {
        if self.client.logout_url.is_empty() {
            &self.client.base_url
        } else {
            &self.client.logout_url
        }
    }
}

fn legacy_key(key: &UncasedStr) -> Option<Uncased<'_>> {
    LEGACY_ENV
        .iter()
        .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
        .map(|(_, nested)| Uncased::from(*nested))
}

fn require_url(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Config(format!("{what} is required")));
    }
    Url::parse(value).map_err(|e| Error::Config(format!("invalid {what} '{value}': {e}")))?;
    Ok(())
}
