//! Dynamic Client Registration (RFC 7591).
//!
//! Registration is a startup phase: [`ensure_client_credentials`] turns a
//! config without static credentials into one with them, before any
//! listener opens. It never runs again for the life of the process.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::{Error, Result};

/// Credentials issued by the registration endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    /// Issued client id
    pub client_id: String,
    /// Issued client secret
    pub client_secret: String,
}

impl std::fmt::Debug for RegisteredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredClient")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Obtains client credentials from a registration endpoint
#[async_trait]
pub trait ClientRegistrar: Send + Sync {
    /// Register a confidential client whose only redirect target is `redirect_url`
    async fn register(
        &self,
        endpoint: &str,
        user: &str,
        password: &str,
        redirect_url: &str,
    ) -> Result<RegisteredClient>;
}

/// Client registration response
#[derive(Debug, Deserialize)]
struct ClientRegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

/// Registers over HTTP with basic authentication
pub struct HttpClientRegistrar {
    http_client: reqwest::Client,
    client_name: String,
}

impl HttpClientRegistrar {
    /// Create a registrar announcing itself as `client_name`
    #[must_use]
    pub fn new(http_client: reqwest::Client, client_name: impl Into<String>) -> Self {
        Self {
            http_client,
            client_name: client_name.into(),
        }
    }
}

#[async_trait]
impl ClientRegistrar for HttpClientRegistrar {
    async fn register(
        &self,
        endpoint: &str,
        user: &str,
        password: &str,
        redirect_url: &str,
    ) -> Result<RegisteredClient> {
        let body = serde_json::json!({
            "client_name": self.client_name,
            "redirect_uris": [redirect_url],
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "client_secret_basic"
        });

        debug!(endpoint = %endpoint, "Registering OIDC client");
        let response = self
            .http_client
            .post(endpoint)
            .basic_auth(user, Some(password))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RegistrationFailed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RegistrationFailed(format!("HTTP {status} - {body}")));
        }

        let reg_response: ClientRegistrationResponse = response
            .json()
            .await
            .map_err(|e| Error::RegistrationFailed(format!("invalid response: {e}")))?;

        let client_secret = reg_response
            .client_secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::RegistrationFailed("response carries no client_secret".to_string())
            })?;
        if reg_response.client_id.is_empty() {
            return Err(Error::RegistrationFailed(
                "response carries an empty client_id".to_string(),
            ));
        }

        info!(client_id = %reg_response.client_id, "Registered OIDC client");
        Ok(RegisteredClient {
            client_id: reg_response.client_id,
            client_secret,
        })
    }
}

/// Fill in client credentials through DCR when none are configured
///
/// Returns `config` untouched when static credentials are present.
///
/// # Errors
///
/// Returns `Error::RegistrationFailed` if registration is needed and fails.
pub async fn ensure_client_credentials(
    mut config: Config,
    registrar: &dyn ClientRegistrar,
) -> Result<Config> {
    if config.has_static_credentials() {
        debug!("Using statically configured client credentials");
        return Ok(config);
    }

    let registered = registrar
        .register(
            &config.dcr.endpoint,
            &config.dcr.user,
            &config.dcr.password,
            &config.client.redirect_url,
        )
        .await?;

    config.client.client_id = registered.client_id;
    config.client.client_secret = registered.client_secret;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeRegistrar {
        calls: AtomicUsize,
        outcome: Option<RegisteredClient>,
    }

    #[async_trait]
    impl ClientRegistrar for FakeRegistrar {
        async fn register(
            &self,
            _endpoint: &str,
            _user: &str,
            _password: &str,
            redirect_url: &str,
        ) -> Result<RegisteredClient> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(redirect_url, "https://app.example.com/_auth/callback");
            self.outcome
                .clone()
                .ok_or_else(|| Error::RegistrationFailed("HTTP 401".to_string()))
        }
    }

    fn dcr_config() -> Config {
        let mut config = Config::default();
        config.client.redirect_url = "https://app.example.com/_auth/callback".to_string();
        config.dcr.endpoint = "https://idp.example.com/register".to_string();
        config.dcr.user = "admin".to_string();
        config.dcr.password = "admin".to_string();
        config
    }

    #[tokio::test]
    async fn static_credentials_skip_registration() {
        let registrar = FakeRegistrar {
            calls: AtomicUsize::new(0),
            outcome: None,
        };
        let mut config = dcr_config();
        config.client.client_id = "static".to_string();
        config.client.client_secret = "secret".to_string();

        let config = ensure_client_credentials(config, &registrar).await.unwrap();
        assert_eq!(config.client.client_id, "static");
        assert_eq!(registrar.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registration_fills_credentials() {
        let registrar = FakeRegistrar {
            calls: AtomicUsize::new(0),
            outcome: Some(RegisteredClient {
                client_id: "dyn-id".to_string(),
                client_secret: "dyn-secret".to_string(),
            }),
        };
        let config = ensure_client_credentials(dcr_config(), &registrar)
            .await
            .unwrap();
        assert_eq!(config.client.client_id, "dyn-id");
        assert_eq!(config.client.client_secret, "dyn-secret");
        assert!(config.has_static_credentials());
        assert_eq!(registrar.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registration_failure_is_fatal() {
        let registrar = FakeRegistrar {
            calls: AtomicUsize::new(0),
            outcome: None,
        };
        let err = ensure_client_credentials(dcr_config(), &registrar)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationFailed(_)));
    }

    #[test]
    fn debug_hides_the_secret() {
        let client = RegisteredClient {
            client_id: "id".to_string(),
            client_secret: "hunter2".to_string(),
        };
        assert!(!format!("{client:?}").contains("hunter2"));
    }
}
