//! Shared fixtures: generated keys, a mock OIDC provider and configs

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use x509_parser::pem::parse_x509_pem;
use x509_parser::public_key::PublicKey;

use envoy_oidc_filter::authenticator::Authenticator;
use envoy_oidc_filter::config::Config;
use envoy_oidc_filter::oidc::HttpClientRegistrar;

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const BASE_URL: &str = "https://app.example.com";
pub const REDIRECT_URL: &str = "https://app.example.com/_auth/callback";

/// PEM private key and self-signed certificate for a fresh P-256 key
pub fn generated_pem() -> (String, String) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["oidc-filter.test".to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    (key_pair.serialize_pem(), cert.pem())
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Provider-side ES256 signing key
pub struct ProviderKey {
    pub kid: String,
    encoding: EncodingKey,
    pub jwk: Value,
}

impl ProviderKey {
    pub fn generate(kid: &str) -> Self {
        let (key_pem, cert_pem) = generated_pem();
        let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        let PublicKey::EC(point) = cert.public_key().parsed().unwrap() else {
            panic!("expected an EC certificate");
        };
        let raw = point.data();

        Self {
            kid: kid.to_string(),
            encoding: EncodingKey::from_ec_pem(key_pem.as_bytes()).unwrap(),
            jwk: json!({
                "kty": "EC",
                "crv": "P-256",
                "alg": "ES256",
                "use": "sig",
                "kid": kid,
                "x": URL_SAFE_NO_PAD.encode(&raw[1..33]),
                "y": URL_SAFE_NO_PAD.encode(&raw[33..65]),
            }),
        }
    }

    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding).unwrap()
    }
}

/// A wiremock-backed OIDC provider
pub struct TestProvider {
    pub server: MockServer,
    pub key: ProviderKey,
}

impl TestProvider {
    /// Start a provider serving discovery and JWKS
    pub async fn start() -> Self {
        let provider = Self::start_bare().await;
        provider.mount_discovery().await;
        provider.mount_jwks(&[&provider.key]).await;
        provider
    }

    /// Start a provider with no routes mounted
    pub async fn start_bare() -> Self {
        Self {
            server: MockServer::start().await,
            key: ProviderKey::generate("provider-key-1"),
        }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn discovery_document(&self) -> Value {
        let base = self.server.uri();
        json!({
            "issuer": base,
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "jwks_uri": format!("{base}/jwks"),
            "end_session_endpoint": format!("{base}/logout"),
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["ES256"]
        })
    }

    pub async fn mount_discovery(&self) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.discovery_document()))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_jwks(&self, keys: &[&ProviderKey]) {
        let jwks = json!({ "keys": keys.iter().map(|k| k.jwk.clone()).collect::<Vec<_>>() });
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .mount(&self.server)
            .await;
    }

    /// Standard ID token claims for `subject`
    pub fn id_token_claims(&self, subject: &str, nonce: Option<&str>) -> Value {
        let now = now();
        let mut claims = json!({
            "iss": self.issuer(),
            "sub": subject,
            "aud": CLIENT_ID,
            "iat": now,
            "exp": now + 300,
            "email": format!("{subject}@example.com"),
        });
        if let Some(nonce) = nonce {
            claims["nonce"] = json!(nonce);
        }
        claims
    }

    /// Token endpoint answering with `id_token`
    pub async fn mount_token(&self, id_token: &str, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "token_type": "Bearer",
                "expires_in": 300,
                "id_token": id_token,
            })))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }
}

/// Session key material on disk
pub struct SessionKeyFiles {
    pub dir: TempDir,
    pub key: PathBuf,
    pub cert: PathBuf,
}

pub fn session_key_files() -> SessionKeyFiles {
    let dir = tempfile::tempdir().unwrap();
    let (key_pem, cert_pem) = generated_pem();
    let key = dir.path().join("key.pem");
    let cert = dir.path().join("cert.pem");
    std::fs::write(&key, key_pem).unwrap();
    std::fs::write(&cert, cert_pem).unwrap();
    SessionKeyFiles { dir, key, cert }
}

/// A valid static-credential config pointed at `provider_url`
pub fn test_config(provider_url: &str, keys: &SessionKeyFiles) -> Config {
    let mut config = Config::default();
    config.provider.url = provider_url.to_string();
    config.provider.http_timeout = Duration::from_secs(2);
    config.client.client_id = CLIENT_ID.to_string();
    config.client.client_secret = CLIENT_SECRET.to_string();
    config.client.redirect_url = REDIRECT_URL.to_string();
    config.client.base_url = BASE_URL.to_string();
    config.session.private_key_file = keys.key.clone();
    config.session.certificate_file = keys.cert.clone();
    config.session.jwt_issuer = "cell-gw".to_string();
    config.session.jwt_audience = "cell-app".to_string();
    config.session.namespace = "default".to_string();
    config
}

/// Run the startup phase for `config`
pub async fn start_authenticator(config: Config) -> Authenticator {
    let http = config.provider.http_client().unwrap();
    let registrar = HttpClientRegistrar::new(http.clone(), "test");
    Authenticator::start(config, &registrar, http).await.unwrap()
}

/// Query parameters of a URL as a map
pub fn query_map(url: &str) -> std::collections::HashMap<String, String> {
    let parsed = url::Url::parse(url).unwrap();
    serde_urlencoded::from_str(parsed.query().unwrap_or("")).unwrap()
}

/// `name=value` part of a `Set-Cookie` header
pub fn cookie_pair(set_cookie: &str) -> &str {
    set_cookie.split(';').next().unwrap_or("")
}
