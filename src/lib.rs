//! Envoy OIDC Filter Library
//!
//! OpenID Connect authorization for a service mesh, served over Envoy's
//! external authorization protocol.
//!
//! # Features
//!
//! - **Decision service**: ext_authz gRPC `Check` that allows, redirects to
//!   login, or denies each request
//! - **Authorization Code flow**: redirect, callback, code exchange and ID
//!   token validation against the provider's JWKS
//! - **Stateless sessions**: locally-signed session tokens in a cookie, no
//!   server-side session table
//! - **Path policy**: allow-list or deny-list classification of request paths
//! - **Dynamic Client Registration**: one-shot at startup when no static
//!   credentials are configured
//! - **Logout**: RP-initiated logout through the provider's end-session
//!   endpoint

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authenticator;
pub mod cli;
pub mod config;
pub mod error;
pub mod oidc;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to initialise tracing: {e}")))
}
