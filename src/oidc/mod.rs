//! OpenID Connect relying party
//!
//! Implements the Authorization Code flow for a single client against a
//! single provider, with sessions kept entirely in a signed cookie.
//!
//! Features:
//! - Path classification (allow-list / deny-list)
//! - Provider discovery with snapshot caching and single-flight refresh
//! - Dynamic client registration at startup (RFC 7591)
//! - Locally-signed session tokens (RS256 / ES256 / ES384)
//! - HMAC-protected, stateless `state` parameter
//! - ID token validation against the provider JWKS

mod flow;
mod id_token;
mod keys;
mod metadata;
mod paths;
mod registrar;
mod session;
mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use flow::{CallbackOutcome, FlowEngine, LoginRedirect};
pub use id_token::{IdTokenValidator, VerifiedIdToken};
pub use keys::SigningKeys;
pub use metadata::{DISCOVERY_PATH, Metadata, ProviderDocument, ProviderMetadata, discovery_url};
pub use paths::{PathClass, PathMatcher, canonical_path, strip_query};
pub use registrar::{
    ClientRegistrar, HttpClientRegistrar, RegisteredClient, ensure_client_credentials,
};
pub use session::{Session, SessionClaims, SessionCodec};
pub(crate) use session::unix_now;
pub use state::{AuthorizationState, StateCodec};
