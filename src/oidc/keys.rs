//! Session signing key material.
//!
//! The private key signs sessions; the certificate's public key verifies
//! them and is served to external verifiers. The signing algorithm follows
//! the certificate: RSA keys sign with RS256, P-256 with ES256, P-384 with
//! ES384.

use std::fs;
use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;
use x509_parser::public_key::PublicKey;

use crate::{Error, Result};

/// Domain separator for the `state` MAC key
const STATE_KEY_CONTEXT: &[u8] = b"envoy-oidc-filter/state/v1";

/// Loaded signing material
pub struct SigningKeys {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    certificate_pem: String,
    state_secret: Vec<u8>,
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeys")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKeys {
    /// Read the private key and certificate PEM files
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if either file is unreadable or unusable.
    pub fn load(private_key_file: &Path, certificate_file: &Path) -> Result<Self> {
        let key_pem = fs::read(private_key_file).map_err(|e| {
            Error::Config(format!(
                "Failed to read private key {}: {e}",
                private_key_file.display()
            ))
        })?;
        let cert_pem = fs::read_to_string(certificate_file).map_err(|e| {
            Error::Config(format!(
                "Failed to read certificate {}: {e}",
                certificate_file.display()
            ))
        })?;
        Self::from_pem(&key_pem, &cert_pem)
    }

    /// Build from in-memory PEM text
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the certificate cannot be parsed, carries an
    /// unsupported key type, or the private key does not parse for that type.
    pub fn from_pem(private_key_pem: &[u8], certificate_pem: &str) -> Result<Self> {
        let (algorithm, decoding) = certificate_key(certificate_pem)?;

        let encoding = match algorithm {
            Algorithm::RS256 => EncodingKey::from_rsa_pem(private_key_pem),
            _ => EncodingKey::from_ec_pem(private_key_pem),
        }
        .map_err(|e| Error::Config(format!("Invalid private key for {algorithm:?}: {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(STATE_KEY_CONTEXT);
        hasher.update(private_key_pem);
        let state_secret = hasher.finalize().to_vec();

        Ok(Self {
            algorithm,
            encoding,
            decoding,
            certificate_pem: certificate_pem.to_string(),
            state_secret,
        })
    }

    /// JWS algorithm used for sessions
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Certificate PEM, as read from disk
    #[must_use]
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// MAC key for `state`, derived from the private key so replicas agree
    pub(crate) fn state_secret(&self) -> &[u8] {
        &self.state_secret
    }
}

/// Extract the verification key and algorithm from a PEM certificate
fn certificate_key(certificate_pem: &str) -> Result<(Algorithm, DecodingKey)> {
    let (_, pem) = parse_x509_pem(certificate_pem.as_bytes())
        .map_err(|e| Error::Config(format!("Invalid certificate PEM: {e:?}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::Config(format!("Invalid certificate: {e:?}")))?;

    let parsed = cert
        .public_key()
        .parsed()
        .map_err(|e| Error::Config(format!("Unreadable certificate public key: {e:?}")))?;

    match parsed {
        PublicKey::RSA(rsa) => Ok((
            Algorithm::RS256,
            DecodingKey::from_rsa_raw_components(
                strip_leading_zeros(rsa.modulus),
                strip_leading_zeros(rsa.exponent),
            ),
        )),
        PublicKey::EC(point) => {
            let algorithm = match point.data().len() {
                65 => Algorithm::ES256,
                97 => Algorithm::ES384,
                n => {
                    return Err(Error::Config(format!(
                        "Unsupported EC public key length {n} (expected P-256 or P-384)"
                    )));
                }
            };
            Ok((algorithm, DecodingKey::from_ec_der(point.data())))
        }
        _ => Err(Error::Config(
            "Unsupported certificate key type (expected RSA or EC)".to_string(),
        )),
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
