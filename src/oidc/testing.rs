//! Generated key material for unit tests

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use x509_parser::pem::parse_x509_pem;
use x509_parser::public_key::PublicKey;

use super::keys::SigningKeys;

/// PEM private key and self-signed certificate for a fresh P-256 key
pub(crate) fn generated_pem() -> (String, String) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["oidc-filter.test".to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    (key_pair.serialize_pem(), cert.pem())
}

pub(crate) fn generated_keys() -> SigningKeys {
    let (key, cert) = generated_pem();
    SigningKeys::from_pem(key.as_bytes(), &cert).unwrap()
}

/// Public JWK of a fresh provider-side ES256 key
pub(crate) fn provider_jwk(kid: &str) -> Value {
    let (_, cert_pem) = generated_pem();
    let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).unwrap();
    let cert = pem.parse_x509().unwrap();
    let PublicKey::EC(point) = cert.public_key().parsed().unwrap() else {
        panic!("expected an EC certificate");
    };
    let raw = point.data();

    json!({
        "kty": "EC",
        "crv": "P-256",
        "alg": "ES256",
        "use": "sig",
        "kid": kid,
        "x": URL_SAFE_NO_PAD.encode(&raw[1..33]),
        "y": URL_SAFE_NO_PAD.encode(&raw[33..65]),
    })
}
