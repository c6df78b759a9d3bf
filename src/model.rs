// src/model.rs

use serde::Deserialize;
use serde_json::Value;

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
///
/// Every member is optional on the wire and unknown members are ignored.
/// Keys are read one at a time, so a malformed key never hides the others.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonWebKey {
    pub kid: Option<String>,
    pub kty: Option<String>,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    /// X.509 certificate chain, leaf first, each entry standard base64 DER.
    pub x5c: Option<Vec<String>>,
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
///
/// Entries stay untyped until each is converted into a [`JsonWebKey`].
#[derive(Debug, Clone, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<Value>,
}
