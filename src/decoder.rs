// src/decoder.rs

use crate::error::{NilaGuardError, MALFORMED_TOKEN_MESSAGE};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurpose, GeneralPurposeConfig};
use serde_json::{Map, Value};
use std::fmt;

/// The claim set of a token.
pub type Claims = Map<String, Value>;

/// base64url that accepts segments with or without `=` padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A structurally decoded compact JWS. Nothing here has been verified.
#[derive(Clone)]
pub struct DecodedToken {
    pub header: Map<String, Value>,
    pub claims: Claims,
    /// `<header>.<payload>` exactly as received; this is what was signed.
    pub signing_input: String,
    pub signature: Vec<u8>,
    /// The compact token as presented.
    pub raw: String,
}

impl DecodedToken {
    /// The `kid` header parameter, when it is a string.
    pub fn kid(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// The `alg` header parameter, when it is a string.
    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }
}

// Claims and signature stay out of logs.
impl fmt::Debug for DecodedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedToken")
            .field("header", &self.header)
            .field("claims", &self.claims.keys().collect::<Vec<_>>())
            .field("signature_len", &self.signature.len())
            .finish()
    }
}

/// Splits a compact JWS and decodes its header and payload.
///
/// # Errors
///
/// Returns `MalformedToken` unless the input has exactly three dot-separated
/// segments, the first two being base64url JSON objects.
pub fn decode(token: &str) -> Result<DecodedToken, NilaGuardError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = segments.as_slice() else {
        return Err(malformed());
    };

    let header_json = decode_object(header)?;
    let claims = decode_object(payload)?;
    let signature = URL_SAFE_LENIENT.decode(signature).map_err(|_| malformed())?;

    Ok(DecodedToken {
        header: header_json,
        claims,
        signing_input: format!("{header}.{payload}"),
        signature,
        raw: token.to_string(),
    })
}

fn decode_object(segment: &str) -> Result<Map<String, Value>, NilaGuardError> {
    let bytes = URL_SAFE_LENIENT.decode(segment).map_err(|_| malformed())?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(object)) => Ok(object),
        _ => Err(malformed()),
    }
}

fn malformed() -> NilaGuardError {
    NilaGuardError::MalformedToken(MALFORMED_TOKEN_MESSAGE.to_string())
}
