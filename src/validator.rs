// src/validator.rs

use crate::client::KeySet;
use crate::config::ValidationDetails;
use crate::decoder::{Claims, DecodedToken};
use crate::error::NilaGuardError;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::Algorithm;
use serde_json::Value;
use tracing::{debug, instrument};

/// The only signing algorithm accepted for bearer tokens.
pub const ACCEPTED_ALGORITHM: &str = "RS256";

/// Verifies decoded bearer tokens against a provider key set.
///
/// This struct should be created once and reused. It is stateless apart from
/// its validation parameters; the key set is passed per call so the caller
/// decides how keys are fetched and cached.
#[derive(Clone, Debug, Default)]
pub struct Validator {
    validation: ValidationDetails,
}

impl Validator {
    /// Creates a new `Validator` with the given validation parameters.
    pub fn new(validation: ValidationDetails) -> Self {
        Self { validation }
    }

    /// Verifies `token` against `keys` using the current time.
    ///
    /// Returns the verified claim set. See [`Validator::verify_at`] for the
    /// checks performed.
    pub fn verify(&self, token: &DecodedToken, keys: &KeySet) -> Result<Claims, NilaGuardError> {
        self.verify_at(token, keys, Utc::now().timestamp())
    }

    /// Verifies `token` against `keys` as if the current time were `now`
    /// (seconds since the Unix epoch).
    ///
    /// This method performs, in order:
    /// 1. Selection of the key named by the header's `kid`.
    /// 2. Rejection of any algorithm other than RS256.
    /// 3. RS256 verification of `<header>.<payload>` with the selected key.
    /// 4. `exp` and `nbf` checks, when those claims are present.
    #[instrument(skip_all, fields(kid = token.kid().unwrap_or_default()), err)]
    pub fn verify_at(
        &self,
        token: &DecodedToken,
        keys: &KeySet,
        now: i64,
    ) -> Result<Claims, NilaGuardError> {
        // 1. Select the key.
        let kid = token.kid().ok_or_else(|| {
            NilaGuardError::MalformedToken(
                "JWT Token header must contain a key identifier (kid).".to_string(),
            )
        })?;
        let jwk = keys.lookup(kid)?;

        // 2. Only RS256, whatever the header or the key claims.
        let alg = token.alg().unwrap_or("none");
        if alg != ACCEPTED_ALGORITHM {
            return Err(NilaGuardError::UnsupportedAlgorithm(alg.to_string()));
        }
        if let Some(key_alg) = jwk.alg.as_deref().filter(|a| *a != ACCEPTED_ALGORITHM) {
            return Err(NilaGuardError::UnsupportedAlgorithm(key_alg.to_string()));
        }

        // 3. Verify the signature.
        let decoding_key = jwk.decoding_key()?;
        if token.signature.is_empty() {
            return Err(NilaGuardError::SignatureInvalid);
        }
        let signature = URL_SAFE_NO_PAD.encode(&token.signature);
        let valid = jsonwebtoken::crypto::verify(
            &signature,
            token.signing_input.as_bytes(),
            decoding_key,
            Algorithm::RS256,
        )
        .unwrap_or(false);
        if !valid {
            return Err(NilaGuardError::SignatureInvalid);
        }

        // 4. Temporal claims.
        let leeway = i64::try_from(self.validation.leeway.as_secs()).unwrap_or(i64::MAX);
        if let Some(exp) = numeric_claim(&token.claims, "exp", "Expiration Time")? {
            if exp <= now.saturating_sub(leeway) {
                return Err(NilaGuardError::TokenExpired);
            }
        }
        if let Some(nbf) = numeric_claim(&token.claims, "nbf", "Not Before")? {
            if nbf > now.saturating_add(leeway) {
                return Err(NilaGuardError::TokenNotYetValid);
            }
        }

        debug!("Token signature and temporal claims verified");
        Ok(token.claims.clone())
    }
}

/// Reads a NumericDate claim. Fractional seconds are truncated.
fn numeric_claim(claims: &Claims, name: &str, label: &str) -> Result<Option<i64>, NilaGuardError> {
    let value = match claims.get(name) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    if let Some(seconds) = value.as_i64() {
        return Ok(Some(seconds));
    }
    match value.as_f64() {
        Some(seconds) if seconds.is_finite() => Ok(Some(seconds.trunc() as i64)),
        _ => Err(NilaGuardError::InvalidClaim(format!(
            "{label} claim ({name}) must be a number."
        ))),
    }
}
