// src/principal.rs

//! Tags request logs with a claim of the caller.

use crate::decoder::{decode, Claims};
use crate::middleware::{bearer_token, VerifiedIdentity};
use axum::http::{header::AUTHORIZATION, Extensions, HeaderMap, Request};
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::MakeSpan;
use tracing::Span;

/// Returns `field` of the current caller's claims, or an empty string.
///
/// Uses the verified identity when the authentication middleware already ran.
/// Otherwise the bearer token is decoded without verification, so the value
/// is only fit for logging.
pub fn request_claim(extensions: &Extensions, headers: &HeaderMap, field: &str) -> String {
    if let Some(identity) = extensions.get::<VerifiedIdentity>() {
        return claim_to_string(&identity.claims, field);
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| bearer_token(Some(value)).ok())
        .and_then(|token| decode(token).ok())
        .map(|token| claim_to_string(&token.claims, field))
        .unwrap_or_default()
}

/// Like [`request_claim`], for code that may run outside of a request.
pub fn logged_claim<B>(request: Option<&Request<B>>, field: &str) -> String {
    request
        .map(|request| request_claim(request.extensions(), request.headers(), field))
        .unwrap_or_default()
}

fn claim_to_string(claims: &Claims, field: &str) -> String {
    match claims.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
    }
}

/// A [`MakeSpan`] for `tower_http::trace::TraceLayer` that records the caller
/// in every request span.
#[derive(Clone, Debug)]
pub struct PrincipalMakeSpan {
    field: Arc<str>,
}

impl PrincipalMakeSpan {
    /// Records the claim named `field` (for example `upn` or `sub`).
    pub fn new(field: &str) -> Self {
        Self {
            field: Arc::from(field),
        }
    }
}

impl Default for PrincipalMakeSpan {
    fn default() -> Self {
        Self::new("sub")
    }
}

impl<B> MakeSpan<B> for PrincipalMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let principal = logged_claim(Some(request), &self.field);
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            principal = %principal
        )
    }
}
