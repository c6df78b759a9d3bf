// src/error.rs

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Message returned when a request carries no usable bearer credential.
pub const UNAUTHORIZED_MESSAGE: &str = "The server could not verify that you are authorized to access the URL requested. You either supplied the wrong credentials (e.g. a bad password), or your browser doesn't understand how to supply the credentials required.";

/// Message returned when a bearer token is not a three-segment compact JWS.
pub const MALFORMED_TOKEN_MESSAGE: &str =
    "Invalid JWT Token (header, body and signature must be separated by dots).";

/// The primary error type for the `nila-api-guard` library.
///
/// The `Display` output of every variant is the message sent to the client, so
/// these strings are part of the public contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NilaGuardError {
    /// The `Authorization` header is absent or does not carry a `Bearer ` credential.
    #[error("{}", UNAUTHORIZED_MESSAGE)]
    MissingCredential,

    /// The token could not be structurally decoded.
    #[error("{0}")]
    MalformedToken(String),

    /// The key set could not be retrieved because of a transport failure.
    #[error("{kind} error while retrieving keys: {description}")]
    NetworkFailure { kind: String, description: String },

    /// The key set endpoint answered with a non-success status.
    #[error("HTTP {status} error while retrieving keys: {body}")]
    HttpFailure { status: u16, body: String },

    /// The key set endpoint answered with something that is not a JWKS document.
    #[error("Invalid key set received while retrieving keys: {0}")]
    ParseFailure(String),

    /// The token's `kid` does not match any key of the key set.
    #[error("{kid} is not a valid key identifier. Valid ones are {}.", format_kids(.known))]
    UnknownKey { kid: String, known: Vec<String> },

    /// The token is not signed with RS256.
    #[error("Unsupported JWT algorithm: {0}. Only RS256 is accepted.")]
    UnsupportedAlgorithm(String),

    /// The selected key cannot be turned into an RSA public key.
    #[error("Invalid key material for key identifier {kid}: {reason}")]
    InvalidKey { kid: String, reason: String },

    /// The RS256 signature does not match the signing input.
    #[error("Signature verification failed.")]
    SignatureInvalid,

    /// The `exp` claim is in the past.
    #[error("Signature has expired.")]
    TokenExpired,

    /// The `nbf` claim is in the future.
    #[error("The token is not yet valid (nbf).")]
    TokenNotYetValid,

    /// A temporal claim has the wrong type.
    #[error("{0}")]
    InvalidClaim(String),

    /// The verified token lacks a scope required by the route.
    #[error("The {0} must be provided in the token.")]
    MissingScope(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

/// Renders key identifiers the way operators see them in the provider console:
/// `['kid-1', 'kid-2']`.
fn format_kids(kids: &[String]) -> String {
    let quoted: Vec<String> = kids.iter().map(|kid| format!("'{kid}'")).collect();
    format!("[{}]", quoted.join(", "))
}

impl NilaGuardError {
    /// Returns the HTTP status code this error is surfaced with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            NilaGuardError::MissingScope(_) => StatusCode::FORBIDDEN,
            NilaGuardError::MissingConfiguration(_)
            | NilaGuardError::InvalidUrl(_)
            | NilaGuardError::HttpClient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Builds a `NetworkFailure` from a transport error, naming its category.
    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "Timeout"
        } else if err.is_connect() {
            "ConnectionError"
        } else if err.is_decode() {
            "DecodeError"
        } else {
            "RequestError"
        };
        NilaGuardError::NetworkFailure {
            kind: kind.to_string(),
            description: err.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for NilaGuardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
