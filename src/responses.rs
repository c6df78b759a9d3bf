// src/responses.rs

//! Empty-bodied responses for resource-oriented handlers.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// `201 Created` pointing at the new resource.
///
/// A `location` that is not a valid header value yields a 500.
pub fn created(location: &str) -> Response {
    (StatusCode::CREATED, [(header::LOCATION, location.to_string())], ()).into_response()
}

/// `201 Created` pointing at the updated resource.
pub fn updated(location: &str) -> Response {
    created(location)
}

/// `204 No Content`.
pub fn deleted() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
