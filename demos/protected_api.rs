// demos/protected_api.rs
//
// Run with:
//   JWKS_URI=https://login.example.com/common/discovery/keys cargo run --example protected_api

use axum::middleware::from_fn_with_state;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use nila_api_guard::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn whoami(Extension(identity): Extension<VerifiedIdentity>) -> Json<Value> {
    Json(json!({ "subject": identity.subject, "scopes": identity.scopes }))
}

async fn create_item(Extension(identity): Extension<VerifiedIdentity>) -> Response {
    info!(scopes = ?identity.scopes, "Creating item");
    created("/items/1")
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "protected_api=debug,nila_api_guard=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let jwks_uri = std::env::var("JWKS_URI")
        .unwrap_or_else(|_| "https://login.microsoftonline.com/common/discovery/v2.0/keys".to_string());
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let release_id = std::env::var("RELEASE_ID").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

    let config = ConfigBuilder::new()
        .jwks_uri(&jwks_uri)?
        .cache_ttl(Duration::from_secs(300))
        .leeway(Duration::from_secs(30))
        .build()?;
    let authenticator = Authenticator::builder(config)
        .subject_extractor(claim_subject("upn"))
        .scope_extractor(claim_scopes("scp"))
        .build()?;

    let mut health = Health::new(release_id);
    if let Ok(dependency) = std::env::var("DEPENDENCY_HEALTH_URL") {
        health = health.with_check(HttpCheck::new("dependency", &dependency)?);
    }

    let read = AuthState::new(authenticator.clone());
    let write = AuthState::new(authenticator).require_scopes(["items.write"]);

    let app = Router::new()
        .route("/me", get(whoami).route_layer(from_fn_with_state(read, require_auth)))
        .route("/items", post(create_item).route_layer(from_fn_with_state(write, require_auth)))
        .merge(Router::new().route("/health", get(health_handler)).with_state(Arc::new(health)))
        .merge(
            Router::new()
                .route("/changelog", get(changelog_handler))
                .with_state(Changelog::load("CHANGELOG.md")),
        )
        .layer(TraceLayer::new_for_http().make_span_with(PrincipalMakeSpan::new("upn")));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr} with keys from {jwks_uri}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
