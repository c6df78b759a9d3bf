// src/health.rs

//! Health reporting in the `application/health+json` format.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::DEFAULT_TIMEOUT;
use crate::error::NilaGuardError;

/// Media type of a health document.
pub const HEALTH_CONTENT_TYPE: &str = "application/health+json";

/// Status of a service or of one of its components, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Pass,
    Warn,
    Fail,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Pass => "pass",
            HealthStatus::Warn => "warn",
            HealthStatus::Fail => "fail",
        }
    }

    /// HTTP status code of a health response carrying this status.
    pub fn status_code(self) -> StatusCode {
        match self {
            HealthStatus::Pass => StatusCode::OK,
            HealthStatus::Warn => StatusCode::TOO_MANY_REQUESTS,
            HealthStatus::Fail => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(HealthStatus::Pass),
            "warn" => Ok(HealthStatus::Warn),
            "fail" => Ok(HealthStatus::Fail),
            other => Err(format!("unknown health status {other}")),
        }
    }
}

/// The most severe of `statuses`; `pass` when there are none.
pub fn merge<I>(statuses: I) -> HealthStatus
where
    I: IntoIterator<Item = HealthStatus>,
{
    statuses.into_iter().max().unwrap_or(HealthStatus::Pass)
}

/// Component details, keyed by `<component>:<measurement>`.
pub type Details = Map<String, Value>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one check. An `Err` counts as `fail` and its message is surfaced
/// in the document's `output`.
pub type CheckResult = Result<(HealthStatus, Details), BoxError>;

/// A health check contributed to the service health document.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> CheckResult;
}

/// Adapts a synchronous closure into a [`HealthCheck`].
pub struct FnCheck<F>(F);

impl<F> FnCheck<F>
where
    F: Fn() -> CheckResult + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self(check)
    }
}

#[async_trait]
impl<F> HealthCheck for FnCheck<F>
where
    F: Fn() -> CheckResult + Send + Sync,
{
    async fn check(&self) -> CheckResult {
        (self.0)()
    }
}

/// Derives the status of a remote dependency from its health response body.
pub type StatusExtractor = Arc<dyn Fn(&Value) -> HealthStatus + Send + Sync>;

/// Reads the `status` member of a health document: `pass` when absent,
/// `fail` when it is not a known status.
pub fn status_field(body: &Value) -> HealthStatus {
    match body.get("status").and_then(Value::as_str) {
        None => HealthStatus::Pass,
        Some(status) => status.parse().unwrap_or(HealthStatus::Fail),
    }
}

/// Checks a remote dependency by calling its health endpoint.
pub struct HttpCheck {
    name: String,
    url: Url,
    timeout: Duration,
    http_client: reqwest::Client,
    status_extractor: StatusExtractor,
}

impl HttpCheck {
    /// Checks the service `name` at `url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if `url` cannot be parsed.
    pub fn new(name: impl Into<String>, url: &str) -> Result<Self, NilaGuardError> {
        let url = Url::parse(url).map_err(|e| NilaGuardError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            url,
            timeout: DEFAULT_TIMEOUT,
            http_client: reqwest::Client::new(),
            status_extractor: Arc::new(status_field),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces [`status_field`] for services that report health differently.
    pub fn with_status_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Value) -> HealthStatus + Send + Sync + 'static,
    {
        self.status_extractor = Arc::new(extractor);
        self
    }

    async fn probe(&self) -> Result<Value, String> {
        let response = self
            .http_client
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        let body: Value = serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));

        // A failing dependency may still describe itself in health+json.
        if status.is_success() || body.get("status").is_some() {
            Ok(body)
        } else {
            let rendered = match body {
                Value::String(text) => text,
                other => other.to_string(),
            };
            Err(format!("HTTP {}: {}", status.as_u16(), rendered))
        }
    }
}

#[async_trait]
impl HealthCheck for HttpCheck {
    #[instrument(skip(self), fields(name = %self.name, url = %self.url))]
    async fn check(&self) -> CheckResult {
        let mut entry = Map::new();
        entry.insert("componentType".to_string(), Value::String(self.url.to_string()));

        let status = match self.probe().await {
            Ok(body) => {
                let status = (self.status_extractor)(&body);
                entry.insert("observedValue".to_string(), body);
                status
            }
            Err(output) => {
                warn!(output = %output, "Health dependency unreachable");
                entry.insert("output".to_string(), Value::String(output));
                HealthStatus::Fail
            }
        };
        entry.insert("status".to_string(), Value::String(status.to_string()));
        entry.insert(
            "time".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );

        let mut details = Details::new();
        details.insert(format!("{}:health", self.name), Value::Object(entry));
        Ok((status, details))
    }
}

/// A health document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDocument {
    pub status: HealthStatus,
    pub version: String,
    pub release_id: String,
    pub details: Details,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl IntoResponse for HealthDocument {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        match serde_json::to_vec(&self) {
            Ok(body) => (status, [(header::CONTENT_TYPE, HEALTH_CONTENT_TYPE)], body).into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        }
    }
}

/// Aggregates health checks into one document.
#[derive(Clone)]
pub struct Health {
    release_id: String,
    version: String,
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl Health {
    /// `release_id` is the deployed release (`1.2.3`); `version` is its
    /// major component.
    pub fn new(release_id: impl Into<String>) -> Self {
        let release_id = release_id.into();
        let version = release_id.split('.').next().unwrap_or_default().to_string();
        Self {
            release_id,
            version,
            checks: Vec::new(),
        }
    }

    pub fn with_check<C>(mut self, check: C) -> Self
    where
        C: HealthCheck + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    /// Runs every check in registration order and merges the results.
    #[instrument(skip(self), fields(release_id = %self.release_id))]
    pub async fn evaluate(&self) -> HealthDocument {
        let mut statuses = Vec::with_capacity(self.checks.len());
        let mut details = Details::new();
        let mut outputs = Vec::new();

        for check in &self.checks {
            match check.check().await {
                Ok((status, check_details)) => {
                    statuses.push(status);
                    details.extend(check_details);
                }
                Err(err) => {
                    warn!(error = %err, "Health check failed");
                    statuses.push(HealthStatus::Fail);
                    outputs.push(err.to_string());
                }
            }
        }

        let status = merge(statuses);
        debug!(status = %status, "Health evaluated");
        HealthDocument {
            status,
            version: self.version.clone(),
            release_id: self.release_id.clone(),
            details,
            output: (!outputs.is_empty()).then(|| outputs.join("\n")),
        }
    }
}

/// Serves the health document, e.g. `.route("/health", get(health_handler))`.
pub async fn health_handler(State(health): State<Arc<Health>>) -> HealthDocument {
    health.evaluate().await
}
