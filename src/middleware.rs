// src/middleware.rs

//! Bearer-token authentication for axum routes.
//!
//! [`Authenticator`] runs the whole pipeline (header parsing, key retrieval,
//! decoding, verification, identity extraction). [`require_auth`] plugs it into
//! a router and enforces the scopes configured on [`AuthState`].

use crate::client::JwksClient;
use crate::config::Config;
use crate::decoder::{decode, Claims};
use crate::error::NilaGuardError;
use crate::validator::Validator;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Derives the subject from a verified claim set.
pub type SubjectExtractor = Arc<dyn Fn(&Claims) -> String + Send + Sync>;

/// Derives the granted scopes from the raw token and its verified claim set.
pub type ScopeExtractor = Arc<dyn Fn(&str, &Claims) -> Vec<String> + Send + Sync>;

/// The authenticated caller, stored in the request extensions.
#[derive(Clone)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub scopes: Vec<String>,
    pub claims: Claims,
}

impl VerifiedIdentity {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|granted| granted == scope)
    }
}

impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("subject", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// The verified claim set, stored in the request extensions next to the identity.
#[derive(Clone, Debug)]
pub struct TokenClaims(pub Claims);

/// Reads a string claim. A missing or non-string claim gives an empty subject.
pub fn claim_subject(field: &str) -> impl Fn(&Claims) -> String + Send + Sync + 'static {
    let field = field.to_string();
    move |claims: &Claims| {
        claims
            .get(&field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// Reads scopes from a claim holding either an array of strings or a single
/// space-separated string (the OAuth2 `scope` convention).
pub fn claim_scopes(field: &str) -> impl Fn(&str, &Claims) -> Vec<String> + Send + Sync + 'static {
    let field = field.to_string();
    move |_token: &str, claims: &Claims| match claims.get(&field) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(value)) => value.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Checks that every required scope was granted.
///
/// # Errors
///
/// Returns `MissingScope` naming the first required scope, in declaration
/// order, that the identity lacks.
pub fn authorize(identity: &VerifiedIdentity, required: &[String]) -> Result<(), NilaGuardError> {
    match required.iter().find(|scope| !identity.has_scope(scope)) {
        Some(missing) => Err(NilaGuardError::MissingScope(missing.clone())),
        None => Ok(()),
    }
}

/// Extracts the credential of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, NilaGuardError> {
    let token = authorization
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(NilaGuardError::MissingCredential)?;
    if token.is_empty() {
        return Err(NilaGuardError::MissingCredential);
    }
    Ok(token)
}

/// Authenticates bearer tokens against one identity provider.
///
/// Cheap to clone; the key set client is shared between clones.
#[derive(Clone)]
pub struct Authenticator {
    jwks_client: JwksClient,
    validator: Validator,
    extract_subject: SubjectExtractor,
    extract_scopes: ScopeExtractor,
}

/// A builder for creating an [`Authenticator`].
pub struct AuthenticatorBuilder {
    config: Config,
    extract_subject: Option<SubjectExtractor>,
    extract_scopes: Option<ScopeExtractor>,
}

impl AuthenticatorBuilder {
    /// Sets how the subject is derived, e.g. `claim_subject("upn")`. Required.
    pub fn subject_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Claims) -> String + Send + Sync + 'static,
    {
        self.extract_subject = Some(Arc::new(extractor));
        self
    }

    /// Sets how the granted scopes are derived, e.g. `claim_scopes("scopes")`. Required.
    pub fn scope_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&str, &Claims) -> Vec<String> + Send + Sync + 'static,
    {
        self.extract_scopes = Some(Arc::new(extractor));
        self
    }

    /// Consumes the builder and returns an `Authenticator`.
    ///
    /// # Errors
    ///
    /// Returns `MissingConfiguration` if either extractor was not set, or
    /// `HttpClient` if the key set client cannot be built.
    pub fn build(self) -> Result<Authenticator, NilaGuardError> {
        let extract_subject = self
            .extract_subject
            .ok_or_else(|| NilaGuardError::MissingConfiguration("subject_extractor".to_string()))?;
        let extract_scopes = self
            .extract_scopes
            .ok_or_else(|| NilaGuardError::MissingConfiguration("scope_extractor".to_string()))?;

        Ok(Authenticator {
            jwks_client: JwksClient::new(&self.config)?,
            validator: Validator::new(self.config.validation.clone()),
            extract_subject,
            extract_scopes,
        })
    }
}

impl Authenticator {
    pub fn builder(config: Config) -> AuthenticatorBuilder {
        AuthenticatorBuilder {
            config,
            extract_subject: None,
            extract_scopes: None,
        }
    }

    pub fn jwks_client(&self) -> &JwksClient {
        &self.jwks_client
    }

    /// Authenticates the value of an `Authorization` header.
    ///
    /// Keys are retrieved before the token is decoded, so a provider outage is
    /// reported even for malformed tokens.
    #[instrument(skip_all, err)]
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<VerifiedIdentity, NilaGuardError> {
        // 1. Extract the credential.
        let token = bearer_token(authorization)?;

        // 2. Retrieve the provider keys.
        let keys = self.jwks_client.key_set().await?;

        // 3. Decode the token.
        let decoded = decode(token)?;

        // 4. Verify it. A kid we do not know may mean the provider rotated keys.
        let claims = match self.validator.verify(&decoded, &keys) {
            Ok(claims) => claims,
            Err(err @ NilaGuardError::UnknownKey { .. }) => {
                self.jwks_client.invalidate().await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        // 5. Build the identity.
        let subject = (self.extract_subject)(&claims);
        let scopes = (self.extract_scopes)(token, &claims);
        debug!(scopes = ?scopes, "Bearer token authenticated");

        Ok(VerifiedIdentity {
            subject,
            scopes,
            claims,
        })
    }
}

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    authenticator: Authenticator,
    required_scopes: Arc<[String]>,
}

impl AuthState {
    /// Protects routes with `authenticator` and no required scopes.
    pub fn new(authenticator: Authenticator) -> Self {
        Self {
            authenticator,
            required_scopes: Arc::from(Vec::new()),
        }
    }

    /// Requires every one of `scopes`, checked in the given order.
    pub fn require_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes: Vec<String> = scopes.into_iter().map(Into::into).collect();
        self.required_scopes = Arc::from(scopes);
        self
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }
}

/// Authentication middleware for protected routes.
///
/// Use with `axum::middleware::from_fn_with_state(state, require_auth)`.
///
/// # Response
///
/// - 401 Unauthorized with `WWW-Authenticate: Bearer` if the token is missing or invalid
/// - 403 Forbidden if a required scope was not granted
/// - Otherwise the wrapped handler runs, with [`VerifiedIdentity`] and
///   [`TokenClaims`] in the request extensions
#[instrument(skip_all, name = "nila.middleware.auth")]
pub async fn require_auth(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, NilaGuardError> {
    // A header that is not visible ASCII counts as no credential.
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let identity = state
        .authenticator
        .authenticate(authorization)
        .await
        .inspect_err(|err| debug!(target: "nila.middleware.auth", error = %err, "Request rejected"))?;

    authorize(&identity, &state.required_scopes).inspect_err(|err| {
        debug!(target: "nila.middleware.auth", error = %err, "Request lacks a required scope")
    })?;

    req.extensions_mut().insert(TokenClaims(identity.claims.clone()));
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
