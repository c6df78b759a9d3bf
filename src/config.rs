// src/config.rs

use crate::error::NilaGuardError;
use std::time::Duration;
use url::Url;

/// Default timeout applied to every key set fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Contains the checks applied to the temporal claims of a bearer token.
#[derive(Clone, Debug, Default)]
pub struct ValidationDetails {
    /// The tolerance for clock skew when validating `exp` and `nbf`.
    /// Defaults to zero: a token is expired at its `exp` second.
    pub leeway: Duration,
}

/// The main configuration for the bearer-token authenticator.
///
/// This struct holds everything needed to reach the identity provider and
/// verify tokens. It should be constructed using the `ConfigBuilder`.
#[derive(Clone, Debug)]
pub struct Config {
    /// The identity provider's JSON Web Key Set URL.
    pub jwks_uri: Url,
    /// Timeout for a single key set fetch.
    pub timeout: Duration,
    /// How long a fetched key set may be reused. `None` fetches on every request.
    pub cache_ttl: Option<Duration>,
    /// The validation parameters applied to the token's claims.
    pub validation: ValidationDetails,
}

/// A builder for creating a `Config` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    jwks_uri: Option<Url>,
    timeout: Option<Duration>,
    cache_ttl: Option<Duration>,
    validation: ValidationDetails,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identity provider's key set URL. This is a required field.
    ///
    /// # Arguments
    ///
    /// * `url` - The JWKS URL, e.g., "https://login.example.com/common/discovery/keys".
    pub fn jwks_uri(mut self, url: &str) -> Result<Self, NilaGuardError> {
        let parsed_url = Url::parse(url).map_err(|e| NilaGuardError::InvalidUrl(e.to_string()))?;
        self.jwks_uri = Some(parsed_url);
        Ok(self)
    }

    /// Sets the key set fetch timeout. Defaults to 10 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables caching of the fetched key set for the given duration.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the clock skew tolerance. Defaults to zero.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if `jwks_uri` is missing or the timeout is zero.
    pub fn build(self) -> Result<Config, NilaGuardError> {
        let jwks_uri = self
            .jwks_uri
            .ok_or_else(|| NilaGuardError::MissingConfiguration("jwks_uri".to_string()))?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(NilaGuardError::MissingConfiguration(
                "timeout must be greater than zero".to_string(),
            ));
        }

        Ok(Config {
            jwks_uri,
            timeout,
            cache_ttl: self.cache_ttl,
            validation: self.validation,
        })
    }
}
