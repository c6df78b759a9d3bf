// src/client.rs

use crate::config::Config;
use crate::error::NilaGuardError;
use crate::model::{JsonWebKey, JsonWebKeySet};
use base64::engine::{general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use moka::future::Cache;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

/// Public key material of a JWK, resolved once when the key set is parsed.
#[derive(Clone)]
enum KeyMaterial {
    Rsa(DecodingKey),
    /// The key is listed by the provider but cannot verify RS256 signatures.
    Unusable(String),
}

/// A signing key published by the identity provider.
///
/// The key is immutable once parsed. Whether it was described by its RSA
/// parameters or by a leaf X.509 certificate, it exposes one RSA public key.
#[derive(Clone)]
pub struct Jwk {
    pub kid: String,
    pub kty: Option<String>,
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    pub x5c: Vec<String>,
    material: KeyMaterial,
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kid", &self.kid)
            .field("kty", &self.kty)
            .field("use", &self.use_purpose)
            .field("alg", &self.alg)
            .field("x5c_len", &self.x5c.len())
            .field("usable", &matches!(self.material, KeyMaterial::Rsa(_)))
            .finish()
    }
}

impl Jwk {
    /// Builds a key from one entry of the `keys` array. Keys without a string
    /// `kid` are never selectable and yield `None`; any other malformed member
    /// leaves the key listed but unusable.
    fn from_wire(entry: &Value) -> Option<Self> {
        let kid = match entry.get("kid").and_then(Value::as_str) {
            Some(kid) if !kid.is_empty() => kid.to_string(),
            _ => {
                debug!("Skipping JWK without a key identifier");
                return None;
            }
        };

        let (key, material) = match JsonWebKey::deserialize(entry) {
            Ok(key) => {
                let material = resolve_material(&kid, &key);
                (key, material)
            }
            Err(err) => {
                let text = |name: &str| entry.get(name).and_then(Value::as_str).map(str::to_string);
                let key = JsonWebKey {
                    kty: text("kty"),
                    use_purpose: text("use"),
                    alg: text("alg"),
                    ..JsonWebKey::default()
                };
                (key, KeyMaterial::Unusable(format!("malformed JWK: {err}")))
            }
        };
        if let KeyMaterial::Unusable(reason) = &material {
            warn!(kid = %kid, reason = %reason, "JWK cannot be used for RS256 verification");
        }

        Some(Self {
            kid,
            kty: key.kty,
            use_purpose: key.use_purpose,
            alg: key.alg,
            x5c: key.x5c.unwrap_or_default(),
            material,
        })
    }

    /// Returns the RSA public key of this JWK.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` when the published key material cannot be used.
    pub fn decoding_key(&self) -> Result<&DecodingKey, NilaGuardError> {
        match &self.material {
            KeyMaterial::Rsa(key) => Ok(key),
            KeyMaterial::Unusable(reason) => Err(NilaGuardError::InvalidKey {
                kid: self.kid.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

fn resolve_material(kid: &str, key: &JsonWebKey) -> KeyMaterial {
    if let Some(kty) = key.kty.as_deref().filter(|kty| *kty != "RSA") {
        return KeyMaterial::Unusable(format!("unsupported key type {kty}"));
    }
    if key.use_purpose.as_deref() == Some("enc") {
        return KeyMaterial::Unusable("key is published for encryption only".to_string());
    }

    // RSA parameters take precedence over the certificate chain.
    if let (Some(n), Some(e)) = (&key.n, &key.e) {
        return match DecodingKey::from_rsa_components(n, e) {
            Ok(key) => KeyMaterial::Rsa(key),
            Err(err) => KeyMaterial::Unusable(format!("invalid RSA parameters: {err}")),
        };
    }

    match key.x5c.as_ref().and_then(|chain| chain.first()) {
        Some(leaf) => match key_from_certificate(leaf) {
            Ok(key) => KeyMaterial::Rsa(key),
            Err(reason) => KeyMaterial::Unusable(reason),
        },
        None => {
            debug!(kid = %kid, "JWK carries neither RSA parameters nor a certificate");
            KeyMaterial::Unusable("missing 'n'/'e' and 'x5c'".to_string())
        }
    }
}

/// Extracts the RSA public key of a base64 DER encoded X.509 certificate.
fn key_from_certificate(encoded: &str) -> Result<DecodingKey, String> {
    let der = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("x5c is not valid base64: {e}"))?;
    let certificate =
        Certificate::from_der(&der).map_err(|e| format!("x5c is not a valid certificate: {e}"))?;
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| format!("x5c public key cannot be encoded: {e}"))?;
    let public_key = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| format!("x5c does not hold an RSA public key: {e}"))?;

    Ok(DecodingKey::from_rsa_raw_components(
        &public_key.n().to_bytes_be(),
        &public_key.e().to_bytes_be(),
    ))
}

/// A JSON Web Key Set fetched from one identity provider.
#[derive(Clone, Debug)]
pub struct KeySet {
    source: Url,
    fetched_at: DateTime<Utc>,
    keys: Vec<Jwk>,
    index: HashMap<String, usize>,
}

impl KeySet {
    /// Indexes a parsed JWKS document. Document order is preserved and the
    /// first key wins when a key identifier is repeated.
    pub fn from_document(source: Url, document: JsonWebKeySet) -> Self {
        let keys: Vec<Jwk> = document.keys.iter().filter_map(Jwk::from_wire).collect();
        let mut index = HashMap::with_capacity(keys.len());
        for (position, key) in keys.iter().enumerate() {
            index.entry(key.kid.clone()).or_insert(position);
        }

        Self {
            source,
            fetched_at: Utc::now(),
            keys,
            index,
        }
    }

    /// Returns the key registered under `kid`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKey`, carrying the sorted list of known identifiers.
    pub fn lookup(&self, kid: &str) -> Result<&Jwk, NilaGuardError> {
        self.index
            .get(kid)
            .and_then(|position| self.keys.get(*position))
            .ok_or_else(|| NilaGuardError::UnknownKey {
                kid: kid.to_string(),
                known: self.kids(),
            })
    }

    /// The known key identifiers, sorted.
    pub fn kids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.index.keys().cloned().collect();
        kids.sort();
        kids
    }

    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// A client for fetching JSON Web Key Sets from an identity provider.
///
/// Without a cache TTL every call to [`JwksClient::key_set`] goes to the
/// network. With one, the whole set is reused until it expires or is
/// invalidated.
#[derive(Clone)]
pub struct JwksClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    jwks_uri: Url,
    // Cache stores provider URL -> whole key set.
    cache: Option<Cache<Url, Arc<KeySet>>>,
}

impl JwksClient {
    /// Creates a new `JwksClient` for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns `HttpClient` if the underlying HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, NilaGuardError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NilaGuardError::HttpClient(e.to_string()))?;

        let cache = config.cache_ttl.map(|ttl| {
            Cache::builder()
                .max_capacity(16)
                .time_to_live(ttl)
                .build()
        });

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                jwks_uri: config.jwks_uri.clone(),
                cache,
            }),
        })
    }

    pub fn jwks_uri(&self) -> &Url {
        &self.inner.jwks_uri
    }

    /// Returns the provider's key set, from the cache when one is configured
    /// and still fresh.
    ///
    /// Concurrent misses share a single fetch.
    pub async fn key_set(&self) -> Result<Arc<KeySet>, NilaGuardError> {
        let Some(cache) = &self.inner.cache else {
            return self.fetch().await.map(Arc::new);
        };

        if let Some(key_set) = cache.get(&self.inner.jwks_uri).await {
            debug!(url = %self.inner.jwks_uri, "JWKS cache hit");
            return Ok(key_set);
        }

        debug!(url = %self.inner.jwks_uri, "JWKS cache miss. Fetching from provider.");
        cache
            .try_get_with(self.inner.jwks_uri.clone(), async {
                self.fetch().await.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Drops the cached key set, if any, so the next lookup refetches it.
    pub async fn invalidate(&self) {
        if let Some(cache) = &self.inner.cache {
            debug!(url = %self.inner.jwks_uri, "Invalidating cached JWKS");
            cache.invalidate(&self.inner.jwks_uri).await;
        }
    }

    /// Fetches and parses the key set, bypassing any cache.
    ///
    /// # Errors
    ///
    /// * `NetworkFailure` - the request could not be completed (including timeouts).
    /// * `HttpFailure` - the provider answered with a non-2xx status; the body is kept.
    /// * `ParseFailure` - the body is not a JSON object with a `keys` array.
    #[instrument(skip(self), fields(url = %self.inner.jwks_uri), err)]
    pub async fn fetch(&self) -> Result<KeySet, NilaGuardError> {
        let response = self
            .inner
            .http_client
            .get(self.inner.jwks_uri.clone())
            .send()
            .await
            .map_err(|e| NilaGuardError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    debug!(error = %err, "Failed to read JWKS error response body");
                    String::new()
                }
            };
            return Err(NilaGuardError::HttpFailure {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NilaGuardError::from_transport(&e))?;
        let document: JsonWebKeySet =
            serde_json::from_slice(&body).map_err(|e| NilaGuardError::ParseFailure(e.to_string()))?;

        let key_set = KeySet::from_document(self.inner.jwks_uri.clone(), document);
        debug!("Successfully fetched {} keys", key_set.keys().len());
        Ok(key_set)
    }
}
