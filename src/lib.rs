// src/lib.rs

pub mod changelog;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod health;
pub mod middleware;
pub mod model;
pub mod principal;
pub mod responses;
pub mod validator;

/// The public prelude for the `nila-api-guard` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::changelog::{changelog_handler, Changelog};
    pub use crate::client::{JwksClient, KeySet};
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::decoder::Claims;
    pub use crate::error::NilaGuardError;
    pub use crate::health::{health_handler, FnCheck, Health, HealthCheck, HealthStatus, HttpCheck};
    pub use crate::middleware::{
        claim_scopes, claim_subject, require_auth, AuthState, Authenticator, TokenClaims,
        VerifiedIdentity,
    };
    pub use crate::principal::PrincipalMakeSpan;
    pub use crate::responses::{created, deleted, updated};
    pub use crate::validator::Validator;
}
