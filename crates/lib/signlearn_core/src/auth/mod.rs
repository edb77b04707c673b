//! Authentication and authorization logic.
//!
//! Provides password hashing, signed tokens, single-use code stores and the
//! user store shared by the HTTP layer.

pub mod handoff;
pub mod memory;
pub mod password;
pub mod queries;
pub mod single_use;
pub mod store;
pub mod tokens;

use thiserror::Error;

pub use password::PolicyViolation;
pub use store::UserStore;
pub use tokens::{TokenError, TokenPurpose, TokenService};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PolicyViolation> for AuthError {
    fn from(v: PolicyViolation) -> Self {
        AuthError::ValidationError(v.to_string())
    }
}
