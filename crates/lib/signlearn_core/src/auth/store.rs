//! The user store seen by the auth flows.
//!
//! Production uses [`super::queries::PgUserStore`]; tests and local runs
//! without Postgres use [`super::memory::MemoryUserStore`].

use async_trait::async_trait;

use super::AuthError;
use crate::models::{NewUser, User};

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Exact (case-sensitive) email match.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, AuthError>;

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError>;

    async fn username_exists(&self, username: &str) -> Result<bool, AuthError>;

    /// Insert a user. Duplicate email or username yields [`AuthError::Conflict`].
    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError>;

    async fn update_password_hash(&self, user_id: i64, password_hash: &str)
    -> Result<(), AuthError>;

    async fn mark_verified(&self, user_id: i64) -> Result<(), AuthError>;

    async fn set_temp_email(&self, user_id: i64, email: Option<&str>) -> Result<(), AuthError>;

    /// Move `temp_email` into `email` and mark the account verified.
    ///
    /// Only when the staged address still equals `expected`.
    async fn promote_temp_email(&self, user_id: i64, expected: &str) -> Result<User, AuthError>;

    async fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<(), AuthError>;
}
