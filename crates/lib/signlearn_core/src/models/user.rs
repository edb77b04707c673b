//! User domain model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::tokens::RoleClaims;

/// A platform user as stored in the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    /// Pending address from a change-email request, promoted on verification.
    pub temp_email: Option<String>,
    /// `None` for accounts that only ever signed in through a provider.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub is_admin: bool,
    pub is_super_admin: bool,
    pub is_verified: bool,
    pub points: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Role flags as they stand on this row.
    pub fn roles(&self) -> RoleClaims {
        RoleClaims {
            is_admin: self.is_admin || self.is_super_admin,
            is_super_admin: self.is_super_admin,
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Fields needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub is_verified: bool,
}
