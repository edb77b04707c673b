//! In-memory [`UserStore`] for tests and database-less local runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::AuthError;
use super::store::UserStore;
use crate::models::{NewUser, User};

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<BTreeMap<i64, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully specified user, e.g. a seeded admin.
    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.user_id, user);
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    async fn update<F>(&self, user_id: i64, f: F) -> Result<(), AuthError>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&user_id) {
            f(user);
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, AuthError> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    async fn username_exists(&self, username: &str) -> Result<bool, AuthError> {
        let users = self.users.read().await;
        Ok(users.values().any(|u| u.username == username))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new_user.email) {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        if users.values().any(|u| u.username == new_user.username) {
            return Err(AuthError::Conflict("Username already taken".into()));
        }
        let user_id = users.keys().next_back().copied().unwrap_or(0) + 1;
        let now = Utc::now();
        let user = User {
            user_id,
            username: new_user.username,
            email: new_user.email,
            temp_email: None,
            password_hash: new_user.password_hash,
            is_admin: false,
            is_super_admin: false,
            is_verified: new_user.is_verified,
            points: 0,
            created_at: now,
            updated_at: now,
        };
        users.insert(user_id, user.clone());
        Ok(user)
    }

    async fn update_password_hash(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        let hash = password_hash.to_string();
        self.update(user_id, |u| u.password_hash = Some(hash)).await
    }

    async fn mark_verified(&self, user_id: i64) -> Result<(), AuthError> {
        self.update(user_id, |u| u.is_verified = true).await
    }

    async fn set_temp_email(&self, user_id: i64, email: Option<&str>) -> Result<(), AuthError> {
        let email = email.map(str::to_string);
        self.update(user_id, |u| u.temp_email = email).await
    }

    async fn promote_temp_email(&self, user_id: i64, expected: &str) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        let pending = users
            .get(&user_id)
            .and_then(|u| u.temp_email.clone())
            .filter(|staged| staged == expected)
            .ok_or_else(|| AuthError::ValidationError("No pending email change".into()))?;
        if users
            .values()
            .any(|u| u.user_id != user_id && u.email == pending)
        {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::ValidationError("No pending email change".into()))?;
        user.email = pending;
        user.temp_email = None;
        user.is_verified = true;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<(), AuthError> {
        self.update(user_id, |u| u.is_admin = is_admin).await
    }
}
