//! Postgres-backed [`UserStore`].

use async_trait::async_trait;
use sqlx::PgPool;

use super::AuthError;
use super::store::UserStore;
use crate::models::{NewUser, User};

const USER_COLUMNS: &str = "user_id, username, email, temp_email, password_hash, is_admin, \
     is_super_admin, is_verified, points, created_at, updated_at";

/// User store over the `users` table.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

/// Map unique-constraint violations to [`AuthError::Conflict`].
fn map_unique(e: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        let what = match db.constraint() {
            Some(c) if c.contains("username") => "Username already taken",
            _ => "Email already registered",
        };
        return AuthError::Conflict(what.into());
    }
    AuthError::DbError(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.find_one("email", email).await
    }

    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn username_exists(&self, username: &str) -> Result<bool, AuthError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AuthError> {
        let sql = format!(
            "INSERT INTO users (username, email, password_hash, is_verified) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(new_user.is_verified)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique)
    }

    async fn update_password_hash(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE user_id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_verified(&self, user_id: i64) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET is_verified = TRUE, updated_at = now() WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_temp_email(&self, user_id: i64, email: Option<&str>) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET temp_email = $2, updated_at = now() WHERE user_id = $1")
            .bind(user_id)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn promote_temp_email(&self, user_id: i64, expected: &str) -> Result<User, AuthError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "UPDATE users SET email = temp_email, temp_email = NULL, is_verified = TRUE, \
             updated_at = now() \
             WHERE user_id = $1 AND temp_email = $2 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(expected)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_unique)?;
        match row {
            Some(user) => {
                tx.commit().await?;
                Ok(user)
            }
            None => {
                tx.rollback().await?;
                Err(AuthError::ValidationError("No pending email change".into()))
            }
        }
    }

    async fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET is_admin = $2, updated_at = now() WHERE user_id = $1")
            .bind(user_id)
            .bind(is_admin)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
