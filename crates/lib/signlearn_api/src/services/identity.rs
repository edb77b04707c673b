//! Identity resolution and role checks.
//!
//! The access credential is read from the `sl_access` cookie, falling back to
//! an `Authorization: Bearer` header. Role flags always come from the stored
//! user row, never from token claims.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;
use signlearn_core::auth::{TokenPurpose, TokenService, UserStore};
use signlearn_core::models::User;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::services::cookies::ACCESS_COOKIE;

/// Authenticated user, stored in request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Role required by a gated route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    SuperAdmin,
}

/// The raw access credential, cookie first.
pub fn bearer_credential(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_COOKIE)
        && !cookie.value().is_empty()
    {
        return Some(cookie.value().to_string());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Resolve an access credential to the stored user.
pub async fn current_user(
    store: &dyn UserStore,
    tokens: &TokenService,
    credential: Option<&str>,
) -> AppResult<User> {
    let token =
        credential.ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?;
    let claims = tokens.verify(token, TokenPurpose::Access)?;
    match store.find_by_email(&claims.sub).await? {
        Some(user) => Ok(user),
        None => {
            debug!("access token subject no longer exists");
            Err(AppError::Unauthorized("Not authenticated".into()))
        }
    }
}

/// 403 unless `user` currently holds `role`. Super admin implies admin.
pub fn require_role(user: &User, role: Role) -> AppResult<()> {
    let roles = user.roles();
    let allowed = match role {
        Role::Admin => roles.is_admin,
        Role::SuperAdmin => roles.is_super_admin,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(match role {
            Role::Admin => "Admin access required".into(),
            Role::SuperAdmin => "Super admin access required".into(),
        }))
    }
}
