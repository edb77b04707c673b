//! Authentication middleware: session resolution and role gates.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::AppState;
use crate::error::AppError;
use crate::services::identity::{CurrentUser, Role, bearer_credential, current_user, require_role};

/// Resolves the access credential (cookie, then `Authorization: Bearer`) and
/// injects [`CurrentUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let credential = bearer_credential(&jar, request.headers());
    let user = current_user(state.store.as_ref(), &state.tokens, credential.as_deref()).await?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

fn gate(request: &Request, role: Role) -> Result<(), AppError> {
    let CurrentUser(user) = request
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?;
    require_role(user, role)
}

/// Must run inside [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    gate(&request, Role::Admin)?;
    Ok(next.run(request).await)
}

/// Must run inside [`require_auth`].
pub async fn require_super_admin(request: Request, next: Next) -> Result<Response, AppError> {
    gate(&request, Role::SuperAdmin)?;
    Ok(next.run(request).await)
}
