//! Admin role handlers.

use axum::Json;
use axum::extract::{Extension, Path, State};
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{AdminSessionResponse, MessageResponse, SetAdminRequest};
use crate::services::identity::CurrentUser;

/// `GET /admin/session`: confirms admin access for the frontend.
pub async fn admin_session_handler(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<AdminSessionResponse> {
    let roles = user.roles();
    Json(AdminSessionResponse {
        email: user.email,
        username: user.username,
        is_admin: roles.is_admin,
        is_super_admin: roles.is_super_admin,
    })
}

/// `PUT /admin/users/{user_id}/admin`: grant or revoke admin. Super admin only.
pub async fn set_admin_handler(
    State(state): State<AppState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(user_id): Path<i64>,
    Json(body): Json<SetAdminRequest>,
) -> AppResult<Json<MessageResponse>> {
    if user_id == actor.user_id && !body.is_admin {
        return Err(AppError::Forbidden(
            "You cannot remove your own admin access".into(),
        ));
    }
    let target = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    state.store.set_admin(target.user_id, body.is_admin).await?;
    info!(
        actor = actor.user_id,
        target = target.user_id,
        is_admin = body.is_admin,
        "admin flag updated"
    );
    let verb = if body.is_admin { "granted to" } else { "revoked from" };
    Ok(Json(MessageResponse::new(format!(
        "Admin access {verb} {}",
        target.username
    ))))
}
