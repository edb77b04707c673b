//! Email-link handlers: verification, password reset, change of address.

use axum::Json;
use axum::extract::{Extension, Query, State};
use axum::response::Html;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{
    ChangeEmailRequest, EmailRequest, MessageResponse, ResetPasswordRequest, VerifyEmailQuery,
};
use crate::services::account;
use crate::services::identity::CurrentUser;

/// `GET /auth/verify-email?token=`: always a page, never a token error.
pub async fn verify_email_handler(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> AppResult<Html<String>> {
    let outcome = account::verify_email(&state, query.token.as_deref()).await?;
    Ok(Html(outcome.render_html(&state.config.frontend_url)))
}

/// `POST /auth/resend-verification`
pub async fn resend_verification_handler(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> Json<MessageResponse> {
    Json(account::request_email_verification(&state, &body.email).await)
}

/// `POST /auth/forgot-password`: identical response for every address.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> Json<MessageResponse> {
    Json(account::request_password_reset(&state, &body.email).await)
}

/// `POST /auth/reset-password`
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = account::reset_password(&state, &body.token, body.new_password).await?;
    Ok(Json(resp))
}

/// `POST /auth/change-email`: requires a session.
pub async fn change_email_handler(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<ChangeEmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = account::change_email(&state, &user, &body.new_email).await?;
    Ok(Json(resp))
}
