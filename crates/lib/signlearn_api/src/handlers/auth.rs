//! Session request handlers.

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use tracing::info;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{
    AccessTokenResponse, EmailExistsResponse, EmailRequest, EmailValidationResponse,
    HandoffExchangeRequest, LoginRequest, LoginResponse, MessageResponse, RefreshRequest,
    SignupRequest, UserView,
};
use crate::services::auth::{self, TOKEN_TYPE};
use crate::services::cookies::REFRESH_COOKIE;
use crate::services::identity::CurrentUser;

fn access_token_response(state: &AppState, access_token: String) -> AccessTokenResponse {
    AccessTokenResponse {
        access_token,
        token_type: TOKEN_TYPE.into(),
        expires_in: state.tokens.lifetimes().access_secs,
    }
}

/// `POST /auth/signup`: create an unverified account.
pub async fn signup_handler(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    auth::signup(&state, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(
            "Account created. Check your email to verify your address.",
        )),
    ))
}

/// `POST /auth/login`: email + password; sets both session cookies.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let session = auth::login(&state, body).await?;
    let jar = state
        .cookies
        .set_session(jar, &session.access_token, &session.refresh_token)?;
    Ok((
        jar,
        Json(LoginResponse {
            ok: true,
            access_token: session.access_token,
            token_type: TOKEN_TYPE.into(),
            expires_in: state.tokens.lifetimes().access_secs,
            user: UserView::from(&session.user),
        }),
    ))
}

/// `POST /auth/logout`: expire both cookies. Works without a session.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    info!("session cookies cleared");
    (
        state.cookies.clear_session(jar),
        Json(MessageResponse::new("Logged out")),
    )
}

/// `GET /auth/me`: the signed-in user.
pub async fn me_handler(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<UserView> {
    Json(UserView::from(&user))
}

/// `POST /auth/refresh`: new access cookie from the refresh cookie or body.
pub async fn refresh_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<AccessTokenResponse>)> {
    let from_cookie = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let token = match from_cookie {
        Some(token) => Some(token),
        None => serde_json::from_slice::<RefreshRequest>(&body)
            .ok()
            .and_then(|b| b.refresh_token),
    };

    let (_, access_token) = auth::refresh(&state, token.as_deref()).await?;
    let jar = state.cookies.set_access(jar, &access_token)?;
    Ok((jar, Json(access_token_response(&state, access_token))))
}

/// `POST /auth/exchange`: redeem a handoff code; sets both cookies.
pub async fn exchange_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<HandoffExchangeRequest>,
) -> AppResult<(CookieJar, Json<AccessTokenResponse>)> {
    let session = auth::exchange_handoff(&state, &body.code).await?;
    let jar = state
        .cookies
        .set_session(jar, &session.access_token, &session.refresh_token)?;
    Ok((jar, Json(access_token_response(&state, session.access_token))))
}

/// `POST /auth/check-email`
pub async fn check_email_handler(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> AppResult<Json<EmailExistsResponse>> {
    let exists = auth::email_exists(state.store.as_ref(), &body.email).await?;
    Ok(Json(EmailExistsResponse { exists }))
}

/// `POST /auth/validate-email`: best-effort deliverability check, fails open.
pub async fn validate_email_handler(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> Json<EmailValidationResponse> {
    Json(state.email_validator.validate(&body.email).await)
}
