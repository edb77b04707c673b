//! Authentication service: signup, password login, refresh and handoff exchange.

use signlearn_core::auth::password::{
    hash_password_async, validate_password_policy, verify_against_dummy, verify_password_async,
};
use signlearn_core::auth::{TokenPurpose, UserStore};
use signlearn_core::models::{NewUser, User};
use signlearn_core::validation::{is_valid_email, is_valid_username, normalize_email};
use tracing::{info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{LoginRequest, SignupRequest};
use crate::routes::GET_AUTH_VERIFY_EMAIL;
use crate::services::mail::verification_email;

/// `token_type` reported alongside every access token.
pub const TOKEN_TYPE: &str = "bearer";

/// A freshly minted token pair for `user`.
#[derive(Debug)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

/// Create an unverified account and mail its verification link.
pub async fn signup(state: &AppState, req: SignupRequest) -> AppResult<User> {
    let username = req.username.trim().to_string();
    let email = normalize_email(&req.email);

    if !is_valid_username(&username) {
        return Err(AppError::Validation(
            "Username must be 3-150 characters: letters, digits, '_', '.' or '-'".into(),
        ));
    }
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email address".into()));
    }
    validate_password_policy(&req.password)?;

    let store = state.store.as_ref();
    if store.email_exists(&email).await? {
        return Err(AppError::Validation("Email already registered".into()));
    }
    if store.username_exists(&username).await? {
        return Err(AppError::Validation("Username already taken".into()));
    }

    let password_hash = hash_password_async(req.password).await?;
    let user = store
        .create_user(NewUser {
            username,
            email,
            password_hash: Some(password_hash),
            is_verified: false,
        })
        .await?;
    info!(user_id = user.user_id, "user signed up");

    send_verification_link(state, &user.email).await;
    Ok(user)
}

/// Mail a verification link for `email`. Failures are logged only.
pub(crate) async fn send_verification_link(state: &AppState, email: &str) {
    let token = match state.tokens.issue_email_verification(email) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "could not issue verification token");
            return;
        }
    };
    let link = format!(
        "{}{}?token={}",
        state.config.api_base_url, GET_AUTH_VERIFY_EMAIL, token
    );
    if let Err(e) = state.mailer.send(verification_email(email, &link)).await {
        warn!(error = %e, "verification email not sent");
    }
}

/// Check email and password. Unknown email and wrong password are indistinguishable.
pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<Session> {
    let email = normalize_email(&req.email);
    let Some(user) = state.store.find_by_email(&email).await? else {
        verify_against_dummy(req.password).await;
        warn!("login rejected: unknown account");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    };

    let Some(hash) = user.password_hash.clone().filter(|h| !h.is_empty()) else {
        return Err(AppError::Validation(
            "This account signs in with Google or Facebook".into(),
        ));
    };
    if !verify_password_async(req.password, hash).await {
        warn!(user_id = user.user_id, "login rejected: wrong password");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }
    if !user.is_verified {
        return Err(AppError::Forbidden(
            "Please verify your email before signing in.".into(),
        ));
    }

    let session = mint_session(state, user)?;
    info!(user_id = session.user.user_id, "user logged in");
    Ok(session)
}

/// Mint an access/refresh pair carrying the user's current role flags.
pub fn mint_session(state: &AppState, user: User) -> AppResult<Session> {
    let roles = user.roles();
    let access_token = state.tokens.issue_access(&user.email, roles)?;
    let refresh_token = state.tokens.issue_refresh(&user.email, roles)?;
    Ok(Session {
        user,
        access_token,
        refresh_token,
    })
}

/// Mint a new access token from a refresh token. The refresh token is not rotated.
pub async fn refresh(state: &AppState, refresh_token: Option<&str>) -> AppResult<(User, String)> {
    let token = refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Refresh token missing".into()))?;
    let claims = state.tokens.verify(token, TokenPurpose::Refresh)?;
    let user = state
        .store
        .find_by_email(&claims.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    let access_token = state.tokens.issue_access(&user.email, user.roles())?;
    Ok((user, access_token))
}

/// Redeem a handoff code for the session it carries.
pub async fn exchange_handoff(state: &AppState, code: &str) -> AppResult<Session> {
    let refresh_token = state
        .handoff
        .pop_refresh(code.trim())
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired code".into()))?;
    let (user, access_token) = refresh(state, Some(&refresh_token)).await?;
    Ok(Session {
        user,
        access_token,
        refresh_token,
    })
}

/// Whether an account exists for `email`.
pub async fn email_exists(store: &dyn UserStore, email: &str) -> AppResult<bool> {
    Ok(store.email_exists(&normalize_email(email)).await?)
}
