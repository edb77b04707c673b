//! Email-link flows: password reset, verification, change of address.
//!
//! Request endpoints answer with one fixed message whatever the input, so
//! they cannot be used to discover which addresses have accounts. Mail goes out
//! on a spawned task so response time does not depend on the lookup result.

use std::time::Duration;

use rand::Rng;
use signlearn_core::auth::password::{
    hash_password_async, validate_password_policy, verify_password_async,
};
use signlearn_core::auth::{AuthError, TokenError, TokenPurpose};
use signlearn_core::models::User;
use signlearn_core::validation::{is_valid_email, normalize_email};
use tracing::{error, info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::MessageResponse;
use crate::routes::GET_AUTH_VERIFY_EMAIL;
use crate::services::auth::send_verification_link;
use crate::services::mail::{password_reset_email, verification_email};

pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent.";
pub const VERIFICATION_REQUESTED_MESSAGE: &str =
    "If that account still needs verification, a new link has been sent.";

/// Mail a reset link if `email` belongs to an account. Always the same answer.
pub async fn request_password_reset(state: &AppState, email: &str) -> MessageResponse {
    let email = normalize_email(email);
    match state.store.find_by_email(&email).await {
        Ok(Some(user)) => {
            let state = state.clone();
            tokio::spawn(async move { send_reset_link(&state, &user).await });
        }
        Ok(None) => {}
        Err(e) => error!(error = %e, "password reset lookup failed"),
    }
    jitter(state.config.forgot_password_jitter_ms).await;
    MessageResponse::new(RESET_REQUESTED_MESSAGE)
}

async fn send_reset_link(state: &AppState, user: &User) {
    let token = match state.tokens.issue_password_reset(&user.email) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "could not issue reset token");
            return;
        }
    };
    let link = format!("{}/reset-password?token={}", state.config.frontend_url, token);
    match state.mailer.send(password_reset_email(&user.email, &link)).await {
        Ok(()) => info!(user_id = user.user_id, "password reset mailed"),
        Err(e) => warn!(user_id = user.user_id, error = %e, "password reset email not sent"),
    }
}

/// Random 0..=`max_ms` delay.
async fn jitter(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let ms = rand::rng().random_range(0..=max_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Set a new password from a reset link. Links stay usable until they expire.
pub async fn reset_password(
    state: &AppState,
    token: &str,
    new_password: String,
) -> AppResult<MessageResponse> {
    let claims = state
        .tokens
        .verify(token, TokenPurpose::PasswordReset)
        .map_err(|e| match e {
            TokenError::Expired => {
                AppError::Validation("Reset link has expired. Please request a new one.".into())
            }
            _ => AppError::Validation("Reset link is invalid.".into()),
        })?;
    let user = state
        .store
        .find_by_email(&claims.sub)
        .await?
        .ok_or_else(|| AppError::Validation("Reset link is invalid.".into()))?;

    validate_password_policy(&new_password)?;
    if let Some(current) = user.password_hash.clone().filter(|h| !h.is_empty())
        && verify_password_async(new_password.clone(), current).await
    {
        return Err(AppError::Validation(
            "New password must be different from the current password".into(),
        ));
    }

    let hash = hash_password_async(new_password).await?;
    state.store.update_password_hash(user.user_id, &hash).await?;
    info!(user_id = user.user_id, "password reset");
    Ok(MessageResponse::new("Password has been reset. You can now sign in."))
}

/// Re-send the verification link to an unverified account. Always the same answer.
pub async fn request_email_verification(state: &AppState, email: &str) -> MessageResponse {
    let email = normalize_email(email);
    match state.store.find_by_email(&email).await {
        Ok(Some(user)) if !user.is_verified => {
            let state = state.clone();
            tokio::spawn(async move { send_verification_link(&state, &user.email).await });
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "verification lookup failed"),
    }
    jitter(state.config.forgot_password_jitter_ms).await;
    MessageResponse::new(VERIFICATION_REQUESTED_MESSAGE)
}

/// Result of following a verification link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
    EmailChanged,
    /// The staged address was claimed by another account in the meantime.
    EmailTaken,
    Expired,
    Invalid,
}

impl VerifyOutcome {
    fn title_and_message(self) -> (&'static str, &'static str) {
        match self {
            VerifyOutcome::Verified => ("Email verified", "Your email has been verified. You can now sign in."),
            VerifyOutcome::AlreadyVerified => ("Already verified", "This email address is already verified."),
            VerifyOutcome::EmailChanged => ("Email updated", "Your new email address is confirmed."),
            VerifyOutcome::EmailTaken => (
                "Email unavailable",
                "That email address is now used by another account.",
            ),
            VerifyOutcome::Expired => (
                "Link expired",
                "This verification link has expired. Request a new one from the sign-in page.",
            ),
            VerifyOutcome::Invalid => ("Invalid link", "This verification link is not valid."),
        }
    }

    /// Standalone confirmation page linking back to the frontend.
    pub fn render_html(self, frontend_url: &str) -> String {
        let (title, message) = self.title_and_message();
        format!(
            "<!doctype html>\
             <html><head><meta charset=\"utf-8\"><title>{title} | SignLearn</title></head>\
             <body style=\"font-family: sans-serif; text-align: center; padding: 3rem;\">\
             <h1>{title}</h1><p>{message}</p>\
             <p><a href=\"{frontend_url}/login\">Go to SignLearn</a></p>\
             </body></html>"
        )
    }
}

/// Follow a verification or change-of-address link. Repeat visits are harmless.
pub async fn verify_email(state: &AppState, token: Option<&str>) -> AppResult<VerifyOutcome> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Ok(VerifyOutcome::Invalid);
    };

    match state.tokens.verify(token, TokenPurpose::EmailVerification) {
        Ok(claims) => return confirm_account(state, &claims.sub).await,
        Err(TokenError::Expired) => return Ok(VerifyOutcome::Expired),
        Err(_) => {}
    }
    match state.tokens.verify(token, TokenPurpose::EmailChange) {
        Ok(claims) => {
            confirm_new_address(state, &claims.sub, claims.new_email.as_deref()).await
        }
        Err(TokenError::Expired) => Ok(VerifyOutcome::Expired),
        Err(_) => Ok(VerifyOutcome::Invalid),
    }
}

async fn confirm_account(state: &AppState, email: &str) -> AppResult<VerifyOutcome> {
    let Some(user) = state.store.find_by_email(email).await? else {
        return Ok(VerifyOutcome::Invalid);
    };
    if user.is_verified {
        return Ok(VerifyOutcome::AlreadyVerified);
    }
    state.store.mark_verified(user.user_id).await?;
    info!(user_id = user.user_id, "email verified");
    Ok(VerifyOutcome::Verified)
}

async fn confirm_new_address(
    state: &AppState,
    subject: &str,
    new_email: Option<&str>,
) -> AppResult<VerifyOutcome> {
    let (Ok(user_id), Some(new_email)) = (subject.parse::<i64>(), new_email) else {
        return Ok(VerifyOutcome::Invalid);
    };
    let Some(user) = state.store.find_by_id(user_id).await? else {
        return Ok(VerifyOutcome::Invalid);
    };
    if user.temp_email.as_deref() != Some(new_email) {
        // Promoted by an earlier visit, or superseded by a newer request.
        return Ok(if user.email == new_email {
            VerifyOutcome::AlreadyVerified
        } else {
            VerifyOutcome::Invalid
        });
    }
    if state.store.email_exists(new_email).await? {
        return Ok(VerifyOutcome::EmailTaken);
    }
    match state.store.promote_temp_email(user.user_id, new_email).await {
        Ok(_) => {
            info!(user_id = user.user_id, "email address changed");
            Ok(VerifyOutcome::EmailChanged)
        }
        Err(AuthError::Conflict(_)) => Ok(VerifyOutcome::EmailTaken),
        Err(AuthError::ValidationError(_)) => Ok(VerifyOutcome::Invalid),
        Err(e) => Err(e.into()),
    }
}

/// Stage `new_email` on the account and mail a confirmation link to it.
pub async fn change_email(
    state: &AppState,
    user: &User,
    new_email: &str,
) -> AppResult<MessageResponse> {
    let new_email = normalize_email(new_email);
    if !is_valid_email(&new_email) {
        return Err(AppError::Validation("Invalid email address".into()));
    }
    if new_email == user.email {
        return Err(AppError::Validation("That is already your email address".into()));
    }
    if state.store.email_exists(&new_email).await? {
        return Err(AppError::Validation("Email already registered".into()));
    }

    state
        .store
        .set_temp_email(user.user_id, Some(&new_email))
        .await?;
    let token = state.tokens.issue_email_change(user.user_id, &new_email)?;
    let link = format!(
        "{}{}?token={}",
        state.config.api_base_url, GET_AUTH_VERIFY_EMAIL, token
    );
    if let Err(e) = state
        .mailer
        .send(verification_email(&new_email, &link))
        .await
    {
        warn!(user_id = user.user_id, error = %e, "change-email link not sent");
    }
    info!(user_id = user.user_id, "email change requested");
    Ok(MessageResponse::new(
        "Check your new inbox for a confirmation link.",
    ))
}
