//! Password hashing via bcrypt, plus the signup/reset password policy.

use std::sync::OnceLock;

use thiserror::Error;
use tracing::warn;

use super::AuthError;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Characters that satisfy the "special character" rule.
const SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Hash a password with bcrypt (cost 10, fresh salt per call).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
///
/// A malformed hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(matches) => matches,
        Err(e) => {
            warn!(error = %e, "stored password hash could not be parsed");
            false
        }
    }
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_async(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
}

/// [`verify_password`] on the blocking pool. A panicked task counts as a mismatch.
pub async fn verify_password_async(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false)
}

/// Burn one bcrypt verification so unknown-account logins take as long as
/// known ones.
pub async fn verify_against_dummy(password: String) {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();
    let hash = match DUMMY_HASH.get() {
        Some(h) => h.clone(),
        None => {
            let h = match hash_password_async("dummy-password-never-matches".into()).await {
                Ok(h) => h,
                Err(_) => return,
            };
            DUMMY_HASH.get_or_init(|| h).clone()
        }
    };
    let _ = verify_password_async(password, hash).await;
}

/// A password policy rule that the candidate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("Password must be at least 8 characters long.")]
    TooShort,

    #[error("Password must contain at least one uppercase letter.")]
    MissingUppercase,

    #[error("Password must contain at least one lowercase letter.")]
    MissingLowercase,

    #[error("Password must contain at least one digit.")]
    MissingDigit,

    #[error("Password must contain at least one special character.")]
    MissingSpecial,

    #[error("Password must not contain spaces.")]
    ContainsWhitespace,
}

/// Check a candidate password against the policy, reporting the first failed rule.
pub fn validate_password_policy(password: &str) -> Result<(), PolicyViolation> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PolicyViolation::TooShort);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PolicyViolation::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(PolicyViolation::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PolicyViolation::MissingDigit);
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        return Err(PolicyViolation::MissingSpecial);
    }
    if password.chars().any(char::is_whitespace) {
        return Err(PolicyViolation::ContainsWhitespace);
    }
    Ok(())
}
