//! Signed, expiring, purpose-scoped tokens (HS256 JWT).
//!
//! Every purpose signs with its own key derived from the shared secret, so a
//! token minted for one flow never verifies for another.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

/// Access token lifetime: 60 minutes.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;

/// Refresh token lifetime: 7 days.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Email verification link lifetime: 24 hours.
pub const EMAIL_VERIFICATION_TTL_SECS: i64 = 24 * 60 * 60;

/// Password reset link lifetime: 60 minutes.
pub const PASSWORD_RESET_TTL_SECS: i64 = 60 * 60;

/// What a token may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Access,
    Refresh,
    EmailVerification,
    /// Confirms a staged address change; subject is the account id.
    EmailChange,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::Access => "access",
            TokenPurpose::Refresh => "refresh",
            TokenPurpose::EmailVerification => "email_verification",
            TokenPurpose::EmailChange => "email_change",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

/// Role snapshot carried in access and refresh tokens.
///
/// Informational only: authorization always re-reads the user row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleClaims {
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_super_admin: bool,
}

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user's email, or the user id for [`TokenPurpose::EmailChange`].
    pub sub: String,
    pub purpose: TokenPurpose,
    #[serde(flatten)]
    pub roles: RoleClaims,
    /// Staged address an email-change token confirms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_email: Option<String>,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token invalid")]
    Invalid,

    #[error("token encode: {0}")]
    Encode(String),
}

/// Per-purpose lifetimes, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_secs: i64,
    pub refresh_secs: i64,
    pub email_verification_secs: i64,
    pub password_reset_secs: i64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_secs: ACCESS_TOKEN_TTL_SECS,
            refresh_secs: REFRESH_TOKEN_TTL_SECS,
            email_verification_secs: EMAIL_VERIFICATION_TTL_SECS,
            password_reset_secs: PASSWORD_RESET_TTL_SECS,
        }
    }
}

impl TokenLifetimes {
    pub fn for_purpose(&self, purpose: TokenPurpose) -> Duration {
        let secs = match purpose {
            TokenPurpose::Access => self.access_secs,
            TokenPurpose::Refresh => self.refresh_secs,
            TokenPurpose::EmailVerification | TokenPurpose::EmailChange => {
                self.email_verification_secs
            }
            TokenPurpose::PasswordReset => self.password_reset_secs,
        };
        Duration::seconds(secs)
    }
}

/// Issues and verifies tokens for every purpose from one server secret.
#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
    lifetimes: TokenLifetimes,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("lifetimes", &self.lifetimes)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>, lifetimes: TokenLifetimes) -> Self {
        Self {
            secret: secret.into(),
            lifetimes,
        }
    }

    pub fn lifetimes(&self) -> &TokenLifetimes {
        &self.lifetimes
    }

    /// Signing key for one purpose: `SHA-256(secret || 0x00 || purpose)`.
    fn purpose_key(&self, purpose: TokenPurpose) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update([0u8]);
        hasher.update(purpose.as_str().as_bytes());
        hasher.finalize().into()
    }

    /// Sign `subject` for `purpose`, expiring `ttl` from now.
    pub fn issue(
        &self,
        purpose: TokenPurpose,
        subject: &str,
        roles: RoleClaims,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        self.sign(&TokenClaims {
            sub: subject.to_string(),
            purpose,
            roles,
            new_email: None,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        })
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.purpose_key(claims.purpose)),
        )
        .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Check signature, purpose and expiry.
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(&self.purpose_key(purpose)),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })?;

        if data.claims.purpose != purpose || data.claims.sub.is_empty() {
            return Err(TokenError::Invalid);
        }
        if purpose == TokenPurpose::EmailChange
            && data.claims.new_email.as_deref().is_none_or(str::is_empty)
        {
            return Err(TokenError::Invalid);
        }
        Ok(data.claims)
    }

    pub fn issue_access(&self, email: &str, roles: RoleClaims) -> Result<String, TokenError> {
        let ttl = self.lifetimes.for_purpose(TokenPurpose::Access);
        self.issue(TokenPurpose::Access, email, roles, ttl)
    }

    pub fn issue_refresh(&self, email: &str, roles: RoleClaims) -> Result<String, TokenError> {
        let ttl = self.lifetimes.for_purpose(TokenPurpose::Refresh);
        self.issue(TokenPurpose::Refresh, email, roles, ttl)
    }

    pub fn issue_email_verification(&self, email: &str) -> Result<String, TokenError> {
        let ttl = self.lifetimes.for_purpose(TokenPurpose::EmailVerification);
        self.issue(
            TokenPurpose::EmailVerification,
            email,
            RoleClaims::default(),
            ttl,
        )
    }

    /// Bound to the account: `sub` is `user_id`, the staged address rides in `new_email`.
    pub fn issue_email_change(&self, user_id: i64, new_email: &str) -> Result<String, TokenError> {
        let now = Utc::now();
        let ttl = self.lifetimes.for_purpose(TokenPurpose::EmailChange);
        self.sign(&TokenClaims {
            sub: user_id.to_string(),
            purpose: TokenPurpose::EmailChange,
            roles: RoleClaims::default(),
            new_email: Some(new_email.to_string()),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        })
    }

    pub fn issue_password_reset(&self, email: &str) -> Result<String, TokenError> {
        let ttl = self.lifetimes.for_purpose(TokenPurpose::PasswordReset);
        self.issue(TokenPurpose::PasswordReset, email, RoleClaims::default(), ttl)
    }
}

/// Resolve the signing secret: env `SECRET_KEY` → `JWT_SECRET` → persisted file.
pub fn resolve_signing_secret() -> String {
    for var in ["SECRET_KEY", "JWT_SECRET"] {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    let secret_path = signing_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    match persist_secret(&secret_path, &secret) {
        Ok(()) => info!(path = %secret_path.display(), "generated new signing secret"),
        Err(e) => warn!(
            path = %secret_path.display(),
            error = %e,
            "could not save generated signing secret"
        ),
    }
    secret
}

fn persist_secret(path: &Path, secret: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, secret)
}

/// Path to the persisted signing secret file.
fn signing_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("signlearn")
        .join("signing-secret")
}
