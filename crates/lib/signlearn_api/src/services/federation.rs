//! OAuth federation (Google, Facebook).
//!
//! The authorization-code dance ends in a local account: an unknown email
//! creates a passwordless, already-verified user, and either way the caller
//! receives a fresh access/refresh token pair for that user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use signlearn_core::auth::single_use::{DEFAULT_CAPACITY, SingleUseStore};
use signlearn_core::auth::{AuthError, TokenError, TokenService, UserStore};
use signlearn_core::models::{NewUser, User};
use signlearn_core::validation::{is_valid_email, normalize_email, username_base};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::config::{ApiConfig, OAuthClientConfig};

/// TTL for pending login state (10 minutes).
pub const LOGIN_STATE_TTL: Duration = Duration::from_secs(600);

/// Attempts at a random username suffix before giving up.
const USERNAME_ATTEMPTS: usize = 20;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const FACEBOOK_AUTH_URL: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const FACEBOOK_TOKEN_URL: &str = "https://graph.facebook.com/v19.0/oauth/access_token";
const FACEBOOK_PROFILE_URL: &str = "https://graph.facebook.com/v19.0/me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Facebook,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
        }
    }
}

/// Federation failures. Only [`FederationError::public_code`] reaches the browser.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("{0} login is not configured")]
    NotConfigured(&'static str),

    #[error("invalid or expired login state")]
    InvalidState,

    #[error("login state does not belong to this browser")]
    StateMismatch,

    #[error("provider returned an error: {0}")]
    ProviderDenied(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("profile fetch failed: {0}")]
    Profile(String),

    #[error("provider did not return an email address")]
    MissingEmail,

    #[error("provider reports the email address as unverified")]
    EmailNotVerified,

    #[error("user store: {0}")]
    Store(#[from] AuthError),

    #[error("token issue: {0}")]
    Token(#[from] TokenError),
}

impl FederationError {
    /// Short code appended to the frontend's login page on failure.
    pub fn public_code(&self) -> &'static str {
        match self {
            FederationError::MissingEmail => "oauth_no_email",
            _ => "oauth_failed",
        }
    }
}

/// Profile fields we need from a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderProfile {
    pub email: Option<String>,
    /// `None` when the provider does not report verification.
    pub email_verified: Option<bool>,
    pub display_name: Option<String>,
}

/// One OAuth 2.0 identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Where to send the browser to start the login.
    fn authorization_url(&self, state: &str) -> Result<Url, FederationError>;

    /// Trade the callback's authorization code for a provider access token.
    async fn exchange_code(&self, code: &str) -> Result<String, FederationError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, FederationError>;
}

#[derive(Debug, Deserialize)]
struct ProviderTokenResponse {
    access_token: String,
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    map: fn(String) -> FederationError,
) -> Result<T, FederationError> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(map(format!("HTTP {status}: {body}")));
    }
    resp.json::<T>()
        .await
        .map_err(|e| map(format!("response parse error: {}", redacted(e))))
}

/// Error text without the request URL, which may carry secrets in its query.
fn redacted(e: reqwest::Error) -> String {
    e.without_url().to_string()
}

// ---------------------------------------------------------------------------
// Google
// ---------------------------------------------------------------------------

pub struct GoogleProvider {
    config: OAuthClientConfig,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: OAuthClientConfig, timeout: Duration) -> Self {
        Self {
            config,
            client: http_client(timeout),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(&self, state: &str) -> Result<Url, FederationError> {
        Url::parse_with_params(
            GOOGLE_AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| FederationError::ProviderDenied(format!("auth url: {e}")))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, FederationError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let resp = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| FederationError::TokenExchange(redacted(e)))?;
        let token: ProviderTokenResponse = read_json(resp, FederationError::TokenExchange).await?;
        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, FederationError> {
        let resp = self
            .client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FederationError::Profile(redacted(e)))?;
        let info: GoogleUserInfo = read_json(resp, FederationError::Profile).await?;
        Ok(ProviderProfile {
            email: info.email,
            email_verified: info.email_verified,
            display_name: info.name,
        })
    }
}

// ---------------------------------------------------------------------------
// Facebook
// ---------------------------------------------------------------------------

pub struct FacebookProvider {
    config: OAuthClientConfig,
    client: reqwest::Client,
}

impl FacebookProvider {
    pub fn new(config: OAuthClientConfig, timeout: Duration) -> Self {
        Self {
            config,
            client: http_client(timeout),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FacebookProfile {
    email: Option<String>,
    name: Option<String>,
}

#[async_trait]
impl IdentityProvider for FacebookProvider {
    fn provider(&self) -> Provider {
        Provider::Facebook
    }

    fn authorization_url(&self, state: &str) -> Result<Url, FederationError> {
        Url::parse_with_params(
            FACEBOOK_AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "email public_profile"),
                ("state", state),
            ],
        )
        .map_err(|e| FederationError::ProviderDenied(format!("auth url: {e}")))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, FederationError> {
        let resp = self
            .client
            .get(FACEBOOK_TOKEN_URL)
            .query(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| FederationError::TokenExchange(redacted(e)))?;
        let token: ProviderTokenResponse = read_json(resp, FederationError::TokenExchange).await?;
        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, FederationError> {
        let resp = self
            .client
            .get(FACEBOOK_PROFILE_URL)
            .query(&[("fields", "id,name,email"), ("access_token", access_token)])
            .send()
            .await
            .map_err(|e| FederationError::Profile(redacted(e)))?;
        let profile: FacebookProfile = read_json(resp, FederationError::Profile).await?;
        Ok(ProviderProfile {
            email: profile.email,
            email_verified: None,
            display_name: profile.name,
        })
    }
}

// ---------------------------------------------------------------------------
// Login flow
// ---------------------------------------------------------------------------

/// State kept between `begin_login` and the callback.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub provider: Provider,
    pub next: Option<String>,
}

/// Result of a completed federated login.
#[derive(Debug)]
pub struct FederatedLogin {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub next: Option<String>,
    pub created: bool,
}

/// Configured providers plus the pending-login store.
pub struct Federation {
    google: Option<Arc<dyn IdentityProvider>>,
    facebook: Option<Arc<dyn IdentityProvider>>,
    pending: Arc<SingleUseStore<PendingLogin>>,
}

impl Federation {
    pub fn new(
        google: Option<Arc<dyn IdentityProvider>>,
        facebook: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        Self {
            google,
            facebook,
            pending: Arc::new(SingleUseStore::new(LOGIN_STATE_TTL, DEFAULT_CAPACITY)),
        }
    }

    /// Providers for every client configured in `config`.
    pub fn from_config(config: &ApiConfig) -> Self {
        let timeout = config.upstream_timeout;
        let google = config.google.clone().map(|c| {
            Arc::new(GoogleProvider::new(c, timeout)) as Arc<dyn IdentityProvider>
        });
        let facebook = config.facebook.clone().map(|c| {
            Arc::new(FacebookProvider::new(c, timeout)) as Arc<dyn IdentityProvider>
        });
        Self::new(google, facebook)
    }

    /// No providers configured.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn pending_logins(&self) -> &Arc<SingleUseStore<PendingLogin>> {
        &self.pending
    }

    fn provider(&self, provider: Provider) -> Result<&Arc<dyn IdentityProvider>, FederationError> {
        let configured = match provider {
            Provider::Google => self.google.as_ref(),
            Provider::Facebook => self.facebook.as_ref(),
        };
        configured.ok_or(FederationError::NotConfigured(provider.as_str()))
    }

    /// Record the login attempt. Returns the provider redirect and its `state`.
    pub fn begin_login(
        &self,
        provider: Provider,
        next: Option<&str>,
    ) -> Result<(Url, String), FederationError> {
        let idp = self.provider(provider)?;
        let state = self.pending.insert(PendingLogin {
            provider,
            next: next.and_then(safe_next),
        });
        Ok((idp.authorization_url(&state)?, state))
    }

    /// Finish the login: check state, exchange the code, upsert the user, mint tokens.
    pub async fn complete_login(
        &self,
        provider: Provider,
        code: &str,
        state: &str,
        store: &dyn UserStore,
        tokens: &TokenService,
    ) -> Result<FederatedLogin, FederationError> {
        let idp = self.provider(provider)?;
        let pending = self
            .pending
            .take(state)
            .filter(|p| p.provider == provider)
            .ok_or(FederationError::InvalidState)?;

        let provider_token = idp.exchange_code(code).await?;
        let profile = idp.fetch_profile(&provider_token).await?;

        let email = profile
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| is_valid_email(e))
            .ok_or(FederationError::MissingEmail)?;
        if profile.email_verified == Some(false) {
            return Err(FederationError::EmailNotVerified);
        }

        let (user, created) = upsert_user(store, &email, profile.display_name.as_deref()).await?;
        let roles = user.roles();
        let access_token = tokens.issue_access(&user.email, roles)?;
        let refresh_token = tokens.issue_refresh(&user.email, roles)?;
        info!(email = %user.email, provider = provider.as_str(), created, "federated login");

        Ok(FederatedLogin {
            user,
            access_token,
            refresh_token,
            next: pending.next,
            created,
        })
    }
}

/// Find the local user for `email`, creating a passwordless verified one if absent.
pub async fn upsert_user(
    store: &dyn UserStore,
    email: &str,
    display_name: Option<&str>,
) -> Result<(User, bool), FederationError> {
    if let Some(user) = store.find_by_email(email).await? {
        if !user.is_verified {
            store.mark_verified(user.user_id).await?;
            return Ok((
                User {
                    is_verified: true,
                    ..user
                },
                false,
            ));
        }
        return Ok((user, false));
    }

    let username = unique_username(store, &username_base(display_name, email)).await?;
    let created = store
        .create_user(NewUser {
            username,
            email: email.to_string(),
            password_hash: None,
            is_verified: true,
        })
        .await;
    match created {
        Ok(user) => Ok((user, true)),
        // Lost a race with a concurrent first login for the same email.
        Err(AuthError::Conflict(_)) => match store.find_by_email(email).await? {
            Some(user) => Ok((user, false)),
            None => Err(FederationError::Store(AuthError::Conflict(
                "Username already taken".into(),
            ))),
        },
        Err(e) => Err(e.into()),
    }
}

/// `base`, or `base` plus a random numeric suffix, whichever is free.
pub async fn unique_username(store: &dyn UserStore, base: &str) -> Result<String, AuthError> {
    use rand::Rng;

    if !store.username_exists(base).await? {
        return Ok(base.to_string());
    }
    for _ in 0..USERNAME_ATTEMPTS {
        let candidate = format!("{base}{}", rand::rng().random_range(1000..1_000_000));
        if !store.username_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    warn!(base, "username suffixes exhausted, falling back to random handle");
    Ok(format!(
        "user_{}",
        signlearn_core::auth::single_use::generate_key()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(16)
            .collect::<String>()
            .to_ascii_lowercase()
    ))
}

/// Accept a post-login redirect hint only if it is a same-origin relative path.
pub fn safe_next(next: &str) -> Option<String> {
    let next = next.trim();
    let ok = next.starts_with('/')
        && !next.starts_with("//")
        && !next.contains('\\')
        && !next.chars().any(char::is_control)
        && next.len() <= 512;
    ok.then(|| next.to_string())
}

/// Where to land after a successful login.
pub fn landing_path(user: &User, next: Option<&str>) -> String {
    if let Some(path) = next.and_then(safe_next) {
        return path;
    }
    if user.roles().is_admin {
        "/admin".into()
    } else {
        "/dashboard".into()
    }
}
