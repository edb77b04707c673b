//! API server configuration.

use std::time::Duration;

use signlearn_core::auth::handoff::HANDOFF_TTL;
use signlearn_core::auth::tokens::{TokenLifetimes, resolve_signing_secret};

/// `SameSite` policy for the session cookies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CookieSameSite {
    /// Frontend on another site: `SameSite=None; Partitioned`.
    None,
    Lax,
    Strict,
}

impl CookieSameSite {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "lax" => Some(Self::Lax),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Attributes shared by both session cookies.
#[derive(Clone, Debug)]
pub struct CookieSettings {
    /// `Secure` flag. Only ever disabled for plain-HTTP local development.
    pub secure: bool,
    pub same_site: CookieSameSite,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: true,
            same_site: CookieSameSite::None,
        }
    }
}

/// Registered OAuth client for one provider.
#[derive(Clone, Debug)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// SMTP transport settings.
#[derive(Clone, Debug)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub from_name: String,
}

/// Third-party email validation endpoint.
#[derive(Clone, Debug)]
pub struct EmailValidationConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:8000").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Token signing secret.
    pub signing_secret: String,
    pub token_lifetimes: TokenLifetimes,
    /// Public frontend origin, used for links and post-login redirects.
    pub frontend_url: String,
    /// Public origin of this API, used for the email verification link.
    pub api_base_url: String,
    pub cookies: CookieSettings,
    pub google: Option<OAuthClientConfig>,
    pub facebook: Option<OAuthClientConfig>,
    pub mail: Option<MailConfig>,
    pub email_validation: Option<EmailValidationConfig>,
    /// Handoff code lifetime.
    pub handoff_ttl: Duration,
    /// Upper bound of the random delay added to forgot-password responses.
    pub forgot_password_jitter_ms: u64,
    /// Timeout for outbound provider and mail calls.
    pub upstream_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".into(),
            database_url: "postgres://localhost:5432/signlearn".into(),
            signing_secret: "dev-secret-key".into(),
            token_lifetimes: TokenLifetimes::default(),
            frontend_url: "http://localhost:3000".into(),
            api_base_url: "http://localhost:8000".into(),
            cookies: CookieSettings::default(),
            google: None,
            facebook: None,
            mail: None,
            email_validation: None,
            handoff_ttl: HANDOFF_TTL,
            forgot_password_jitter_ms: 250,
            upstream_timeout: Duration::from_secs(10),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn oauth_client_from_env(prefix: &str) -> Option<OAuthClientConfig> {
    Some(OAuthClientConfig {
        client_id: env_string(&format!("{prefix}_CLIENT_ID"))?,
        client_secret: env_string(&format!("{prefix}_CLIENT_SECRET"))?,
        redirect_uri: env_string(&format!("{prefix}_REDIRECT_URI"))?,
    })
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                      | Default                                  |
    /// |-------------------------------|------------------------------------------|
    /// | `BIND_ADDR`                   | `127.0.0.1:8000`                         |
    /// | `DATABASE_URL`                | `postgres://localhost:5432/signlearn`    |
    /// | `SECRET_KEY` / `JWT_SECRET`   | generated & persisted to file            |
    /// | `ACCESS_TOKEN_TTL_SECS`       | `3600`                                   |
    /// | `REFRESH_TOKEN_TTL_SECS`      | `604800`                                 |
    /// | `EMAIL_VERIFICATION_TTL_SECS` | `86400`                                  |
    /// | `PASSWORD_RESET_TTL_SECS`     | `3600`                                   |
    /// | `FRONTEND_URL`                | `http://localhost:3000`                  |
    /// | `API_BASE_URL`                | `http://localhost:8000`                  |
    /// | `COOKIE_SECURE`               | `true`                                   |
    /// | `COOKIE_SAMESITE`             | `none` (`lax`, `strict`)                 |
    /// | `GOOGLE_CLIENT_ID` etc.       | provider disabled                        |
    /// | `FACEBOOK_CLIENT_ID` etc.     | provider disabled                        |
    /// | `MAIL_SERVER` etc.            | mails are logged, not sent               |
    /// | `EMAIL_VALIDATION_API_KEY`    | format check only                        |
    /// | `HANDOFF_TTL_SECS`            | `120`                                    |
    /// | `FORGOT_PASSWORD_JITTER_MS`   | `250`                                    |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let lifetimes = TokenLifetimes {
            access_secs: env_parse("ACCESS_TOKEN_TTL_SECS")
                .unwrap_or(defaults.token_lifetimes.access_secs),
            refresh_secs: env_parse("REFRESH_TOKEN_TTL_SECS")
                .unwrap_or(defaults.token_lifetimes.refresh_secs),
            email_verification_secs: env_parse("EMAIL_VERIFICATION_TTL_SECS")
                .unwrap_or(defaults.token_lifetimes.email_verification_secs),
            password_reset_secs: env_parse("PASSWORD_RESET_TTL_SECS")
                .unwrap_or(defaults.token_lifetimes.password_reset_secs),
        };

        let mail = env_string("MAIL_SERVER").map(|server| MailConfig {
            server,
            port: env_parse("MAIL_PORT").unwrap_or(587),
            username: env_string("MAIL_USERNAME").unwrap_or_default(),
            password: env_string("MAIL_PASSWORD").unwrap_or_default(),
            from: env_string("MAIL_FROM").unwrap_or_else(|| "no-reply@signlearn.app".into()),
            from_name: env_string("MAIL_FROM_NAME").unwrap_or_else(|| "SignLearn".into()),
        });

        let email_validation = env_string("EMAIL_VALIDATION_API_KEY").map(|api_key| {
            EmailValidationConfig {
                api_key,
                base_url: env_string("EMAIL_VALIDATION_URL").unwrap_or_else(|| {
                    "https://emailvalidation.abstractapi.com/v1/".into()
                }),
                timeout: Duration::from_secs(env_parse("EMAIL_VALIDATION_TIMEOUT_SECS").unwrap_or(5)),
            }
        });

        Self {
            bind_addr: env_string("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: env_string("DATABASE_URL").unwrap_or(defaults.database_url),
            signing_secret: resolve_signing_secret(),
            token_lifetimes: lifetimes,
            frontend_url: env_string("FRONTEND_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.frontend_url),
            api_base_url: env_string("API_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            cookies: CookieSettings {
                secure: env_bool("COOKIE_SECURE").unwrap_or(true),
                same_site: env_string("COOKIE_SAMESITE")
                    .and_then(|v| CookieSameSite::parse(&v))
                    .unwrap_or(CookieSameSite::None),
            },
            google: oauth_client_from_env("GOOGLE"),
            facebook: oauth_client_from_env("FACEBOOK"),
            mail,
            email_validation,
            handoff_ttl: env_parse("HANDOFF_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.handoff_ttl),
            forgot_password_jitter_ms: env_parse("FORGOT_PASSWORD_JITTER_MS")
                .unwrap_or(defaults.forgot_password_jitter_ms),
            upstream_timeout: defaults.upstream_timeout,
        }
    }
}
