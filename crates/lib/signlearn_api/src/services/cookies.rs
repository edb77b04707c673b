//! Cookie service: set/clear the httpOnly session cookies.
//!
//! `sl_access` is sent everywhere; `sl_refresh` only to the refresh endpoint.
//! `sl_oauth_state` ties a pending OAuth login to the browser that started it.
//! Clearing re-issues each cookie with `Max-Age=0` and the same path and
//! flags it was set with, otherwise browsers keep it.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use crate::config::{CookieSameSite, CookieSettings};
use crate::error::{AppError, AppResult};
use crate::routes::POST_AUTH_REFRESH;
use crate::services::federation::LOGIN_STATE_TTL;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "sl_access";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "sl_refresh";

/// Path of the access cookie.
pub const ACCESS_COOKIE_PATH: &str = "/";
/// Path of the refresh cookie.
pub const REFRESH_COOKIE_PATH: &str = POST_AUTH_REFRESH;

/// Cookie name for the pending OAuth login state.
pub const LOGIN_STATE_COOKIE: &str = "sl_oauth_state";
/// Covers every `/auth/{provider}/callback`.
pub const LOGIN_STATE_COOKIE_PATH: &str = "/auth";

/// Builds session cookies with the configured attributes.
#[derive(Clone, Debug)]
pub struct SessionCookies {
    settings: CookieSettings,
    access_max_age: i64,
    refresh_max_age: i64,
}

impl SessionCookies {
    pub fn new(settings: CookieSettings, access_max_age: i64, refresh_max_age: i64) -> Self {
        Self {
            settings,
            access_max_age,
            refresh_max_age,
        }
    }

    fn build(&self, name: &str, value: String, path: &str, max_age: Duration) -> Cookie<'static> {
        let (same_site, partitioned) = match self.settings.same_site {
            CookieSameSite::None => (SameSite::None, true),
            CookieSameSite::Lax => (SameSite::Lax, false),
            CookieSameSite::Strict => (SameSite::Strict, false),
        };
        let mut cookie = Cookie::build((name.to_string(), value))
            .http_only(true)
            // SameSite=None is only honoured on Secure cookies.
            .secure(self.settings.secure || same_site == SameSite::None)
            .same_site(same_site)
            .path(path.to_string())
            .max_age(max_age)
            .build();
        if partitioned {
            cookie.set_partitioned(true);
        }
        cookie
    }

    /// Build a httpOnly cookie for the access token.
    pub fn access_cookie(&self, token: &str) -> AppResult<Cookie<'static>> {
        ensure_header_safe(token)?;
        Ok(self.build(
            ACCESS_COOKIE,
            token.to_string(),
            ACCESS_COOKIE_PATH,
            Duration::seconds(self.access_max_age),
        ))
    }

    /// Build a httpOnly cookie for the refresh token, scoped to the refresh endpoint.
    pub fn refresh_cookie(&self, token: &str) -> AppResult<Cookie<'static>> {
        ensure_header_safe(token)?;
        Ok(self.build(
            REFRESH_COOKIE,
            token.to_string(),
            REFRESH_COOKIE_PATH,
            Duration::seconds(self.refresh_max_age),
        ))
    }

    /// Build expired cookie to clear the access token.
    pub fn clear_access_cookie(&self) -> Cookie<'static> {
        self.build(ACCESS_COOKIE, String::new(), ACCESS_COOKIE_PATH, Duration::ZERO)
    }

    /// Build expired cookie to clear the refresh token.
    pub fn clear_refresh_cookie(&self) -> Cookie<'static> {
        self.build(REFRESH_COOKIE, String::new(), REFRESH_COOKIE_PATH, Duration::ZERO)
    }

    fn login_state(&self, value: String, max_age: Duration) -> Cookie<'static> {
        let mut cookie = self.build(LOGIN_STATE_COOKIE, value, LOGIN_STATE_COOKIE_PATH, max_age);
        // Strict cookies are withheld on the redirect back from the provider.
        if cookie.same_site() == Some(SameSite::Strict) {
            cookie.set_same_site(SameSite::Lax);
        }
        cookie
    }

    /// Build the cookie binding an OAuth `state` to this browser.
    pub fn login_state_cookie(&self, state: &str) -> AppResult<Cookie<'static>> {
        ensure_header_safe(state)?;
        let max_age = LOGIN_STATE_TTL.as_secs().try_into().unwrap_or(i64::MAX);
        Ok(self.login_state(state.to_string(), Duration::seconds(max_age)))
    }

    /// Build expired cookie to clear the OAuth login state.
    pub fn clear_login_state_cookie(&self) -> Cookie<'static> {
        self.login_state(String::new(), Duration::ZERO)
    }

    /// Attach both session cookies.
    pub fn set_session(&self, jar: CookieJar, access: &str, refresh: &str) -> AppResult<CookieJar> {
        Ok(jar
            .add(self.access_cookie(access)?)
            .add(self.refresh_cookie(refresh)?))
    }

    /// Attach a fresh access cookie only.
    pub fn set_access(&self, jar: CookieJar, access: &str) -> AppResult<CookieJar> {
        Ok(jar.add(self.access_cookie(access)?))
    }

    /// Expire both session cookies.
    pub fn clear_session(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.clear_access_cookie())
            .add(self.clear_refresh_cookie())
    }
}

/// Reject values that could split the `Set-Cookie` header.
fn ensure_header_safe(value: &str) -> AppResult<()> {
    if value.contains(['\r', '\n']) {
        return Err(AppError::Internal("cookie value contains CR/LF".into()));
    }
    Ok(())
}
