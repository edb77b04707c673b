//! OAuth redirect handlers for Google and Facebook.
//!
//! Every outcome is a redirect back to the frontend; failures carry only a
//! short error code, the detail stays in the log. The callback only proceeds
//! when the `state` matches the login-state cookie set by `begin`.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use tracing::{error, warn};

use crate::AppState;
use crate::models::{OAuthCallbackParams, OAuthLoginParams};
use crate::services::cookies::LOGIN_STATE_COOKIE;
use crate::services::federation::{FederationError, Provider, landing_path};

fn login_error_redirect(state: &AppState, err: &FederationError) -> Response {
    Redirect::to(&format!(
        "{}/login?error={}",
        state.config.frontend_url,
        err.public_code()
    ))
    .into_response()
}

async fn begin(
    state: AppState,
    provider: Provider,
    jar: CookieJar,
    params: OAuthLoginParams,
) -> Response {
    let started = state
        .federation
        .begin_login(provider, params.next.as_deref())
        .and_then(|(url, login_state)| {
            state
                .cookies
                .login_state_cookie(&login_state)
                .map(|cookie| (url, cookie))
                .map_err(|_| FederationError::InvalidState)
        });
    match started {
        Ok((url, cookie)) => (jar.add(cookie), Redirect::to(url.as_str())).into_response(),
        Err(e) => {
            warn!(provider = provider.as_str(), error = %e, "oauth login unavailable");
            login_error_redirect(&state, &e)
        }
    }
}

async fn callback(
    state: AppState,
    provider: Provider,
    jar: CookieJar,
    params: OAuthCallbackParams,
) -> Response {
    let browser_state = jar
        .get(LOGIN_STATE_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let jar = jar.add(state.cookies.clear_login_state_cookie());

    let result = match (&params.error, &params.code, &params.state) {
        (Some(err), _, _) => Err(FederationError::ProviderDenied(format!(
            "{err}: {}",
            params.error_description.as_deref().unwrap_or_default()
        ))),
        (None, Some(_), Some(login_state)) if browser_state.as_deref() != Some(login_state) => {
            Err(FederationError::StateMismatch)
        }
        (None, Some(code), Some(login_state)) => {
            state
                .federation
                .complete_login(
                    provider,
                    code,
                    login_state,
                    state.store.as_ref(),
                    &state.tokens,
                )
                .await
        }
        _ => Err(FederationError::InvalidState),
    };

    let login = match result {
        Ok(login) => login,
        Err(e) => {
            error!(provider = provider.as_str(), error = %e, "oauth login failed");
            return (jar, login_error_redirect(&state, &e)).into_response();
        }
    };

    let jar = match state
        .cookies
        .set_session(jar, &login.access_token, &login.refresh_token)
    {
        Ok(jar) => jar,
        Err(e) => {
            error!(error = %e, "could not set session cookies");
            let jar = CookieJar::new().add(state.cookies.clear_login_state_cookie());
            return (jar, login_error_redirect(&state, &FederationError::InvalidState))
                .into_response();
        }
    };
    let code = state.handoff.make_code(&login.refresh_token);
    let landing = landing_path(&login.user, login.next.as_deref());
    let sep = if landing.contains('?') { '&' } else { '?' };
    let target = format!(
        "{}{}{}handoff={}",
        state.config.frontend_url, landing, sep, code
    );
    (jar, Redirect::to(&target)).into_response()
}

/// `GET /auth/google/login`
pub async fn google_login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<OAuthLoginParams>,
) -> Response {
    begin(state, Provider::Google, jar, params).await
}

/// `GET /auth/google/callback`
pub async fn google_callback_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackParams>,
) -> Response {
    callback(state, Provider::Google, jar, params).await
}

/// `GET /auth/facebook/login`
pub async fn facebook_login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<OAuthLoginParams>,
) -> Response {
    begin(state, Provider::Facebook, jar, params).await
}

/// `GET /auth/facebook/callback`
pub async fn facebook_callback_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackParams>,
) -> Response {
    callback(state, Provider::Facebook, jar, params).await
}
