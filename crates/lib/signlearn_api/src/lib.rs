//! # signlearn_api
//!
//! HTTP API library for the SignLearn auth service.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use signlearn_core::auth::handoff::HandoffStore;
use signlearn_core::auth::single_use::DEFAULT_CAPACITY;
use signlearn_core::auth::{TokenService, UserStore};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{account, admin, auth, oauth};
use crate::services::cookies::SessionCookies;
use crate::services::email_validation::EmailValidator;
use crate::services::federation::Federation;
use crate::services::mail::Mailer;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub config: Arc<ApiConfig>,
    pub tokens: TokenService,
    pub cookies: SessionCookies,
    /// Handoff codes for OAuth redirects. Owned here, swept by the server.
    pub handoff: Arc<HandoffStore>,
    pub mailer: Arc<dyn Mailer>,
    pub federation: Arc<Federation>,
    pub email_validator: Arc<EmailValidator>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        federation: Federation,
    ) -> Self {
        let lifetimes = config.token_lifetimes;
        Self {
            tokens: TokenService::new(config.signing_secret.as_bytes(), lifetimes),
            cookies: SessionCookies::new(
                config.cookies.clone(),
                lifetimes.access_secs,
                lifetimes.refresh_secs,
            ),
            handoff: Arc::new(HandoffStore::new(config.handoff_ttl, DEFAULT_CAPACITY)),
            email_validator: Arc::new(EmailValidator::new(config.email_validation.clone())),
            federation: Arc::new(federation),
            config: Arc::new(config),
            store,
            mailer,
        }
    }

    /// Start the periodic sweeps of the in-memory code stores.
    pub fn spawn_cleanup_tasks(&self) {
        self.handoff.spawn_cleanup_task();
        self.federation.pending_logins().spawn_cleanup_task();
    }
}

/// Run embedded database migrations.
///
/// Delegates to `signlearn_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    signlearn_core::migrate::migrate(pool).await
}

fn cors(config: &ApiConfig) -> CorsLayer {
    use axum::http::{HeaderName, Method, header};

    let origin = config
        .frontend_url
        .parse()
        .map(AllowOrigin::exact)
        .unwrap_or_else(|_| AllowOrigin::list([]));
    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
        ])
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::POST_AUTH_SIGNUP, post(auth::signup_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_AUTH_EXCHANGE, post(auth::exchange_handler))
        .route(routes::POST_AUTH_CHECK_EMAIL, post(auth::check_email_handler))
        .route(
            routes::POST_AUTH_VALIDATE_EMAIL,
            post(auth::validate_email_handler),
        )
        .route(
            routes::GET_AUTH_VERIFY_EMAIL,
            get(account::verify_email_handler),
        )
        .route(
            routes::POST_AUTH_RESEND_VERIFICATION,
            post(account::resend_verification_handler),
        )
        .route(
            routes::POST_AUTH_FORGOT_PASSWORD,
            post(account::forgot_password_handler),
        )
        .route(
            routes::POST_AUTH_RESET_PASSWORD,
            post(account::reset_password_handler),
        )
        .route(
            routes::GET_AUTH_GOOGLE_LOGIN,
            get(oauth::google_login_handler),
        )
        .route(
            routes::GET_AUTH_GOOGLE_CALLBACK,
            get(oauth::google_callback_handler),
        )
        .route(
            routes::GET_AUTH_FACEBOOK_LOGIN,
            get(oauth::facebook_login_handler),
        )
        .route(
            routes::GET_AUTH_FACEBOOK_CALLBACK,
            get(oauth::facebook_callback_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .route(
            routes::POST_AUTH_CHANGE_EMAIL,
            post(account::change_email_handler),
        );

    let admin_routes = Router::new()
        .route(routes::GET_ADMIN_SESSION, get(admin::admin_session_handler))
        .layer(axum::middleware::from_fn(middleware::auth::require_admin));

    let super_admin_routes = Router::new()
        .route(
            routes::PUT_ADMIN_USERS_ID_ADMIN,
            put(admin::set_admin_handler),
        )
        .layer(axum::middleware::from_fn(
            middleware::auth::require_super_admin,
        ));

    let authenticated = Router::new()
        .merge(protected)
        .merge(admin_routes)
        .merge(super_admin_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .layer(cors(&state.config))
        .with_state(state)
}
