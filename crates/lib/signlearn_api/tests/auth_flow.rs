//! End-to-end tests of the auth HTTP surface over the in-memory user store.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use chrono::Utc;
use signlearn_api::config::{ApiConfig, CookieSameSite, CookieSettings};
use signlearn_api::services::federation::{
    Federation, FederationError, IdentityProvider, Provider, ProviderProfile,
};
use signlearn_api::services::mail::{EmailMessage, MailError, Mailer};
use signlearn_api::{AppState, router};
use signlearn_core::auth::memory::MemoryUserStore;
use signlearn_core::auth::password::hash_password;
use signlearn_core::auth::tokens::RoleClaims;
use signlearn_core::auth::{TokenPurpose, UserStore};
use signlearn_core::models::User;
use tower::ServiceExt;
use url::Url;

const PASSWORD: &str = "Abcd1234!";

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    delay: Option<Duration>,
}

impl RecordingMailer {
    /// Takes `delay` per message, like a slow SMTP relay.
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Some flows mail from a background task; poll until `count` messages arrived.
    async fn wait_for(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} messages, got {}", self.sent().len());
    }

    /// Path and query of the last link mailed to `to`.
    async fn last_link_to(&self, to: &str) -> String {
        let mut message = None;
        for _ in 0..200 {
            message = self.sent().into_iter().rev().find(|m| m.to == to);
            if message.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let message = message.unwrap();
        link_in(&message)
    }
}

/// Path and query of the link in `message`.
fn link_in(message: &EmailMessage) -> String {
    let start = message.html.find("href=\"").unwrap() + 6;
    let end = start + message.html[start..].find('"').unwrap();
    let url = Url::parse(&message.html[start..end]).unwrap();
    format!("{}?{}", url.path(), url.query().unwrap())
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

struct FakeGoogle {
    email: Option<String>,
}

#[async_trait]
impl IdentityProvider for FakeGoogle {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(&self, state: &str) -> Result<Url, FederationError> {
        Ok(Url::parse_with_params("https://idp.test/auth", &[("state", state)]).unwrap())
    }

    async fn exchange_code(&self, _code: &str) -> Result<String, FederationError> {
        Ok("provider-access-token".into())
    }

    async fn fetch_profile(&self, _token: &str) -> Result<ProviderProfile, FederationError> {
        Ok(ProviderProfile {
            email: self.email.clone(),
            email_verified: Some(true),
            display_name: Some("Gina Google".into()),
        })
    }
}

struct Harness {
    app: Router,
    state: AppState,
    store: Arc<MemoryUserStore>,
    mailer: Arc<RecordingMailer>,
}

fn test_config() -> ApiConfig {
    ApiConfig {
        signing_secret: "integration-secret".into(),
        frontend_url: "https://app.test".into(),
        api_base_url: "https://api.test".into(),
        cookies: CookieSettings {
            secure: true,
            same_site: CookieSameSite::Lax,
        },
        forgot_password_jitter_ms: 0,
        ..ApiConfig::default()
    }
}

fn harness_with(federation: Federation) -> Harness {
    harness_with_mailer(federation, RecordingMailer::default())
}

fn harness_with_mailer(federation: Federation, mailer: RecordingMailer) -> Harness {
    let store = Arc::new(MemoryUserStore::new());
    let mailer = Arc::new(mailer);
    let state = AppState::new(test_config(), store.clone(), mailer.clone(), federation);
    Harness {
        app: router(state.clone()),
        state,
        store,
        mailer,
    }
}

fn harness() -> Harness {
    harness_with(Federation::disabled())
}

fn oauth_harness(email: Option<&str>) -> Harness {
    let google = FakeGoogle {
        email: email.map(str::to_string),
    };
    harness_with(Federation::new(Some(Arc::new(google)), None))
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn post(&self, uri: &str, body: serde_json::Value, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn seed_user(&self, user_id: i64, email: &str, verified: bool) -> User {
        let user = User {
            user_id,
            username: format!("user{user_id}"),
            email: email.into(),
            temp_email: None,
            password_hash: Some(hash_password(PASSWORD).unwrap()),
            is_admin: false,
            is_super_admin: false,
            is_verified: verified,
            points: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.insert(user.clone()).await;
        user
    }

    async fn login(&self, email: &str, password: &str) -> Response<Body> {
        self.post(
            "/auth/login",
            serde_json::json!({"email": email, "password": password}),
            None,
        )
        .await
    }

    /// `Cookie` header value carrying the access cookie from a login.
    async fn session_for(&self, email: &str) -> String {
        let resp = self.login(email, PASSWORD).await;
        assert_eq!(resp.status(), StatusCode::OK);
        format!("sl_access={}", cookie_value(&resp, "sl_access").unwrap())
    }
}

fn set_cookies(resp: &Response<Body>) -> Vec<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn set_cookie(resp: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    set_cookies(resp).into_iter().find(|c| c.starts_with(&prefix))
}

fn cookie_value(resp: &Response<Body>, name: &str) -> Option<String> {
    set_cookie(resp, name).map(|c| {
        c.split(';').next().unwrap()[name.len() + 1..].to_string()
    })
}

fn cookie_attr(cookie: &str, attr: &str) -> Option<String> {
    cookie
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(&format!("{attr}=")).map(str::to_string))
}

fn location(resp: &Response<Body>) -> String {
    resp.headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

async fn body_text(resp: Response<Body>) -> String {
    String::from_utf8(body_bytes(resp).await).unwrap()
}

// ---------------------------------------------------------------------------
// Signup, verification, login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signup_verify_then_login() {
    let h = harness();
    let resp = h
        .post(
            "/auth/signup",
            serde_json::json!({"username": "bob", "email": "bob@x.com", "password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(body_json(resp).await["message"].is_string());

    let bob = h.store.find_by_email("bob@x.com").await.unwrap().unwrap();
    assert!(!bob.is_verified);
    assert_ne!(bob.password_hash.as_deref(), Some(PASSWORD));

    // Login is refused until the address is verified.
    let resp = h.login("bob@x.com", PASSWORD).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(resp).await["message"],
        "Please verify your email before signing in."
    );

    let link = h.mailer.last_link_to("bob@x.com").await;
    assert!(link.starts_with("/auth/verify-email?token="));
    let resp = h.get(&link, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("Email verified"));

    // Idempotent.
    let resp = h.get(&link, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("Already verified"));

    let resp = h.login("bob@x.com", PASSWORD).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookie(&resp, "sl_access").is_some());
    assert!(set_cookie(&resp, "sl_refresh").is_some());
    let json = body_json(resp).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["token_type"], "bearer");
    assert_eq!(json["expires_in"], 3600);
    assert_eq!(json["user"]["username"], "bob");
    assert_eq!(json["user"]["is_admin"], false);
}

#[tokio::test]
async fn signup_rejects_duplicates_and_weak_passwords() {
    let h = harness();
    h.seed_user(1, "taken@x.com", true).await;

    let dup_email = h
        .post(
            "/auth/signup",
            serde_json::json!({"username": "fresh", "email": "taken@x.com", "password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(dup_email.status(), StatusCode::BAD_REQUEST);

    let dup_name = h
        .post(
            "/auth/signup",
            serde_json::json!({"username": "user1", "email": "new@x.com", "password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(dup_name.status(), StatusCode::BAD_REQUEST);

    let weak = h
        .post(
            "/auth/signup",
            serde_json::json!({"username": "weak", "email": "weak@x.com", "password": "abcdefgh"}),
            None,
        )
        .await;
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn bad_credentials_do_not_reveal_account_existence() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;

    let wrong = h.login("bob@x.com", "Wrong123!").await;
    let unknown = h.login("nobody@x.com", PASSWORD).await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_bytes(wrong).await, body_bytes(unknown).await);
}

#[tokio::test]
async fn passwordless_account_cannot_use_password_login() {
    let h = harness();
    let mut user = h.seed_user(1, "fed@x.com", true).await;
    user.password_hash = None;
    h.store.insert(user).await;

    let resp = h.login("fed@x.com", "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn me_logout_and_cookie_clearing() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;

    let login = h.login("bob@x.com", PASSWORD).await;
    let set_access = set_cookie(&login, "sl_access").unwrap();
    let set_refresh = set_cookie(&login, "sl_refresh").unwrap();
    assert!(set_access.contains("HttpOnly"));
    assert!(set_access.contains("Secure"));
    assert_eq!(cookie_attr(&set_access, "Path").as_deref(), Some("/"));
    assert_eq!(cookie_attr(&set_access, "Max-Age").as_deref(), Some("3600"));
    assert_eq!(
        cookie_attr(&set_refresh, "Path").as_deref(),
        Some("/auth/refresh")
    );
    assert_eq!(
        cookie_attr(&set_refresh, "Max-Age").as_deref(),
        Some("604800")
    );
    let cookie = format!("sl_access={}", cookie_value(&login, "sl_access").unwrap());

    let me = h.get("/auth/me", Some(&cookie)).await;
    assert_eq!(me.status(), StatusCode::OK);
    let json = body_json(me).await;
    assert_eq!(json["email"], "bob@x.com");
    assert_eq!(json["is_verified"], true);

    let logout = h.post("/auth/logout", serde_json::json!({}), Some(&cookie)).await;
    assert_eq!(logout.status(), StatusCode::OK);
    let cleared_access = set_cookie(&logout, "sl_access").unwrap();
    let cleared_refresh = set_cookie(&logout, "sl_refresh").unwrap();
    assert_eq!(cookie_attr(&cleared_access, "Max-Age").as_deref(), Some("0"));
    assert_eq!(cookie_attr(&cleared_refresh, "Max-Age").as_deref(), Some("0"));
    assert_eq!(
        cookie_attr(&cleared_access, "Path"),
        cookie_attr(&set_access, "Path")
    );
    assert_eq!(
        cookie_attr(&cleared_refresh, "Path"),
        cookie_attr(&set_refresh, "Path")
    );

    // The browser has dropped the cookies.
    let me = h.get("/auth/me", None).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_without_session_still_succeeds() {
    let h = harness();
    let resp = h.post("/auth/logout", serde_json::json!({}), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;
    let login = body_json(h.login("bob@x.com", PASSWORD).await).await;
    let token = login["access_token"].as_str().unwrap();

    let resp = h
        .send(
            Request::get("/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn expired_access_token_is_reported_as_expired() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;
    let expired = h
        .state
        .tokens
        .issue(
            TokenPurpose::Access,
            "bob@x.com",
            RoleClaims::default(),
            chrono::Duration::seconds(-5),
        )
        .unwrap();
    let resp = h
        .get("/auth/me", Some(&format!("sl_access={expired}")))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["message"], "Session expired");
}

#[tokio::test]
async fn refresh_from_cookie_or_body_sets_only_the_access_cookie() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;
    let login = h.login("bob@x.com", PASSWORD).await;
    let refresh = cookie_value(&login, "sl_refresh").unwrap();

    let resp = h
        .post(
            "/auth/refresh",
            serde_json::json!({}),
            Some(&format!("sl_refresh={refresh}")),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookie(&resp, "sl_access").is_some());
    assert!(set_cookie(&resp, "sl_refresh").is_none());
    let json = body_json(resp).await;
    assert!(json["access_token"].is_string());
    assert_eq!(json["expires_in"], 3600);

    let resp = h
        .post(
            "/auth/refresh",
            serde_json::json!({"refresh_token": refresh}),
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_failures() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;

    let missing = h
        .send(Request::post("/auth/refresh").body(Body::empty()).unwrap())
        .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    // An access token is not a refresh token.
    let access = h
        .state
        .tokens
        .issue_access("bob@x.com", RoleClaims::default())
        .unwrap();
    let wrong_purpose = h
        .post(
            "/auth/refresh",
            serde_json::json!({"refresh_token": access}),
            None,
        )
        .await;
    assert_eq!(wrong_purpose.status(), StatusCode::UNAUTHORIZED);

    let ghost = h
        .state
        .tokens
        .issue_refresh("ghost@x.com", RoleClaims::default())
        .unwrap();
    let gone = h
        .post(
            "/auth/refresh",
            serde_json::json!({"refresh_token": ghost}),
            None,
        )
        .await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Password reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forgot_password_response_is_identical_for_unknown_email() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;

    let known = h
        .post(
            "/auth/forgot-password",
            serde_json::json!({"email": "bob@x.com"}),
            None,
        )
        .await;
    let unknown = h
        .post(
            "/auth/forgot-password",
            serde_json::json!({"email": "nobody@x.com"}),
            None,
        )
        .await;
    assert_eq!(known.status(), unknown.status());
    assert_eq!(body_bytes(known).await, body_bytes(unknown).await);
    assert_eq!(h.mailer.wait_for(1).await.len(), 1);
}

#[tokio::test]
async fn mail_delivery_does_not_delay_request_responses() {
    let h = harness_with_mailer(
        Federation::disabled(),
        RecordingMailer::slow(Duration::from_millis(400)),
    );
    h.seed_user(1, "bob@x.com", true).await;
    h.seed_user(2, "pending@x.com", false).await;

    for (uri, email) in [
        ("/auth/forgot-password", "bob@x.com"),
        ("/auth/forgot-password", "nobody@x.com"),
        ("/auth/resend-verification", "pending@x.com"),
        ("/auth/resend-verification", "nobody@x.com"),
    ] {
        let started = Instant::now();
        let resp = h.post(uri, serde_json::json!({"email": email}), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            started.elapsed() < Duration::from_millis(200),
            "{uri} for {email} took {:?}",
            started.elapsed()
        );
    }

    let sent = h.mailer.wait_for(2).await;
    let mut recipients: Vec<_> = sent.iter().map(|m| m.to.as_str()).collect();
    recipients.sort();
    assert_eq!(recipients, ["bob@x.com", "pending@x.com"]);
}

#[tokio::test]
async fn reset_password_with_mailed_link() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;
    h.post(
        "/auth/forgot-password",
        serde_json::json!({"email": "bob@x.com"}),
        None,
    )
    .await;
    let link = h.mailer.last_link_to("bob@x.com").await;
    assert!(link.starts_with("/reset-password?token="));
    let token = link.trim_start_matches("/reset-password?token=");

    let same = h
        .post(
            "/auth/reset-password",
            serde_json::json!({"token": token, "new_password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(same.status(), StatusCode::BAD_REQUEST);

    let weak = h
        .post(
            "/auth/reset-password",
            serde_json::json!({"token": token, "new_password": "short"}),
            None,
        )
        .await;
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);

    let ok = h
        .post(
            "/auth/reset-password",
            serde_json::json!({"token": token, "new_password": "Newpass99?"}),
            None,
        )
        .await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(
        h.login("bob@x.com", PASSWORD).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        h.login("bob@x.com", "Newpass99?").await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn expired_reset_token_leaves_password_unchanged() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;
    let expired = h
        .state
        .tokens
        .issue(
            TokenPurpose::PasswordReset,
            "bob@x.com",
            RoleClaims::default(),
            chrono::Duration::seconds(-5),
        )
        .unwrap();

    let resp = h
        .post(
            "/auth/reset-password",
            serde_json::json!({"token": expired, "new_password": "Newpass99?"}),
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let message = body_json(resp).await["message"].as_str().unwrap().to_lowercase();
    assert!(message.contains("expired"));
    assert_eq!(h.login("bob@x.com", PASSWORD).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn reset_rejects_tokens_of_other_purposes() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;
    let verification = h.state.tokens.issue_email_verification("bob@x.com").unwrap();
    let resp = h
        .post(
            "/auth/reset-password",
            serde_json::json!({"token": verification, "new_password": "Newpass99?"}),
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let message = body_json(resp).await["message"].as_str().unwrap().to_lowercase();
    assert!(message.contains("invalid"));
}

// ---------------------------------------------------------------------------
// Verification links
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_verification_links_render_friendly_pages() {
    let h = harness();
    h.seed_user(1, "bob@x.com", false).await;

    let missing = h.get("/auth/verify-email", None).await;
    assert_eq!(missing.status(), StatusCode::OK);
    assert!(body_text(missing).await.contains("Invalid link"));

    let garbage = h.get("/auth/verify-email?token=not.a.token", None).await;
    assert_eq!(garbage.status(), StatusCode::OK);
    assert!(body_text(garbage).await.contains("Invalid link"));

    let expired = h
        .state
        .tokens
        .issue(
            TokenPurpose::EmailVerification,
            "bob@x.com",
            RoleClaims::default(),
            chrono::Duration::seconds(-5),
        )
        .unwrap();
    let resp = h
        .get(&format!("/auth/verify-email?token={expired}"), None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("Link expired"));
    assert!(
        !h.store
            .find_by_email("bob@x.com")
            .await
            .unwrap()
            .unwrap()
            .is_verified
    );
}

#[tokio::test]
async fn resend_verification_only_mails_unverified_accounts() {
    let h = harness();
    h.seed_user(1, "pending@x.com", false).await;
    h.seed_user(2, "done@x.com", true).await;

    for email in ["pending@x.com", "done@x.com", "nobody@x.com"] {
        let resp = h
            .post(
                "/auth/resend-verification",
                serde_json::json!({"email": email}),
                None,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let sent = h.mailer.wait_for(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "pending@x.com");
}

#[tokio::test]
async fn change_email_is_confirmed_by_link() {
    let h = harness();
    let bob = h.seed_user(1, "bob@x.com", true).await;
    let cookie = h.session_for("bob@x.com").await;

    let unauthenticated = h
        .post(
            "/auth/change-email",
            serde_json::json!({"new_email": "robert@x.com"}),
            None,
        )
        .await;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    let resp = h
        .post(
            "/auth/change-email",
            serde_json::json!({"new_email": "robert@x.com"}),
            Some(&cookie),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let staged = h.store.find_by_id(bob.user_id).await.unwrap().unwrap();
    assert_eq!(staged.email, "bob@x.com");
    assert_eq!(staged.temp_email.as_deref(), Some("robert@x.com"));

    let link = h.mailer.last_link_to("robert@x.com").await;
    let resp = h.get(&link, None).await;
    assert!(body_text(resp).await.contains("Email updated"));
    let moved = h.store.find_by_id(bob.user_id).await.unwrap().unwrap();
    assert_eq!(moved.email, "robert@x.com");
    assert!(moved.temp_email.is_none());

    let again = h.get(&link, None).await;
    assert!(body_text(again).await.contains("Already verified"));
}

#[tokio::test]
async fn change_email_link_only_moves_the_account_that_requested_it() {
    let h = harness();
    let mallory = h.seed_user(1, "mallory@x.com", true).await;
    let alice = h.seed_user(2, "alice@x.com", true).await;

    for email in ["mallory@x.com", "alice@x.com"] {
        let cookie = h.session_for(email).await;
        let resp = h
            .post(
                "/auth/change-email",
                serde_json::json!({"new_email": "alice@new.com"}),
                Some(&cookie),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let sent = h.mailer.wait_for(2).await;
    let mallory_link = link_in(&sent[0]);
    let alice_link = link_in(&sent[1]);
    assert_ne!(mallory_link, alice_link);

    let resp = h.get(&alice_link, None).await;
    assert!(body_text(resp).await.contains("Email updated"));
    let alice = h.store.find_by_id(alice.user_id).await.unwrap().unwrap();
    assert_eq!(alice.email, "alice@new.com");
    let untouched = h.store.find_by_id(mallory.user_id).await.unwrap().unwrap();
    assert_eq!(untouched.email, "mallory@x.com");

    let resp = h.get(&mallory_link, None).await;
    assert!(body_text(resp).await.contains("Email unavailable"));
    let untouched = h.store.find_by_id(mallory.user_id).await.unwrap().unwrap();
    assert_eq!(untouched.email, "mallory@x.com");
}

#[tokio::test]
async fn superseded_change_email_link_is_invalid() {
    let h = harness();
    let bob = h.seed_user(1, "bob@x.com", true).await;
    let cookie = h.session_for("bob@x.com").await;

    for new_email in ["first@x.com", "second@x.com"] {
        h.post(
            "/auth/change-email",
            serde_json::json!({"new_email": new_email}),
            Some(&cookie),
        )
        .await;
    }
    let stale = h.mailer.last_link_to("first@x.com").await;
    let resp = h.get(&stale, None).await;
    assert!(body_text(resp).await.contains("Invalid link"));
    let bob = h.store.find_by_id(bob.user_id).await.unwrap().unwrap();
    assert_eq!(bob.email, "bob@x.com");
    assert_eq!(bob.temp_email.as_deref(), Some("second@x.com"));
}

#[tokio::test]
async fn check_and_validate_email() {
    let h = harness();
    h.seed_user(1, "bob@x.com", true).await;

    let exists = h
        .post(
            "/auth/check-email",
            serde_json::json!({"email": " bob@x.com "}),
            None,
        )
        .await;
    assert_eq!(body_json(exists).await["exists"], true);
    let absent = h
        .post(
            "/auth/check-email",
            serde_json::json!({"email": "nobody@x.com"}),
            None,
        )
        .await;
    assert_eq!(body_json(absent).await["exists"], false);

    let malformed = h
        .post(
            "/auth/validate-email",
            serde_json::json!({"email": "not-an-email"}),
            None,
        )
        .await;
    let json = body_json(malformed).await;
    assert_eq!(json["valid"], false);
    assert_eq!(json["reason"], "invalid_format");

    // No provider configured: well-formed addresses pass.
    let fine = h
        .post(
            "/auth/validate-email",
            serde_json::json!({"email": "bob@x.com"}),
            None,
        )
        .await;
    let json = body_json(fine).await;
    assert_eq!(json["valid"], true);
    assert!(json.get("reason").is_none());
}

// ---------------------------------------------------------------------------
// Role gates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_routes_require_fresh_admin_flag() {
    let h = harness();
    let bob = h.seed_user(1, "bob@x.com", true).await;
    let cookie = h.session_for("bob@x.com").await;

    assert_eq!(
        h.get("/admin/session", None).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        h.get("/admin/session", Some(&cookie)).await.status(),
        StatusCode::FORBIDDEN
    );

    // Promotion takes effect without a new token.
    h.store.set_admin(bob.user_id, true).await.unwrap();
    let resp = h.get("/admin/session", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["is_admin"], true);
    assert_eq!(json["is_super_admin"], false);

    // And so does demotion.
    h.store.set_admin(bob.user_id, false).await.unwrap();
    assert_eq!(
        h.get("/admin/session", Some(&cookie)).await.status(),
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn only_super_admins_manage_admins() {
    let h = harness();
    let mut root = h.seed_user(1, "root@x.com", true).await;
    root.is_super_admin = true;
    h.store.insert(root.clone()).await;
    let mut admin = h.seed_user(2, "admin@x.com", true).await;
    admin.is_admin = true;
    h.store.insert(admin.clone()).await;
    let target = h.seed_user(3, "target@x.com", true).await;

    let admin_cookie = h.session_for("admin@x.com").await;
    let resp = h
        .send(
            Request::put(format!("/admin/users/{}/admin", target.user_id))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, &admin_cookie)
                .body(Body::from(r#"{"is_admin":true}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let root_cookie = h.session_for("root@x.com").await;
    let put = |id: i64, is_admin: bool| {
        Request::put(format!("/admin/users/{id}/admin"))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::COOKIE, root_cookie.clone())
            .body(Body::from(format!(r#"{{"is_admin":{is_admin}}}"#)))
            .unwrap()
    };

    let resp = h.send(put(target.user_id, true)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        h.store
            .find_by_id(target.user_id)
            .await
            .unwrap()
            .unwrap()
            .is_admin
    );

    assert_eq!(h.send(put(999, true)).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        h.send(put(root.user_id, false)).await.status(),
        StatusCode::FORBIDDEN
    );
}

// ---------------------------------------------------------------------------
// OAuth and handoff
// ---------------------------------------------------------------------------

/// `Cookie` header value carrying the login-state cookie from a login redirect.
fn login_state_cookie(resp: &Response<Body>) -> String {
    format!(
        "sl_oauth_state={}",
        cookie_value(resp, "sl_oauth_state").unwrap()
    )
}

fn state_param(location: &str) -> String {
    Url::parse(location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn google_login_creates_user_and_hands_off_session() {
    let h = oauth_harness(Some("gina@x.com"));

    let begin = h.get("/auth/google/login?next=/lessons/3", None).await;
    assert_eq!(begin.status(), StatusCode::SEE_OTHER);
    let state = state_param(&location(&begin));
    let browser = login_state_cookie(&begin);

    let callback = h
        .get(
            &format!("/auth/google/callback?code=abc&state={state}"),
            Some(&browser),
        )
        .await;
    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    let cleared = set_cookie(&callback, "sl_oauth_state").unwrap();
    assert_eq!(cookie_attr(&cleared, "Max-Age").as_deref(), Some("0"));
    assert!(set_cookie(&callback, "sl_access").is_some());
    assert!(set_cookie(&callback, "sl_refresh").is_some());
    let target = location(&callback);
    assert!(target.starts_with("https://app.test/lessons/3?handoff="));
    let code = target.rsplit_once("handoff=").unwrap().1.to_string();

    let gina = h.store.find_by_email("gina@x.com").await.unwrap().unwrap();
    assert!(gina.is_verified);
    assert!(gina.password_hash.is_none());
    assert_eq!(gina.username, "gina_google");

    let exchanged = h
        .post("/auth/exchange", serde_json::json!({"code": code}), None)
        .await;
    assert_eq!(exchanged.status(), StatusCode::OK);
    assert!(set_cookie(&exchanged, "sl_refresh").is_some());
    assert!(body_json(exchanged).await["access_token"].is_string());

    let replay = h
        .post("/auth/exchange", serde_json::json!({"code": code}), None)
        .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    // The state was consumed too.
    let again = h
        .get(
            &format!("/auth/google/callback?code=abc&state={state}"),
            Some(&browser),
        )
        .await;
    assert_eq!(
        location(&again),
        "https://app.test/login?error=oauth_failed"
    );
}

#[tokio::test]
async fn open_redirect_hints_are_ignored() {
    let h = oauth_harness(Some("gina@x.com"));
    let begin = h
        .get("/auth/google/login?next=%2F%2Fevil.example", None)
        .await;
    let state = state_param(&location(&begin));
    let callback = h
        .get(
            &format!("/auth/google/callback?code=abc&state={state}"),
            Some(&login_state_cookie(&begin)),
        )
        .await;
    assert!(location(&callback).starts_with("https://app.test/dashboard?handoff="));
}

#[tokio::test]
async fn provider_without_email_fails_cleanly() {
    let h = oauth_harness(None);
    let begin = h.get("/auth/google/login", None).await;
    let state = state_param(&location(&begin));

    let callback = h
        .get(
            &format!("/auth/google/callback?code=abc&state={state}"),
            Some(&login_state_cookie(&begin)),
        )
        .await;
    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&callback),
        "https://app.test/login?error=oauth_no_email"
    );
    assert!(set_cookie(&callback, "sl_access").is_none());
    assert!(set_cookie(&callback, "sl_refresh").is_none());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn provider_errors_are_not_echoed() {
    let h = oauth_harness(Some("gina@x.com"));
    let resp = h
        .get(
            "/auth/google/callback?error=access_denied&error_description=secret+detail",
            None,
        )
        .await;
    let target = location(&resp);
    assert_eq!(target, "https://app.test/login?error=oauth_failed");
    assert!(!target.contains("secret"));

    let facebook = h.get("/auth/facebook/login", None).await;
    assert_eq!(
        location(&facebook),
        "https://app.test/login?error=oauth_failed"
    );
}

#[tokio::test]
async fn login_state_only_completes_in_the_browser_that_started_it() {
    let h = oauth_harness(Some("gina@x.com"));
    let attacker = h.get("/auth/google/login", None).await;
    let state = state_param(&location(&attacker));
    let victim = h.get("/auth/google/login", None).await;
    let callback_uri = format!("/auth/google/callback?code=abc&state={state}");

    for cookie in [None, Some(login_state_cookie(&victim))] {
        let resp = h.get(&callback_uri, cookie.as_deref()).await;
        assert_eq!(location(&resp), "https://app.test/login?error=oauth_failed");
        assert!(set_cookie(&resp, "sl_access").is_none());
    }
    assert!(h.store.is_empty().await);

    let own = h
        .get(&callback_uri, Some(&login_state_cookie(&attacker)))
        .await;
    assert!(location(&own).starts_with("https://app.test/dashboard?handoff="));
}
