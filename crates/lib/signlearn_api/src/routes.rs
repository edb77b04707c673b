//! Route paths.

pub const POST_AUTH_SIGNUP: &str = "/auth/signup";
pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const GET_AUTH_ME: &str = "/auth/me";
pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
pub const POST_AUTH_EXCHANGE: &str = "/auth/exchange";
pub const GET_AUTH_VERIFY_EMAIL: &str = "/auth/verify-email";
pub const POST_AUTH_RESEND_VERIFICATION: &str = "/auth/resend-verification";
pub const POST_AUTH_FORGOT_PASSWORD: &str = "/auth/forgot-password";
pub const POST_AUTH_RESET_PASSWORD: &str = "/auth/reset-password";
pub const POST_AUTH_CHANGE_EMAIL: &str = "/auth/change-email";
pub const POST_AUTH_CHECK_EMAIL: &str = "/auth/check-email";
pub const POST_AUTH_VALIDATE_EMAIL: &str = "/auth/validate-email";

pub const GET_AUTH_GOOGLE_LOGIN: &str = "/auth/google/login";
pub const GET_AUTH_GOOGLE_CALLBACK: &str = "/auth/google/callback";
pub const GET_AUTH_FACEBOOK_LOGIN: &str = "/auth/facebook/login";
pub const GET_AUTH_FACEBOOK_CALLBACK: &str = "/auth/facebook/callback";

pub const GET_ADMIN_SESSION: &str = "/admin/session";
pub const PUT_ADMIN_USERS_ID_ADMIN: &str = "/admin/users/{user_id}/admin";
