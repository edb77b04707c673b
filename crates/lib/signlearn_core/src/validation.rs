//! Input validation and username derivation.

use std::sync::OnceLock;

use regex::Regex;

/// Maximum stored email length.
pub const MAX_EMAIL_LEN: usize = 254;

/// Username length bounds.
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 150;

/// Trim surrounding whitespace. Case is preserved; lookups are exact.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_string()
}

/// Validates email address format.
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email regex is valid")
    });
    email.len() <= MAX_EMAIL_LEN && regex.is_match(email)
}

/// Validates a signup username: 3–150 chars of letters, digits, `_`, `.`, `-`.
pub fn is_valid_username(username: &str) -> bool {
    static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = USERNAME_REGEX
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("username regex is valid"));
    let len = username.chars().count();
    (MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) && regex.is_match(username)
}

/// Best-effort username base for a federated account.
///
/// Prefers the provider display name, then the email local part, then `"user"`.
pub fn username_base(display_name: Option<&str>, email: &str) -> String {
    let from_name = display_name.map(slugify).filter(|s| !s.is_empty());
    let from_email = || slugify(email.split('@').next().unwrap_or_default());
    let mut base = from_name.unwrap_or_else(from_email);
    if base.is_empty() {
        base = "user".to_string();
    }
    while base.chars().count() < MIN_USERNAME_LEN {
        base.push('_');
    }
    // Leave room for a numeric suffix.
    base.chars().take(MAX_USERNAME_LEN - 8).collect()
}

fn slugify(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut previous_sep = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            output.push(c.to_ascii_lowercase());
            previous_sep = false;
        } else if !previous_sep && !output.is_empty() {
            output.push('_');
            previous_sep = true;
        }
    }
    output.trim_end_matches('_').to_string()
}
