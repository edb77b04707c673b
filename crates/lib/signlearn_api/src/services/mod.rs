//! Business logic behind the handlers.

pub mod account;
pub mod auth;
pub mod cookies;
pub mod email_validation;
pub mod federation;
pub mod identity;
pub mod mail;
