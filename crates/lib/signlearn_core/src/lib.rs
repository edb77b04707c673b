//! # signlearn_core
//!
//! Core domain logic for SignLearn authentication: credentials, signed
//! tokens, single-use stores and the user store.

pub mod auth;
pub mod migrate;
pub mod models;
pub mod validation;
