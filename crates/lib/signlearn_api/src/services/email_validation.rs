//! Best-effort third-party email validation.
//!
//! A malformed address is rejected locally. Anything that goes wrong while
//! asking the provider (timeout, non-200, unparsable body) fails open.

use serde::Deserialize;
use signlearn_core::validation::is_valid_email;
use tracing::{debug, warn};

use crate::config::EmailValidationConfig;
use crate::models::EmailValidationResponse;

/// Subset of the provider response we act on.
#[derive(Debug, Deserialize)]
struct ProviderVerdict {
    deliverability: Option<String>,
    is_disposable_email: Option<FlagValue>,
}

#[derive(Debug, Deserialize)]
struct FlagValue {
    value: Option<bool>,
}

pub struct EmailValidator {
    config: Option<EmailValidationConfig>,
    client: reqwest::Client,
}

impl EmailValidator {
    pub fn new(config: Option<EmailValidationConfig>) -> Self {
        let timeout = config
            .as_ref()
            .map(|c| c.timeout)
            .unwrap_or(std::time::Duration::from_secs(5));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub async fn validate(&self, email: &str) -> EmailValidationResponse {
        let email = email.trim();
        if !is_valid_email(email) {
            return invalid("invalid_format");
        }
        let Some(config) = &self.config else {
            return valid();
        };

        match self.ask_provider(config, email).await {
            Ok(verdict) => interpret(verdict),
            Err(e) => {
                warn!(error = %e, "email validation unavailable, accepting address");
                valid()
            }
        }
    }

    async fn ask_provider(
        &self,
        config: &EmailValidationConfig,
        email: &str,
    ) -> Result<ProviderVerdict, String> {
        let resp = self
            .client
            .get(&config.base_url)
            .query(&[("api_key", config.api_key.as_str()), ("email", email)])
            .send()
            .await
            .map_err(|e| format!("request: {}", e.without_url()))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        resp.json::<ProviderVerdict>()
            .await
            .map_err(|e| format!("parse: {}", e.without_url()))
    }
}

fn valid() -> EmailValidationResponse {
    EmailValidationResponse {
        valid: true,
        reason: None,
    }
}

fn invalid(reason: &str) -> EmailValidationResponse {
    EmailValidationResponse {
        valid: false,
        reason: Some(reason.to_string()),
    }
}

fn interpret(verdict: ProviderVerdict) -> EmailValidationResponse {
    debug!(?verdict, "email validation verdict");
    if verdict
        .is_disposable_email
        .and_then(|f| f.value)
        .unwrap_or(false)
    {
        return invalid("disposable");
    }
    match verdict.deliverability.as_deref() {
        Some("UNDELIVERABLE") => invalid("undeliverable"),
        _ => valid(),
    }
}
