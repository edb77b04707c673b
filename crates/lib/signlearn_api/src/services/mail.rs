//! Outbound mail: verification and password-reset links.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use crate::config::MailConfig;

/// Mail delivery errors.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail configuration: {0}")]
    Config(String),

    #[error("mail build: {0}")]
    Build(String),

    #[error("mail transport: {0}")]
    Transport(String),
}

/// A rendered HTML email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError>;
}

/// SMTP delivery (STARTTLS relay with credentials).
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig, timeout: Duration) -> Result<Self, MailError> {
        let from = format!("{} <{}>", config.from_name, config.from)
            .parse::<Mailbox>()
            .map_err(|e| MailError::Config(format!("invalid MAIL_FROM: {e}")))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| MailError::Config(format!("smtp relay: {e}")))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        let to = message
            .to
            .parse::<Mailbox>()
            .map_err(|e| MailError::Build(format!("recipient: {e}")))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.html)
            .map_err(|e| MailError::Build(e.to_string()))?;
        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Used when no SMTP server is configured: records that a mail would have gone out.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, "mail transport not configured, message dropped");
        Ok(())
    }
}

pub fn verification_email(to: &str, link: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Verify your SignLearn email".into(),
        html: format!(
            "<html><body>\
             <h2>Email Verification</h2>\
             <p>Click the link below to verify your email address:</p>\
             <p><a href=\"{link}\">Verify Email</a></p>\
             <p>If you did not create a SignLearn account, you can ignore this email.</p>\
             </body></html>"
        ),
    }
}

pub fn password_reset_email(to: &str, link: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Reset your SignLearn password".into(),
        html: format!(
            "<html><body>\
             <h2>Password Reset</h2>\
             <p>Someone asked to reset the password for this account.</p>\
             <p><a href=\"{link}\">Choose a new password</a></p>\
             <p>The link expires in one hour. If this wasn't you, ignore this email.</p>\
             </body></html>"
        ),
    }
}
