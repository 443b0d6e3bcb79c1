//! Outbound email transports.

use async_trait::async_trait;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use super::RenderedEmail;
use crate::config::MailConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("email build error: {0}")]
    Build(#[from] lettre::error::Error),
}

/// Sends one rendered email.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &RenderedEmail) -> Result<(), TransportError>;
}

/// SMTP relay transport sending `multipart/alternative` messages.
pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailTransport {
    /// Returns `None` when no SMTP host is configured.
    pub fn from_config(config: &MailConfig) -> Result<Option<Self>, TransportError> {
        let Some(host) = config.smtp_host.as_deref() else {
            return Ok(None);
        };

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Some(Self {
            mailer: builder.build(),
        }))
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(&self, email: &RenderedEmail) -> Result<(), TransportError> {
        let message = Message::builder()
            .from(email.from.parse()?)
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))?;

        self.mailer.send(message).await?;
        info!(to = %email.to, subject = %email.subject, "disaster alert email sent");
        Ok(())
    }
}

/// Logs emails instead of sending them; used when SMTP is not configured.
#[derive(Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl EmailTransport for LoggingTransport {
    async fn send(&self, email: &RenderedEmail) -> Result<(), TransportError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            text_bytes = email.text.len(),
            html_bytes = email.html.len(),
            "SMTP not configured; email logged only"
        );
        Ok(())
    }
}
