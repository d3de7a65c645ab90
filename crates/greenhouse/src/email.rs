//! SMTP notification sink: one plain-text message per recipient, sent from
//! the configured account over STARTTLS.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use crate::alerts::Notifier;
use crate::config::EmailConfig;

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = config
            .username
            .parse()
            .with_context(|| format!("invalid sender address '{}'", config.username))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .with_context(|| format!("invalid smtp server '{}'", config.smtp_server))?
            .port(config.tls_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self { transport, from })
    }
}

/// Build the message for one recipient.
pub fn compose(from: &Mailbox, to: &str, subject: &str, body: &str) -> Result<Message> {
    let to: Mailbox = to
        .parse()
        .with_context(|| format!("invalid recipient address '{to}'"))?;
    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .context("failed to build e-mail")
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<()> {
        let mut failed = Vec::new();
        for recipient in recipients {
            let sent = match compose(&self.from, recipient, subject, body) {
                Ok(message) => self
                    .transport
                    .send(message)
                    .await
                    .map(|_| ())
                    .context("smtp delivery failed"),
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => debug!(%recipient, "alert e-mail sent"),
                Err(e) => {
                    warn!(%recipient, "alert e-mail not sent: {e:#}");
                    failed.push(recipient.as_str());
                }
            }
        }

        if !failed.is_empty() {
            bail!("could not e-mail {}", failed.join(", "));
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
