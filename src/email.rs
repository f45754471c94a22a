use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, instrument};

use crate::alerts::NotifyError;
use crate::config::EmailConfig;

const IMPLICIT_TLS_PORT: u16 = 465;

/// Plaintext alert mails over SMTP, sent from the configured account
#[derive(Debug)]
pub struct EmailManager {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<String>,
}

impl EmailManager {
    /// Build the transport; no connection is made until the first send
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .username
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {e}", config.username)))?;

        let builder = if config.smtp_port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from,
            to: config.to.clone(),
        })
    }

    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    #[instrument(skip(self, body))]
    pub async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| NotifyError::Address(format!("{recipient}: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        debug!("alert mail delivered");
        Ok(())
    }
}
