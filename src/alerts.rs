use std::fmt;

use tracing::{error, info, instrument, warn};

use crate::config::AlertsConfig;
use crate::email::EmailManager;
use crate::telegram::TelegramManager;

const EMAIL_SUBJECT: &str = "Fleet monitoring alert";

/// Delivery failure of a single notification
#[derive(Debug)]
pub enum NotifyError {
    /// Transport-level HTTP failure (connect, timeout, TLS)
    Http(reqwest::Error),

    /// Chat API answered with a non-success status
    Status { status: u16, body: String },

    /// SMTP transport or message construction failure
    Smtp(String),

    /// Sender or recipient is not a valid mail address
    Address(String),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Http(err) => write!(f, "request failed: {}", err),
            NotifyError::Status { status, body } => {
                write!(f, "chat API returned {}: {}", status, body)
            }
            NotifyError::Smtp(msg) => write!(f, "smtp error: {}", msg),
            NotifyError::Address(msg) => write!(f, "invalid address: {}", msg),
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Http(err)
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Best-effort fan-out of plaintext alerts to every configured recipient
///
/// A failing recipient is logged and skipped. Nothing is retried and no
/// error leaves [`AlertDispatcher::dispatch`].
#[derive(Default)]
pub struct AlertDispatcher {
    telegram: Option<TelegramManager>,
    email: Option<EmailManager>,
}

impl AlertDispatcher {
    pub fn new(telegram: Option<TelegramManager>, email: Option<EmailManager>) -> Self {
        Self { telegram, email }
    }

    /// Build channels from config; a broken email section only disables email
    pub fn from_config(config: &AlertsConfig) -> Self {
        let telegram = config.telegram.clone().map(TelegramManager::new);

        let email = config
            .email
            .as_ref()
            .and_then(|email| match EmailManager::new(email) {
                Ok(manager) => Some(manager),
                Err(e) => {
                    error!("email alerts disabled: {e}");
                    None
                }
            });

        Self { telegram, email }
    }

    pub fn has_channels(&self) -> bool {
        self.telegram.is_some() || self.email.is_some()
    }

    #[instrument(skip_all)]
    pub async fn dispatch(&self, message: &str) -> DispatchReport {
        let mut report = DispatchReport::default();

        if !self.has_channels() {
            warn!("no notification channel configured, alert only logged: {message}");
            return report;
        }

        if let Some(telegram) = &self.telegram {
            for chat_id in telegram.chat_ids() {
                match telegram.send_message(chat_id, message).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        error!(chat_id = %chat_id, "failed to send telegram alert: {e}");
                        report.failed += 1;
                    }
                }
            }
        }

        if let Some(email) = &self.email {
            for recipient in email.recipients() {
                match email.send(recipient, EMAIL_SUBJECT, message).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        error!(recipient = %recipient, "failed to send alert mail: {e}");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            "alert dispatched"
        );
        report
    }
}
