//! smtp-notify: `Notifier` that mails plaintext alerts through an SMTP relay.
//!
//! Alerts are sent from the account's own address to itself, over STARTTLS
//! with password authentication.

use std::time::Duration;

use domain::{CoreError, Notifier};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

pub const DEFAULT_RELAY: &str = "smtp.gmail.com";
pub const DEFAULT_PORT: u16 = 587;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid mailbox {address}: {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

impl From<NotifyError> for CoreError {
    fn from(e: NotifyError) -> Self {
        let retry = match &e {
            NotifyError::Smtp(s) => s.is_transient() || s.is_timeout(),
            _ => false,
        };
        if retry {
            CoreError::Transient(e.to_string())
        } else {
            CoreError::Fatal(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub relay: String,
    pub port: u16,
    /// Login name; also used as sender and recipient.
    pub address: String,
    pub password: String,
    pub timeout: Duration,
}

impl SmtpSettings {
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            relay: DEFAULT_RELAY.into(),
            port: DEFAULT_PORT,
            address: address.into(),
            password: password.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct SmtpNotifier {
    mailbox: Mailbox,
    transport: SmtpTransport,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let mailbox = parse_mailbox(&settings.address)?;
        let transport = SmtpTransport::starttls_relay(&settings.relay)?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.address.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(settings.timeout))
            .build();
        Ok(Self { mailbox, transport })
    }

    fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = self_addressed(&self.mailbox, subject, body)?;
        let response = self.transport.send(&message)?;
        info!(to = %self.mailbox, subject, code = %response.code(), "alert mail sent");
        Ok(())
    }
}

impl Notifier for SmtpNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<(), CoreError> {
        Ok(self.send(subject, body)?)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}

fn self_addressed(mailbox: &Mailbox, subject: &str, body: &str) -> Result<Message, NotifyError> {
    Ok(Message::builder()
        .from(mailbox.clone())
        .to(mailbox.clone())
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_sent_to_self_with_subject() {
        let mailbox = parse_mailbox("ops@example.com").unwrap();
        let message =
            self_addressed(&mailbox, "SITE DOWN", "Application not accessible at all").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: ops@example.com"));
        assert!(raw.contains("To: ops@example.com"));
        assert!(raw.contains("Subject: SITE DOWN"));
        assert!(raw.contains("Application not accessible at all"));
        assert_eq!(message.envelope().to().len(), 1);
    }

    #[test]
    fn rejects_malformed_address() {
        let err = parse_mailbox("not-an-address").unwrap_err();
        assert!(matches!(err, NotifyError::Address { .. }));
        assert!(matches!(CoreError::from(err), CoreError::Fatal(_)));
    }

    #[test]
    fn settings_default_to_gmail_starttls() {
        let s = SmtpSettings::new("ops@example.com", "secret");
        assert_eq!(s.relay, "smtp.gmail.com");
        assert_eq!(s.port, 587);
    }
}
