//! Welcome-mail adapter.
//!
//! The single adapter allowed to no-op silently: without SMTP credentials it
//! reports `Skipped` instead of failing, because the portal can still show
//! the generated credentials from the record store.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address {address:?}: {detail}")]
    InvalidAddress { address: String, detail: String },

    #[error("failed to build welcome message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Whether a welcome mail actually went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Delivery unconfigured; nothing was sent and that is fine.
    Skipped,
}

/// Everything the fixed template interpolates.
#[derive(Debug, Clone)]
pub struct WelcomeMail<'a> {
    pub recipient: &'a str,
    pub employee_name: &'a str,
    pub department: &'a str,
    pub role: &'a str,
    pub workstation_address: &'a str,
    pub username: &'a str,
    pub temp_password: &'a str,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_welcome(&self, mail: &WelcomeMail<'_>) -> Result<SendOutcome, NotifyError>;
}

/// SMTP mailer, constructed once per run.
pub struct Mailer {
    /// `None` when SMTP credentials are absent.
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<Mailbox>,
}

impl Mailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let (Some(user), Some(password)) = (&config.user, &config.password) else {
            return Ok(Self {
                transport: None,
                from: None,
            });
        };

        let from = parse_mailbox(user)?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
            .port(config.port)
            .credentials(Credentials::new(user.clone(), password.clone()))
            .build();

        Ok(Self {
            transport: Some(transport),
            from: Some(from),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl Notifier for Mailer {
    async fn send_welcome(&self, mail: &WelcomeMail<'_>) -> Result<SendOutcome, NotifyError> {
        let (Some(transport), Some(from)) = (&self.transport, &self.from) else {
            info!(
                recipient = mail.recipient,
                "SMTP credentials not set, welcome mail skipped"
            );
            return Ok(SendOutcome::Skipped);
        };

        let message = Message::builder()
            .from(from.clone())
            .to(parse_mailbox(mail.recipient)?)
            .subject("Welcome to Innovatech - your account and workstation are ready")
            .body(welcome_body(mail))?;

        info!(recipient = mail.recipient, "Sending welcome mail");
        transport.send(message).await?;
        Ok(SendOutcome::Sent)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
            address: address.to_string(),
            detail: e.to_string(),
        })
}

fn welcome_body(mail: &WelcomeMail<'_>) -> String {
    let department = if mail.department.is_empty() {
        "-"
    } else {
        mail.department
    };
    let role = if mail.role.is_empty() { "-" } else { mail.role };

    format!(
        r#"Hello {name},

Welcome to Innovatech! Your account and virtual workstation have been created.

Department: {department}
Role (HR): {role}

Windows workstation
-------------------
Address: {address}
Username: {username}
Temporary password (first login): {password}

You can log in via Remote Desktop (RDP) from your own machine.
You must change your password at first login.

This mail was sent automatically by the HR self-service portal.

Kind regards,
Innovatech HR
"#,
        name = mail.employee_name,
        department = department,
        role = role,
        address = mail.workstation_address,
        username = mail.username,
        password = mail.temp_password,
    )
}
