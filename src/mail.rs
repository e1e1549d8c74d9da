//! Outbound email for reminders and reports.
//!
//! [`SmtpMailer`] delivers through an SMTP relay with implicit TLS.
//! [`OutboxMailer`] keeps messages in memory and logs them; the daemon uses
//! it when no relay is configured.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport,
    AsyncTransport,
    Message,
    Tokio1Executor,
    message::{
        Attachment as MailAttachment,
        Mailbox,
        MultiPart,
        SinglePart,
        header::{ContentType, ContentTypeErr},
    },
    transport::smtp::authentication::Credentials,
};
use thiserror::Error;
use tracing::info;

/// A file attached to an email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// Name shown to the recipient.
    pub file_name: String,
    /// MIME type, e.g. `application/pdf`.
    pub content_type: String,
    /// Raw file contents.
    pub body: Vec<u8>,
}

/// A message ready to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Email {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Optional attachment.
    pub attachment: Option<Attachment>,
}

/// Failures while building or delivering a message.
#[derive(Debug, Error)]
pub enum MailError {
    /// A sender or recipient address did not parse.
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    /// The attachment MIME type did not parse.
    #[error("invalid content type: {0}")]
    ContentType(#[from] ContentTypeErr),
    /// The message could not be assembled.
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    /// The relay refused or failed to accept the message.
    #[error("smtp delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Something that can deliver an [`Email`].
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver `email`.
    ///
    /// # Errors
    /// Returns a [`MailError`] when the message cannot be built or sent.
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// SMTP relay delivery.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Connect lazily to `host` over implicit TLS, authenticating when both
    /// credentials are present.
    ///
    /// # Errors
    /// Returns an error if `from` is not an address or the relay cannot be
    /// configured.
    pub fn new(
        host: &str,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
    ) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)?;
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_owned(), pass.to_owned()));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.parse()?,
        })
    }
}

/// Assemble a MIME message from `email`.
///
/// # Errors
/// Returns an error for unparsable addresses or content types.
pub fn build_message(from: &Mailbox, email: Email) -> Result<Message, MailError> {
    let builder = Message::builder()
        .from(from.clone())
        .to(email.to.parse()?)
        .subject(email.subject);
    let message = match email.attachment {
        Some(attachment) => {
            let content_type = ContentType::parse(&attachment.content_type)?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(email.body))
                    .singlepart(
                        MailAttachment::new(attachment.file_name)
                            .body(attachment.body, content_type),
                    ),
            )?
        }
        None => builder.header(ContentType::TEXT_PLAIN).body(email.body)?,
    };
    Ok(message)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        let to = email.to.clone();
        let message = build_message(&self.from, email)?;
        self.transport.send(message).await?;
        info!(%to, "email delivered");
        Ok(())
    }
}

/// In-memory mailbox that records every message instead of delivering it.
#[derive(Clone, Default)]
pub struct OutboxMailer {
    sent: Arc<Mutex<Vec<Email>>>,
}

impl OutboxMailer {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Messages recorded so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Email> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            attachment = email.attachment.as_ref().map(|a| a.file_name.as_str()),
            "email queued in outbox"
        );
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email);
        Ok(())
    }
}
