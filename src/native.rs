//! Native mail delivery used when the provider route is off or as the
//! test-mode fallback.
//!
//! Messages are rendered with `lettre` and handed to the local `sendmail`
//! binary. Custom headers are carried as raw headers, except names the
//! builder already sets or that are not valid header names.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lettre::message::header::{ContentType as MimeType, HeaderName, HeaderValue};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, AsyncSendmailTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, instrument};

use crate::mail::ContentType;

use crate::config::{NativeConfig, SenderConfig};
use crate::mail::{Envelope, EnvelopeBuilder, MailRequest, SenderDefaults};

/// Errors from native delivery.
#[derive(Debug, thiserror::Error)]
pub enum NativeError {
    /// No recipient address could be parsed.
    #[error("no valid recipient address")]
    NoRecipients,

    /// The sender address could not be parsed.
    #[error("invalid sender address '{0}'")]
    InvalidSender(String),

    /// The message could not be assembled.
    #[error("failed to build message: {0}")]
    Build(String),

    /// The local transport rejected the message.
    #[error("sendmail delivery failed: {0}")]
    Transport(String),
}

/// Local delivery seam.
#[async_trait]
pub trait NativeTransport: Send + Sync {
    /// Deliver the request as given.
    async fn deliver(&self, request: &MailRequest) -> Result<(), NativeError>;
}

/// Delivers through the local `sendmail` binary.
pub struct SendmailTransport {
    builder: EnvelopeBuilder,
    transport: AsyncSendmailTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SendmailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendmailTransport")
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

impl SendmailTransport {
    /// Create a transport using `native.sendmail_command` or the system default.
    pub fn new(native: &NativeConfig, sender: &SenderConfig) -> Self {
        let transport = match native.sendmail_command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => {
                AsyncSendmailTransport::<Tokio1Executor>::new_with_command(command)
            }
            _ => AsyncSendmailTransport::<Tokio1Executor>::new(),
        };
        Self {
            builder: EnvelopeBuilder::new(SenderDefaults::from_config(sender)),
            transport,
        }
    }
}

#[async_trait]
impl NativeTransport for SendmailTransport {
    #[instrument(skip_all, fields(transport = "sendmail"))]
    async fn deliver(&self, request: &MailRequest) -> Result<(), NativeError> {
        let envelope = self.builder.normalize(request).await;
        let message = build_message(&envelope)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NativeError::Transport(e.to_string()))?;
        info!(to = %envelope.to.join(","), "email handed to sendmail");
        Ok(())
    }
}

/// Render a normalized envelope as a MIME message.
///
/// Invalid cc, bcc and reply-to addresses are skipped; at least one valid
/// recipient and a valid sender are required.
///
/// # Errors
///
/// Returns [`NativeError`] when no recipient is usable, the sender is
/// invalid, or the message cannot be assembled.
pub fn build_message(envelope: &Envelope) -> Result<Message, NativeError> {
    let sender_address: Address = envelope
        .from
        .email
        .trim()
        .parse()
        .map_err(|_| NativeError::InvalidSender(envelope.from.email.clone()))?;
    let from = Mailbox::new(envelope.from.name.clone(), sender_address);

    let to = mailboxes(&envelope.to);
    if to.is_empty() {
        return Err(NativeError::NoRecipients);
    }

    let mut builder = Message::builder().from(from).subject(envelope.subject.as_str());
    for mailbox in to {
        builder = builder.to(mailbox);
    }
    for mailbox in mailboxes(&envelope.cc) {
        builder = builder.cc(mailbox);
    }
    for mailbox in mailboxes(&envelope.bcc) {
        builder = builder.bcc(mailbox);
    }
    for mailbox in mailboxes(&envelope.reply_to) {
        builder = builder.reply_to(mailbox);
    }
    for (name, value) in &envelope.headers {
        if MANAGED_HEADERS.iter().any(|m| m.eq_ignore_ascii_case(name)) {
            debug!(header = %name, "skipping header set by the message builder");
            continue;
        }
        match HeaderName::new_from_ascii(name.clone()) {
            Ok(header) => builder = builder.raw_header(HeaderValue::new(header, value.clone())),
            Err(e) => debug!(header = %name, error = %e, "skipping invalid header name"),
        }
    }

    let body = body_part(envelope);
    let message = if envelope.attachments.is_empty() {
        builder.singlepart(body)
    } else {
        let octet_stream = MimeType::parse("application/octet-stream")
            .map_err(|e| NativeError::Build(e.to_string()))?;
        let mut mixed = MultiPart::mixed().singlepart(body);
        for attachment in &envelope.attachments {
            let Ok(bytes) = BASE64.decode(&attachment.content) else {
                debug!(filename = %attachment.filename, "skipping undecodable attachment");
                continue;
            };
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone()).body(bytes, octet_stream.clone()),
            );
        }
        builder.multipart(mixed)
    };
    message.map_err(|e| NativeError::Build(e.to_string()))
}

fn body_part(envelope: &Envelope) -> SinglePart {
    let (kind, body) = match (&envelope.html, &envelope.text) {
        (Some(html), _) => (ContentType::Html, html.clone()),
        (None, Some(text)) => (ContentType::Text, text.clone()),
        (None, None) => (ContentType::Text, String::new()),
    };
    SinglePart::builder()
        .header(body_content_type(kind, &envelope.charset))
        .body(body)
}

/// `text/plain` or `text/html` with the envelope charset. A charset lettre
/// cannot parse falls back to the bare type, which lettre sends as UTF-8.
fn body_content_type(kind: ContentType, charset: &str) -> MimeType {
    let bare = match kind {
        ContentType::Html => MimeType::TEXT_HTML,
        ContentType::Text => MimeType::TEXT_PLAIN,
    };
    let charset = charset.trim();
    if charset.is_empty() {
        return bare;
    }
    MimeType::parse(&format!("{}; charset={charset}", kind.as_mime())).unwrap_or_else(|e| {
        debug!(charset, error = %e, "unusable charset, keeping default content type");
        bare
    })
}

/// Headers the builder writes itself; raw copies would replace them.
const MANAGED_HEADERS: &[&str] = &[
    "From",
    "To",
    "Cc",
    "Bcc",
    "Reply-To",
    "Subject",
    "Content-Type",
    "Content-Transfer-Encoding",
    "MIME-Version",
];

fn mailboxes(addresses: &[String]) -> Vec<Mailbox> {
    addresses
        .iter()
        .filter_map(|raw| match raw.parse::<Mailbox>() {
            Ok(mailbox) => Some(mailbox),
            Err(e) => {
                debug!(address = %raw, error = %e, "skipping unparseable address");
                None
            }
        })
        .collect()
}
