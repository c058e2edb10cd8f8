//! Normalized outbound envelope and the builder that produces it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::headers::parse_headers;
use super::{extend_unique, AttachmentSpec, ContentType, MailRequest};
use crate::config::SenderConfig;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Sender mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Address.
    pub email: String,
    /// Display name.
    pub name: Option<String>,
}

impl Sender {
    /// Create a sender, treating a blank name as absent.
    pub fn new(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            email: email.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }

    /// `"Name <email>"` when a name is known, otherwise the bare address.
    pub fn header_string(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} <{}>", self.email),
            None => self.email.clone(),
        }
    }
}

/// An attachment ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedAttachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// Base64-encoded content.
    pub content: String,
}

/// Normalized representation of an outbound email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Primary recipients.
    pub to: Vec<String>,
    /// Sender.
    pub from: Sender,
    /// Carbon-copy recipients.
    pub cc: Vec<String>,
    /// Blind carbon-copy recipients.
    pub bcc: Vec<String>,
    /// Reply-to addresses.
    pub reply_to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// Declared body type.
    pub content_type: ContentType,
    /// Body charset.
    pub charset: String,
    /// Encoded attachments.
    pub attachments: Vec<EncodedAttachment>,
    /// Non-standard headers carried through from the request.
    pub headers: Vec<(String, String)>,
    /// Provider-side template identifier.
    pub template_id: Option<String>,
    /// Template variables.
    pub variables: BTreeMap<String, String>,
    /// Deferred send time.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Provider email id this message replies to.
    pub in_reply_to_id: Option<String>,
}

/// Envelope invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// No recipient survived normalization.
    #[error("envelope has no recipients")]
    NoRecipients,
    /// No sender address could be determined.
    #[error("envelope has no sender address")]
    NoSender,
    /// Neither a body nor a template was provided.
    #[error("envelope needs a text or html body unless a template is set")]
    NoBody,
}

impl Envelope {
    /// Check the invariants required for submission.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.to.is_empty() {
            return Err(EnvelopeError::NoRecipients);
        }
        if self.from.email.trim().is_empty() {
            return Err(EnvelopeError::NoSender);
        }
        let has_body = self.text.as_deref().is_some_and(|t| !t.is_empty())
            || self.html.as_deref().is_some_and(|h| !h.is_empty());
        if !has_body && self.template_id.is_none() {
            return Err(EnvelopeError::NoBody);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transform chain
// ---------------------------------------------------------------------------

/// A pre-dispatch step that may rewrite the envelope (template ids,
/// variables, scheduling).
pub trait EnvelopeTransform: Send + Sync {
    /// Take the envelope and return the (possibly modified) envelope.
    fn apply(&self, envelope: Envelope) -> Envelope;
}

impl<F> EnvelopeTransform for F
where
    F: Fn(Envelope) -> Envelope + Send + Sync,
{
    fn apply(&self, envelope: Envelope) -> Envelope {
        self(envelope)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Sender fallbacks taken from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderDefaults {
    /// Default From address.
    pub from_email: String,
    /// Default From display name.
    pub from_name: String,
    /// Default charset.
    pub charset: String,
}

impl SenderDefaults {
    /// Snapshot the `[sender]` section.
    pub fn from_config(sender: &SenderConfig) -> Self {
        let from_email = if sender.from_email.trim().is_empty() {
            sender.admin_email.clone()
        } else {
            sender.from_email.clone()
        };
        Self {
            from_email,
            from_name: sender.from_name.clone(),
            charset: sender.charset.clone(),
        }
    }
}

/// Turns a [`MailRequest`] into an [`Envelope`].
#[derive(Clone, Default)]
pub struct EnvelopeBuilder {
    defaults: SenderDefaults,
    transforms: Vec<Arc<dyn EnvelopeTransform>>,
}

impl std::fmt::Debug for EnvelopeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeBuilder")
            .field("defaults", &self.defaults)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

impl EnvelopeBuilder {
    /// Create a builder with the given sender defaults and no transforms.
    pub fn new(defaults: SenderDefaults) -> Self {
        Self {
            defaults,
            transforms: Vec::new(),
        }
    }

    /// Register a transform; transforms run in registration order.
    pub fn with_transform(mut self, transform: impl EnvelopeTransform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Number of registered transforms.
    pub fn transform_count(&self) -> usize {
        self.transforms.len()
    }

    /// Normalize the request and run the transform chain.
    pub async fn build(&self, request: &MailRequest) -> Envelope {
        let envelope = self.normalize(request).await;
        self.transforms
            .iter()
            .fold(envelope, |env, transform| transform.apply(env))
    }

    /// Normalize the request without running transforms.
    pub async fn normalize(&self, request: &MailRequest) -> Envelope {
        let parsed = parse_headers(&request.headers);

        let from_email = parsed
            .from_email
            .clone()
            .unwrap_or_else(|| self.defaults.from_email.clone());
        let from_name = parsed
            .from_name
            .clone()
            .or_else(|| Some(self.defaults.from_name.clone()));

        let mut cc = request.cc.normalize();
        extend_unique(&mut cc, parsed.cc.iter().cloned());
        let mut bcc = request.bcc.normalize();
        extend_unique(&mut bcc, parsed.bcc.iter().cloned());

        let declared = parsed
            .content_type
            .as_deref()
            .map(ContentType::from_mime)
            .unwrap_or_default();

        let (text, html, content_type) = classify_body(request, declared);

        let charset = parsed
            .charset
            .clone()
            .unwrap_or_else(|| self.defaults.charset.clone());

        let mut attachments = Vec::with_capacity(request.attachments.len());
        for spec in &request.attachments {
            if let Some(encoded) = resolve_attachment(spec).await {
                attachments.push(encoded);
            }
        }

        Envelope {
            to: request.to.normalize(),
            from: Sender::new(from_email, from_name),
            cc,
            bcc,
            reply_to: parsed.reply_to,
            subject: request.subject.clone(),
            text,
            html,
            content_type,
            charset,
            attachments,
            headers: parsed.custom,
            ..Envelope::default()
        }
    }
}

fn classify_body(
    request: &MailRequest,
    declared: ContentType,
) -> (Option<String>, Option<String>, ContentType) {
    if request.html.is_some() || request.text.is_some() {
        let content_type = if request.html.is_some() {
            ContentType::Html
        } else {
            ContentType::Text
        };
        return (request.text.clone(), request.html.clone(), content_type);
    }

    if request.message.is_empty() {
        return (None, None, declared);
    }

    if declared == ContentType::Html || is_html(&request.message) {
        (None, Some(request.message.clone()), ContentType::Html)
    } else {
        (Some(request.message.clone()), None, ContentType::Text)
    }
}

/// Returns `true` when the content holds something tag-like: a `<` followed
/// by a letter, `/`, `!` or `?`, then anything up to a closing `>`.
///
/// Unclosed tags such as `Hello <b` and a bare `<` in prose do not match.
pub fn is_html(content: &str) -> bool {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[A-Za-z/!?][^>]*>").ok());
    match tag {
        Some(re) => re.is_match(content),
        None => false,
    }
}

async fn resolve_attachment(spec: &AttachmentSpec) -> Option<EncodedAttachment> {
    match spec {
        AttachmentSpec::Inline { filename, content } => Some(EncodedAttachment {
            filename: filename.clone(),
            content: BASE64.encode(content),
        }),
        AttachmentSpec::Path(path) => read_attachment(path, None).await,
        AttachmentSpec::File { path, name } => read_attachment(path, name.as_deref()).await,
    }
}

/// Read and encode a file; missing or unreadable files are dropped.
async fn read_attachment(path: &Path, name: Option<&str>) -> Option<EncodedAttachment> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "dropping unreadable attachment");
            return None;
        }
    };
    let filename = match name {
        Some(name) if !name.trim().is_empty() => name.to_owned(),
        _ => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_owned()),
    };
    Some(EncodedAttachment {
        filename,
        content: BASE64.encode(bytes),
    })
}
