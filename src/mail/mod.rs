//! Inbound mail call types and their normalization.
//!
//! A [`MailRequest`] mirrors the host platform's generic "send mail" call:
//! recipients as a comma-joined string or a list, headers as a raw blob or a
//! list, and attachments as paths or in-memory content. [`headers`] parses
//! the header part; [`envelope`] turns the whole request into the normalized
//! [`Envelope`] submitted to the provider.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod envelope;
pub mod headers;

pub use envelope::{
    is_html, EncodedAttachment, Envelope, EnvelopeBuilder, EnvelopeError, EnvelopeTransform,
    Sender, SenderDefaults,
};
pub use headers::{parse_headers, ParsedHeaders};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// One call to the mail entrypoint, exactly as the caller supplied it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailRequest {
    /// Primary recipients.
    pub to: Recipients,
    /// Carbon-copy recipients supplied outside the headers.
    pub cc: Recipients,
    /// Blind carbon-copy recipients supplied outside the headers.
    pub bcc: Recipients,
    /// Subject line.
    pub subject: String,
    /// Generic message body; classified as HTML or text when no explicit body is set.
    pub message: String,
    /// Explicit HTML body.
    pub html: Option<String>,
    /// Explicit plain-text body.
    pub text: Option<String>,
    /// Raw headers.
    pub headers: RawHeaders,
    /// Attachments to resolve and encode.
    pub attachments: Vec<AttachmentSpec>,
}

impl MailRequest {
    /// A request with recipients, subject and message; everything else empty.
    pub fn new(
        to: impl Into<Recipients>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Replace the headers.
    pub fn with_headers(mut self, headers: impl Into<RawHeaders>) -> Self {
        self.headers = headers.into();
        self
    }

    /// Append an attachment.
    pub fn with_attachment(mut self, attachment: AttachmentSpec) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// A recipient list in either of the accepted shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    /// Comma-joined addresses, e.g. `"a@x.com, b@x.com"`.
    Joined(String),
    /// One address per element.
    List(Vec<String>),
}

impl Default for Recipients {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl Recipients {
    /// Split, trim, drop empty entries and de-duplicate, keeping first-seen order.
    pub fn normalize(&self) -> Vec<String> {
        match self {
            Self::Joined(joined) => split_addresses(joined),
            Self::List(list) => {
                let mut out = Vec::new();
                for entry in list {
                    extend_unique(&mut out, split_addresses(entry));
                }
                out
            }
        }
    }
}

impl From<&str> for Recipients {
    fn from(value: &str) -> Self {
        Self::Joined(value.to_owned())
    }
}

impl From<String> for Recipients {
    fn from(value: String) -> Self {
        Self::Joined(value)
    }
}

impl From<Vec<String>> for Recipients {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<Vec<&str>> for Recipients {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(str::to_owned).collect())
    }
}

/// Headers as handed to the mail entrypoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RawHeaders {
    /// No headers.
    #[default]
    None,
    /// One header per line, `\n` or `\r\n` separated.
    Blob(String),
    /// Already-split `Name: value` lines.
    Lines(Vec<String>),
    /// Already-split name/value pairs.
    Pairs(Vec<(String, String)>),
}

impl RawHeaders {
    /// Flatten into `Name: value` lines.
    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Blob(blob) => blob.replace("\r\n", "\n").split('\n').map(str::to_owned).collect(),
            Self::Lines(lines) => lines.clone(),
            Self::Pairs(pairs) => pairs
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect(),
        }
    }
}

impl From<&str> for RawHeaders {
    fn from(value: &str) -> Self {
        Self::Blob(value.to_owned())
    }
}

impl From<String> for RawHeaders {
    fn from(value: String) -> Self {
        Self::Blob(value)
    }
}

impl From<Vec<String>> for RawHeaders {
    fn from(value: Vec<String>) -> Self {
        Self::Lines(value)
    }
}

impl From<Vec<&str>> for RawHeaders {
    fn from(value: Vec<&str>) -> Self {
        Self::Lines(value.into_iter().map(str::to_owned).collect())
    }
}

/// An attachment in one of the accepted shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSpec {
    /// A file path; the file name becomes the attachment name.
    Path(PathBuf),
    /// In-memory content with an explicit file name.
    Inline {
        /// Attachment file name.
        filename: String,
        /// Raw content.
        content: Vec<u8>,
    },
    /// A file path with an optional display name.
    File {
        /// Path to read.
        path: PathBuf,
        /// Display name; the file name when absent.
        name: Option<String>,
    },
}

impl AttachmentSpec {
    /// Parse a newline-separated list of paths, skipping blank lines.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.replace("\r\n", "\n")
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Self::Path(PathBuf::from(line)))
            .collect()
    }
}

/// Declared body type of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// `text/plain`.
    #[default]
    Text,
    /// `text/html`.
    Html,
}

impl ContentType {
    /// Map a MIME type string onto the two supported body types.
    pub fn from_mime(mime: &str) -> Self {
        if mime.trim().eq_ignore_ascii_case("text/html") {
            Self::Html
        } else {
            Self::Text
        }
    }

    /// The MIME type string.
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Html => "text/html",
        }
    }
}

// ---------------------------------------------------------------------------
// Address helpers
// ---------------------------------------------------------------------------

/// Split a comma-joined address list, trimming and dropping empty entries.
pub(crate) fn split_addresses(joined: &str) -> Vec<String> {
    let mut out = Vec::new();
    extend_unique(
        &mut out,
        joined
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_owned),
    );
    out
}

/// Append addresses not already present.
pub(crate) fn extend_unique(target: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
