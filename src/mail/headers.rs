//! Best-effort parsing of raw mail headers.
//!
//! Malformed lines never fail the parse: they are skipped and kept in
//! [`ParsedHeaders::malformed`] so callers can see what was dropped.

use tracing::debug;

use super::{extend_unique, split_addresses, RawHeaders};

/// Typed view of a header blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    /// Display name from `From:`.
    pub from_name: Option<String>,
    /// Address from `From:`.
    pub from_email: Option<String>,
    /// MIME type from `Content-Type:` (without parameters).
    pub content_type: Option<String>,
    /// `charset=` parameter of `Content-Type:`.
    pub charset: Option<String>,
    /// Multipart boundary, from a `boundary=` line or parameter.
    pub boundary: Option<String>,
    /// Accumulated `Cc:` addresses.
    pub cc: Vec<String>,
    /// Accumulated `Bcc:` addresses.
    pub bcc: Vec<String>,
    /// Accumulated `Reply-To:` addresses.
    pub reply_to: Vec<String>,
    /// Headers with no dedicated field, in input order.
    pub custom: Vec<(String, String)>,
    /// Non-empty lines that were skipped.
    pub malformed: Vec<String>,
}

/// Parse raw headers into typed fields.
pub fn parse_headers(raw: &RawHeaders) -> ParsedHeaders {
    let mut parsed = ParsedHeaders::default();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            match param_value(line, "boundary") {
                Some(boundary) => parsed.boundary = Some(boundary),
                None => {
                    debug!(line, "skipping header line without a colon");
                    parsed.malformed.push(line.to_owned());
                }
            }
            continue;
        };

        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            debug!(line, "skipping header line without a name");
            parsed.malformed.push(line.to_owned());
            continue;
        }

        match name.to_ascii_lowercase().as_str() {
            "from" => parse_from(value, &mut parsed),
            "content-type" => parse_content_type(value, &mut parsed),
            "cc" => extend_unique(&mut parsed.cc, split_addresses(value)),
            "bcc" => extend_unique(&mut parsed.bcc, split_addresses(value)),
            "reply-to" => extend_unique(&mut parsed.reply_to, split_addresses(value)),
            _ => parsed.custom.push((name.to_owned(), value.to_owned())),
        }
    }

    parsed
}

/// Split `Name <email>` or a bare address.
pub(crate) fn split_mailbox(value: &str) -> (Option<String>, Option<String>) {
    let value = value.trim();
    match value.split_once('<') {
        Some((name, rest)) => {
            let name = name.replace('"', "");
            let name = name.trim();
            let email = rest.replace('>', "");
            let email = email.trim();
            (
                (!name.is_empty()).then(|| name.to_owned()),
                (!email.is_empty()).then(|| email.to_owned()),
            )
        }
        None => (None, (!value.is_empty()).then(|| value.to_owned())),
    }
}

fn parse_from(value: &str, parsed: &mut ParsedHeaders) {
    let (name, email) = split_mailbox(value);
    if email.is_none() {
        return;
    }
    if name.is_some() {
        parsed.from_name = name;
    }
    parsed.from_email = email;
}

fn parse_content_type(value: &str, parsed: &mut ParsedHeaders) {
    let mut parts = value.split(';');
    let mime = parts.next().map(str::trim).unwrap_or_default();
    if !mime.is_empty() {
        parsed.content_type = Some(mime.to_owned());
    }
    for param in parts {
        if let Some(charset) = param_value(param, "charset") {
            parsed.charset = Some(charset);
        } else if let Some(boundary) = param_value(param, "boundary") {
            parsed.boundary = Some(boundary);
        }
    }
}

/// Extract `key=value` from a parameter, matching the key case-insensitively
/// and stripping quotes.
fn param_value(param: &str, key: &str) -> Option<String> {
    let lower = param.to_ascii_lowercase();
    let needle = format!("{key}=");
    let start = lower.find(&needle)?;
    let value = param.get(start..)?.split_once('=')?.1;
    let value = value.replace(['"', '\''], "");
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}
