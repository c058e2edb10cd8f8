//! Email provider abstraction layer.
//!
//! Defines the [`EmailProvider`] trait and the typed send outcome shared by
//! provider implementations. [`unsend::UnsendClient`] talks to the Unsend
//! `/api/v1/emails` endpoint.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mail::Envelope;

pub mod unsend;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-assigned email id; empty when the provider returned none.
    pub provider_id: String,
}

/// Broad failure category, stable across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credentials missing; nothing was sent over the wire.
    Unconfigured,
    /// Envelope rejected locally before submission.
    InvalidEnvelope,
    /// Network, DNS or timeout failure.
    TransportError,
    /// Provider answered with a non-success status.
    ApiError,
}

impl FailureKind {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::InvalidEnvelope => "invalid_envelope",
            Self::TransportError => "transport_error",
            Self::ApiError => "api_error",
        }
    }
}

/// Why a send did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// No API key configured.
    #[error("{0}")]
    Unconfigured(String),
    /// Envelope failed validation.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Transport(String),
    /// Upstream provider responded with an error status.
    #[error("{message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider error message.
        message: String,
    },
}

impl SendFailure {
    /// Failure category.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unconfigured(_) => FailureKind::Unconfigured,
            Self::InvalidEnvelope(_) => FailureKind::InvalidEnvelope,
            Self::Transport(_) => FailureKind::TransportError,
            Self::Api { .. } => FailureKind::ApiError,
        }
    }

    /// The failure message without category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Unconfigured(m) | Self::InvalidEnvelope(m) | Self::Transport(m) => m,
            Self::Api { message, .. } => message,
        }
    }

    /// HTTP status, for API errors.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result of one send attempt.
pub type SendResult = Result<SendReceipt, SendFailure>;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core email provider interface.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Submit an envelope for delivery.
    async fn send(&self, envelope: &Envelope) -> SendResult;

    /// Whether credentials are present.
    fn is_configured(&self) -> bool;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

const MAX_ERROR_BODY_CHARS: usize = 256;

/// Collapse whitespace, redact secrets and token-like values, and truncate a
/// response body before it is stored or logged.
pub fn sanitize_http_error_body(raw: &str, secrets: &[&str]) -> String {
    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    for secret in secrets.iter().filter(|s| !s.trim().is_empty()) {
        sanitized = sanitized.replace(secret, "[REDACTED]");
    }

    for pattern in [
        r"us_[A-Za-z0-9_\-]{16,}",
        r"Bearer\s+[A-Za-z0-9._\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
