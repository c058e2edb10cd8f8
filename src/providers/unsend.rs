//! Unsend provider implementation using the `/api/v1/emails` API.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{sanitize_http_error_body, EmailProvider, SendFailure, SendReceipt, SendResult};
use crate::config::{ApiConfig, SenderConfig};
use crate::mail::{Envelope, Sender, SenderDefaults};
use crate::store::{EmailLogStore, LogStatus, NewLogEntry, StatusDetail};

const UNKNOWN_API_ERROR: &str = "Unknown API error";

/// Subject of the connection test message.
pub const TEST_SUBJECT: &str = "Unsend Mailer Test Email";

/// Body of the connection test message.
pub const TEST_BODY: &str = "This is a test email from Unsend Mailer. \
                             If you receive this, the connection is working correctly.";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// One address or several; Unsend accepts both shapes.
#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WireAddresses {
    /// A single address.
    One(String),
    /// Several addresses.
    Many(Vec<String>),
}

impl WireAddresses {
    /// `None` for an empty list.
    pub fn from_list(list: &[String]) -> Option<Self> {
        match list {
            [] => None,
            [one] => Some(Self::One(one.clone())),
            many => Some(Self::Many(many.to_vec())),
        }
    }
}

/// Unsend send-email request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsendRequest {
    /// Recipients.
    pub to: WireAddresses,
    /// `Name <email>` or bare address.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Reply-to addresses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<WireAddresses>,
    /// Carbon-copy recipients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<WireAddresses>,
    /// Blind carbon-copy recipients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<WireAddresses>,
    /// HTML body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Plain-text body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 attachments.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<WireAttachment>,
    /// Template identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Template variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// RFC 3339 scheduled send time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<String>,
    /// Provider email id this message replies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_id: Option<String>,
}

/// An attachment in Unsend format.
#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireAttachment {
    /// File name.
    pub filename: String,
    /// Base64 content.
    pub content: String,
}

/// Success response body.
#[doc(hidden)]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UnsendResponse {
    /// Email id as returned by Unsend.
    #[serde(rename = "emailId")]
    pub email_id: Option<String>,
    /// Generic id field.
    pub id: Option<String>,
}

/// Error response body.
#[doc(hidden)]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UnsendErrorResponse {
    /// Human-readable error.
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Map an envelope onto the Unsend request body.
#[doc(hidden)]
pub fn build_request(envelope: &Envelope) -> UnsendRequest {
    UnsendRequest {
        to: WireAddresses::from_list(&envelope.to).unwrap_or(WireAddresses::Many(Vec::new())),
        from: envelope.from.header_string(),
        subject: envelope.subject.clone(),
        reply_to: WireAddresses::from_list(&envelope.reply_to),
        cc: WireAddresses::from_list(&envelope.cc),
        bcc: WireAddresses::from_list(&envelope.bcc),
        html: envelope.html.clone().filter(|h| !h.is_empty()),
        text: envelope.text.clone().filter(|t| !t.is_empty()),
        attachments: envelope
            .attachments
            .iter()
            .map(|a| WireAttachment {
                filename: a.filename.clone(),
                content: a.content.clone(),
            })
            .collect(),
        template_id: envelope.template_id.clone().filter(|t| !t.is_empty()),
        variables: envelope.variables.clone(),
        scheduled_at: envelope
            .scheduled_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        in_reply_to_id: envelope.in_reply_to_id.clone().filter(|i| !i.is_empty()),
    }
}

/// Interpret a response status and body.
#[doc(hidden)]
pub fn parse_response(status: u16, body: &str) -> SendResult {
    if (200..300).contains(&status) {
        let parsed: UnsendResponse = serde_json::from_str(body).unwrap_or_default();
        let provider_id = parsed.email_id.or(parsed.id).unwrap_or_default();
        return Ok(SendReceipt { provider_id });
    }

    let message = serde_json::from_str::<UnsendErrorResponse>(body)
        .ok()
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_API_ERROR.to_owned());
    Err(SendFailure::Api { status, message })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Unsend emails API client.
#[derive(Clone)]
pub struct UnsendClient {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    logs: EmailLogStore,
    admin_email: String,
    sender: Sender,
}

impl std::fmt::Debug for UnsendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsendClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "__REDACTED__"))
            .field("logging", &self.logs.is_enabled())
            .finish_non_exhaustive()
    }
}

impl UnsendClient {
    /// Create a client from the `[api]` and `[sender]` sections.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        api: &ApiConfig,
        sender: &SenderConfig,
        logs: EmailLogStore,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_seconds))
            .build()?;
        let defaults = SenderDefaults::from_config(sender);
        Ok(Self {
            endpoint: api.endpoint.clone(),
            api_key: api.key().map(str::to_owned),
            client,
            logs,
            admin_email: sender.admin_email.clone(),
            sender: Sender::new(defaults.from_email, Some(defaults.from_name)),
        })
    }

    /// A copy of this client using other credentials (pre-save testing).
    ///
    /// `endpoint` keeps the current endpoint when `None`.
    pub fn with_credentials(&self, api_key: &str, endpoint: Option<&str>) -> Self {
        let mut client = self.clone();
        let key = api_key.trim();
        client.api_key = (!key.is_empty()).then(|| key.to_owned());
        if let Some(endpoint) = endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            client.endpoint = endpoint.to_owned();
        }
        client
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a fixed diagnostic message to the site administrator.
    pub async fn test_connection(&self) -> SendResult {
        let to = if self.admin_email.trim().is_empty() {
            self.sender.email.clone()
        } else {
            self.admin_email.clone()
        };
        let envelope = Envelope {
            to: vec![to],
            from: self.sender.clone(),
            subject: TEST_SUBJECT.to_owned(),
            text: Some(TEST_BODY.to_owned()),
            ..Envelope::default()
        };
        self.send_envelope(&envelope).await
    }

    #[instrument(skip_all, fields(provider = "unsend", to = %envelope.to.join(",")))]
    async fn send_envelope(&self, envelope: &Envelope) -> SendResult {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(SendFailure::Unconfigured(
                "Unsend API key is not configured.".to_owned(),
            ));
        };
        if let Err(e) = envelope.validate() {
            let failure = SendFailure::InvalidEnvelope(e.to_string());
            warn!(error = %failure, "envelope rejected before submission");
            self.log_attempt(envelope, LogStatus::Failed, failure_detail(&failure))
                .await;
            return Err(failure);
        }

        let log_id = self
            .log_attempt(envelope, LogStatus::Pending, String::new())
            .await;

        let outcome = self.post(api_key, &build_request(envelope)).await;

        let (status, detail) = match &outcome {
            Ok((receipt, body)) => {
                info!(provider_id = %receipt.provider_id, "email accepted by provider");
                (
                    LogStatus::Sent,
                    StatusDetail {
                        provider_id: Some(receipt.provider_id.clone()),
                        response: Some(sanitize_http_error_body(body, &[api_key])),
                    },
                )
            }
            Err(failure) => {
                warn!(kind = failure.kind().as_str(), error = %failure, "provider send failed");
                (
                    LogStatus::Failed,
                    StatusDetail {
                        provider_id: None,
                        response: Some(failure_detail(failure)),
                    },
                )
            }
        };
        self.log_outcome(log_id, status, detail).await;

        outcome.map(|(receipt, _)| receipt)
    }

    async fn post(
        &self,
        api_key: &str,
        request: &UnsendRequest,
    ) -> Result<(SendReceipt, String), SendFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_failure)?;
        if !(200..300).contains(&status) {
            warn!(
                status,
                body = %sanitize_http_error_body(&body, &[api_key]),
                "provider returned error status"
            );
        }
        parse_response(status, &body).map(|receipt| (receipt, body))
    }

    async fn log_attempt(
        &self,
        envelope: &Envelope,
        status: LogStatus,
        response: String,
    ) -> Option<i64> {
        let entry = NewLogEntry {
            provider_id: String::new(),
            to_email: envelope.to.join(","),
            from_email: envelope.from.email.clone(),
            subject: envelope.subject.clone(),
            status,
            response,
        };
        match self.logs.record(&entry).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to record email log entry");
                None
            }
        }
    }

    async fn log_outcome(&self, log_id: Option<i64>, status: LogStatus, detail: StatusDetail) {
        let Some(id) = log_id else {
            return;
        };
        if let Err(e) = self.logs.update_status(id, status, detail).await {
            warn!(error = %e, log_id = id, "failed to update email log entry");
        }
    }
}

fn transport_failure(err: reqwest::Error) -> SendFailure {
    if err.is_timeout() {
        SendFailure::Transport("request timed out".to_owned())
    } else {
        SendFailure::Transport(err.without_url().to_string())
    }
}

fn failure_detail(failure: &SendFailure) -> String {
    serde_json::json!({
        "error_type": failure.kind().as_str(),
        "error_message": failure.message(),
        "status_code": failure.http_status(),
    })
    .to_string()
}

#[async_trait::async_trait]
impl EmailProvider for UnsendClient {
    async fn send(&self, envelope: &Envelope) -> SendResult {
        self.send_envelope(envelope).await
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn name(&self) -> &str {
        "unsend"
    }
}
