//! Per-call routing between the provider and native delivery.
//!
//! [`decide`] picks the route from configuration. [`Mailer`] runs the whole
//! pipeline and only ever reports a boolean to its caller.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::config::DeliveryConfig;
use crate::mail::{EnvelopeBuilder, MailRequest};
use crate::native::NativeTransport;
use crate::providers::{EmailProvider, SendFailure, SendReceipt, SendResult};

/// Where a call is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Platform-native delivery.
    Native,
    /// External provider API.
    Provider,
}

/// Route a call from configuration flags alone.
pub fn decide(delivery: &DeliveryConfig, api_key_present: bool) -> Route {
    if delivery.override_enabled && api_key_present {
        Route::Provider
    } else {
        Route::Native
    }
}

/// Outcome notification delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailEvent {
    /// The provider accepted the message.
    Sent {
        /// Recipients of the message.
        to: Vec<String>,
        /// Provider receipt.
        receipt: SendReceipt,
    },
    /// Delivery failed and no fallback succeeded.
    Failed {
        /// Recipients of the message.
        to: Vec<String>,
        /// Human-readable reason.
        message: String,
        /// Provider failure, when the provider route was taken.
        failure: Option<SendFailure>,
    },
}

/// Receives [`MailEvent`]s.
#[async_trait]
pub trait MailEventListener: Send + Sync {
    /// Handle one event.
    async fn on_event(&self, event: &MailEvent);
}

#[async_trait]
impl<F> MailEventListener for F
where
    F: Fn(&MailEvent) + Send + Sync,
{
    async fn on_event(&self, event: &MailEvent) {
        self(event);
    }
}

/// Mail entrypoint replacement.
pub struct Mailer {
    delivery: DeliveryConfig,
    api_key_present: bool,
    builder: EnvelopeBuilder,
    provider: Arc<dyn EmailProvider>,
    native: Arc<dyn NativeTransport>,
    listeners: Vec<Arc<dyn MailEventListener>>,
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("delivery", &self.delivery)
            .field("api_key_present", &self.api_key_present)
            .field("provider", &self.provider.name())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Mailer {
    /// Assemble a mailer. Whether a key is present is taken from the provider.
    pub fn new(
        delivery: DeliveryConfig,
        builder: EnvelopeBuilder,
        provider: Arc<dyn EmailProvider>,
        native: Arc<dyn NativeTransport>,
    ) -> Self {
        let api_key_present = provider.is_configured();
        Self {
            delivery,
            api_key_present,
            builder,
            provider,
            native,
            listeners: Vec::new(),
        }
    }

    /// Register a listener; listeners run in registration order.
    pub fn on_event(&mut self, listener: impl MailEventListener + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    /// Route taken for the next call.
    pub fn route(&self) -> Route {
        decide(&self.delivery, self.api_key_present)
    }

    /// Send one message, returning whether it was delivered.
    #[instrument(skip_all, fields(route = ?self.route()))]
    pub async fn send_mail(&self, request: MailRequest) -> bool {
        match self.route() {
            Route::Native => self.deliver_native(&request, None).await,
            Route::Provider => self.deliver_provider(request).await,
        }
    }

    /// Send a test message through the provider, bypassing routing.
    pub async fn send_test_email(&self, to: &str) -> SendResult {
        let mut request = MailRequest::new(to, "Test Email from Unsend Mailer", "");
        request.text = Some(
            "This is a test email to verify that Unsend Mailer is working correctly. \
             If you receive this email, the configuration is successful."
                .to_owned(),
        );
        let envelope = self.builder.build(&request).await;
        self.provider.send(&envelope).await
    }

    async fn deliver_provider(&self, request: MailRequest) -> bool {
        let envelope = self.builder.build(&request).await;
        match self.provider.send(&envelope).await {
            Ok(receipt) => {
                self.emit(&MailEvent::Sent {
                    to: envelope.to,
                    receipt,
                })
                .await;
                true
            }
            Err(failure) if self.delivery.test_mode => {
                warn!(
                    error = %failure,
                    "provider failed in test mode, falling back to native delivery"
                );
                self.deliver_native(&request, Some(failure)).await
            }
            Err(failure) => {
                warn!(error = %failure, "provider send failed");
                self.emit(&MailEvent::Failed {
                    to: envelope.to,
                    message: failure.message().to_owned(),
                    failure: Some(failure),
                })
                .await;
                false
            }
        }
    }

    async fn deliver_native(&self, request: &MailRequest, prior: Option<SendFailure>) -> bool {
        match self.native.deliver(request).await {
            Ok(()) => {
                info!("delivered through native transport");
                true
            }
            Err(e) => {
                warn!(error = %e, "native delivery failed");
                self.emit(&MailEvent::Failed {
                    to: request.to.normalize(),
                    message: e.to_string(),
                    failure: prior,
                })
                .await;
                false
            }
        }
    }

    async fn emit(&self, event: &MailEvent) {
        for listener in &self.listeners {
            listener.on_event(event).await;
        }
    }
}
