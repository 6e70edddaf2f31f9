//! Notification dispatch.
//!
//! Consumes [`TransitionEvent`]s from the notification queue and makes exactly
//! one send attempt per delivery. A failed send is logged and counted; it never
//! reaches the check pipeline.

pub mod mail;
pub mod render;

pub use mail::{HttpMailTransport, LogMailTransport};
pub use render::Renderer;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{NotificationConfig, ProbeConfig};
use crate::error::Result;
use crate::jobs::{JobError, JobHandler, JobResult, QueuedJob, RetryPolicy};
use crate::model::TransitionEvent;
use crate::telemetry::SensitiveFieldRedactor;

/// One outbound mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Outbound mail collaborator.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Build the transport named by the config: the HTTP relay when a URL is set,
/// otherwise the log transport.
pub fn transport_from_config(
    config: &NotificationConfig,
    probe: &ProbeConfig,
) -> Result<Arc<dyn MailTransport>> {
    match &config.relay_url {
        Some(url) => {
            let (logged_url, logged_token) = loggable_relay(url, config.relay_token.as_deref());
            info!(
                relay_url = %logged_url,
                relay_token = logged_token.as_deref().unwrap_or("none"),
                "Sending notifications through mail relay"
            );
            Ok(Arc::new(HttpMailTransport::new(
                url.clone(),
                config.relay_token.clone(),
                probe.timeout(),
            )?))
        }
        None => {
            info!("No mail relay configured, notifications are logged only");
            Ok(Arc::new(LogMailTransport))
        }
    }
}

/// Relay settings with credentials masked.
fn loggable_relay(url: &str, token: Option<&str>) -> (String, Option<String>) {
    let redactor = SensitiveFieldRedactor::global();
    (
        redactor.redact_value(url),
        token.map(|token| redactor.redact("relay_token", token)),
    )
}

pub struct NotificationHandler {
    transport: Arc<dyn MailTransport>,
    renderer: Renderer,
    from: String,
}

impl NotificationHandler {
    pub fn new(transport: Arc<dyn MailTransport>, from: impl Into<String>) -> Result<Self> {
        Ok(Self {
            transport,
            renderer: Renderer::new()?,
            from: from.into(),
        })
    }

    /// Render and send one event.
    pub async fn dispatch(&self, event: &TransitionEvent) -> Result<()> {
        let message = self.renderer.render(event, &self.from)?;
        self.transport.send(&message).await
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    fn name(&self) -> &'static str {
        "notification"
    }

    async fn handle(&self, job: &QueuedJob) -> JobResult {
        let event: TransitionEvent = job.decode().map_err(|e| JobError::fatal(e.to_string()))?;

        match self.dispatch(&event).await {
            Ok(()) => {
                counter!("monitra_notifications_sent_total").increment(1);
                info!(
                    endpoint_id = %event.endpoint_id,
                    to = %event.recipient,
                    status = %event.current,
                    "Notification sent"
                );
            }
            Err(e) => {
                counter!("monitra_notifications_failed_total").increment(1);
                error!(
                    endpoint_id = %event.endpoint_id,
                    to = %event.recipient,
                    error = %e,
                    "Notification send failed"
                );
            }
        }
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::no_retry()
    }
}
