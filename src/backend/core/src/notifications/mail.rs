//! Outbound mail transports.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

use super::{MailMessage, MailTransport};
use crate::error::{MonitraError, Result};

/// Posts each message as JSON to a mail relay.
pub struct HttpMailTransport {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpMailTransport {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let mut request = self.client.post(&self.url).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MonitraError::mail_delivery_failed(&message.to, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitraError::mail_delivery_failed(
                &message.to,
                format!("relay returned {}: {}", status, body),
            ));
        }
        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.text_body,
            "Mail relay not configured, logging notification"
        );
        Ok(())
    }
}
