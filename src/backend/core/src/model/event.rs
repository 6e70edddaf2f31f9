//! Queue payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::endpoint::{Endpoint, EndpointId, EndpointStatus};

/// "Check this endpoint now." The delivery attempt count lives on the queue envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTask {
    pub endpoint_id: EndpointId,
}

impl CheckTask {
    pub fn new(endpoint_id: EndpointId) -> Self {
        Self { endpoint_id }
    }

    /// At most one outstanding task per endpoint.
    pub fn dedupe_key(&self) -> String {
        self.endpoint_id.to_string()
    }
}

/// A change of an endpoint's up/down status. Only ever exists as a queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub endpoint_id: EndpointId,
    pub endpoint_name: String,
    pub target: String,
    pub previous: EndpointStatus,
    pub current: EndpointStatus,
    pub recipient: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn new(
        endpoint: &Endpoint,
        previous: EndpointStatus,
        current: EndpointStatus,
        probe_message: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let message = match probe_message {
            Some(detail) if !detail.is_empty() => format!(
                "{} ({}) is now {}: {}",
                endpoint.name,
                endpoint.target,
                current.as_str().to_uppercase(),
                detail
            ),
            _ => format!(
                "{} ({}) is now {}",
                endpoint.name,
                endpoint.target,
                current.as_str().to_uppercase()
            ),
        };

        Self {
            endpoint_id: endpoint.id,
            endpoint_name: endpoint.name.clone(),
            target: endpoint.target.clone(),
            previous,
            current,
            recipient: endpoint.notify_email.clone(),
            message,
            occurred_at,
        }
    }
}
