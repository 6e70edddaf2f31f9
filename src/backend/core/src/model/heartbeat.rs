use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{MonitraError, Result};

use super::endpoint::EndpointId;

/// Result category of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Up,
    Down,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = MonitraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(MonitraError::validation(format!("Unknown outcome '{}'", other))),
        }
    }
}

/// One recorded check. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: Uuid,
    pub endpoint_id: EndpointId,
    pub outcome: Outcome,
    pub latency_ms: u64,
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(
        endpoint_id: EndpointId,
        outcome: Outcome,
        latency_ms: u64,
        message: Option<String>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint_id,
            outcome,
            latency_ms,
            message,
            checked_at,
        }
    }
}
