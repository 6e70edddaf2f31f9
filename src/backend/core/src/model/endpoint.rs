//! Registered endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::ChecksConfig;
use crate::error::{MonitraError, Result};
use crate::probe::ProbeTarget;

use super::heartbeat::Outcome;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EndpointId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for EndpointId {
    type Err = MonitraError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| MonitraError::validation(format!("Invalid endpoint id: {}", s)))
    }
}

/// Identifier of the user owning an endpoint. Users live in the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for UserId {
    type Err = MonitraError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| MonitraError::validation(format!("Invalid user id: {}", s)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Check Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// How an endpoint is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// HTTP GET; any response counts as reachable
    Http,
    /// TCP connect
    Port,
    /// ICMP echo
    Ping,
}

impl CheckKind {
    pub const ALL: [CheckKind; 3] = [CheckKind::Http, CheckKind::Port, CheckKind::Ping];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Port => "port",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = MonitraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "port" => Ok(Self::Port),
            "ping" => Ok(Self::Ping),
            other => Err(MonitraError::validation(format!(
                "Unknown check kind '{}', expected http, port or ping",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Endpoint Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Current health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    /// Registered or resumed, not checked yet
    Pending,
    Up,
    Down,
    /// Checks suspended by the owner
    Paused,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Up => "up",
            Self::Down => "down",
            Self::Paused => "paused",
        }
    }
}

impl From<Outcome> for EndpointStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Up => Self::Up,
            Outcome::Down => Self::Down,
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointStatus {
    type Err = MonitraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "paused" => Ok(Self::Paused),
            other => Err(MonitraError::validation(format!("Unknown endpoint status '{}'", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Endpoint
// ═══════════════════════════════════════════════════════════════════════════════

/// A registered target that is checked on a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub owner_id: UserId,
    pub name: String,
    pub target: String,
    pub kind: CheckKind,
    pub interval_secs: u64,
    pub active: bool,
    pub status: EndpointStatus,
    /// Recipient of transition alerts
    pub notify_email: String,
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Whether the scheduler should keep a timer for this endpoint.
    pub fn is_schedulable(&self) -> bool {
        self.active && self.status != EndpointStatus::Paused
    }

    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.interval_secs as i64)
    }
}

/// A registration request, validated before anything is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEndpoint {
    pub owner_id: UserId,
    pub notify_email: String,
    pub name: String,
    pub target: String,
    pub kind: CheckKind,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

const MAX_NAME_LEN: usize = 255;

impl NewEndpoint {
    /// Validate against the configured limits and build the endpoint in `pending`.
    pub fn into_endpoint(self, limits: &ChecksConfig, now: DateTime<Utc>) -> Result<Endpoint> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(MonitraError::validation("Endpoint name must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(MonitraError::validation(format!(
                "Endpoint name must be at most {} characters",
                MAX_NAME_LEN
            )));
        }

        let target = self.target.trim().to_string();
        ProbeTarget::parse(self.kind, &target)?;

        let interval_secs = self.interval_secs.unwrap_or(limits.default_interval_secs);
        if interval_secs < limits.min_interval_secs || interval_secs > limits.max_interval_secs {
            return Err(MonitraError::interval_out_of_range(
                interval_secs,
                limits.min_interval_secs,
                limits.max_interval_secs,
            ));
        }

        let notify_email = self.notify_email.trim().to_string();
        if !looks_like_email(&notify_email) {
            return Err(MonitraError::validation(format!(
                "Invalid notification address: {}",
                notify_email
            )));
        }

        Ok(Endpoint {
            id: EndpointId::new(),
            owner_id: self.owner_id,
            name,
            target,
            kind: self.kind,
            interval_secs,
            active: true,
            status: EndpointStatus::Pending,
            notify_email,
            last_checked: None,
            created_at: now,
            updated_at: now,
        })
    }
}

fn looks_like_email(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !address.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
