//! Persistent store for endpoints and heartbeats.
//!
//! [`MonitorStore`] is the only way the core touches persistence. Two
//! implementations ship: [`InMemoryStore`] for tests and single-process dev runs,
//! and [`PgStore`] for PostgreSQL.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Endpoint, EndpointId, EndpointStatus, Heartbeat, UserId};

/// CRUD operations the core needs from its store.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Persist a validated endpoint.
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>>;

    /// Endpoints owned by a user, oldest first.
    async fn list_endpoints_for_user(&self, owner: UserId) -> Result<Vec<Endpoint>>;

    /// Every endpoint the scheduler should keep a timer for.
    async fn list_active_endpoints(&self) -> Result<Vec<Endpoint>>;

    /// Write the result of a check. Applies only while the endpoint is active;
    /// returns whether a row was updated.
    async fn update_endpoint_status(
        &self,
        id: EndpointId,
        status: EndpointStatus,
        last_checked: DateTime<Utc>,
    ) -> Result<bool>;

    /// Pause or resume. Returns the updated endpoint, `None` if it does not exist.
    async fn set_endpoint_active(
        &self,
        id: EndpointId,
        active: bool,
        status: EndpointStatus,
    ) -> Result<Option<Endpoint>>;

    /// Delete an endpoint together with its heartbeats.
    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool>;

    async fn append_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()>;

    /// The most recent `limit` heartbeats, newest first.
    async fn recent_heartbeats(&self, id: EndpointId, limit: usize) -> Result<Vec<Heartbeat>>;
}
