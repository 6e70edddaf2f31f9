use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::MonitorStore;
use crate::clock::{SharedClock, SystemClock};
use crate::error::{MonitraError, Result};
use crate::model::{Endpoint, EndpointId, EndpointStatus, Heartbeat, UserId};

#[derive(Default)]
struct Inner {
    endpoints: HashMap<EndpointId, Endpoint>,
    heartbeats: HashMap<EndpointId, Vec<Heartbeat>>,
}

/// In-process store. Nothing survives a restart.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    clock: SharedClock,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            clock,
        }
    }

    /// Number of heartbeats stored for an endpoint.
    pub fn heartbeat_count(&self, id: EndpointId) -> usize {
        self.inner.read().heartbeats.get(&id).map_or(0, Vec::len)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonitorStore for InMemoryStore {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.endpoints.contains_key(&endpoint.id) {
            return Err(MonitraError::new(
                crate::error::ErrorCode::DuplicateRecord,
                format!("Endpoint already exists: {}", endpoint.id),
            ));
        }
        inner.endpoints.insert(endpoint.id, endpoint.clone());
        Ok(())
    }

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>> {
        Ok(self.inner.read().endpoints.get(&id).cloned())
    }

    async fn list_endpoints_for_user(&self, owner: UserId) -> Result<Vec<Endpoint>> {
        let mut endpoints: Vec<Endpoint> = self
            .inner
            .read()
            .endpoints
            .values()
            .filter(|e| e.owner_id == owner)
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(endpoints)
    }

    async fn list_active_endpoints(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints: Vec<Endpoint> = self
            .inner
            .read()
            .endpoints
            .values()
            .filter(|e| e.active)
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| e.id);
        Ok(endpoints)
    }

    async fn update_endpoint_status(
        &self,
        id: EndpointId,
        status: EndpointStatus,
        last_checked: DateTime<Utc>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        match inner.endpoints.get_mut(&id) {
            Some(endpoint) if endpoint.active => {
                endpoint.status = status;
                endpoint.last_checked = Some(last_checked);
                endpoint.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_endpoint_active(
        &self,
        id: EndpointId,
        active: bool,
        status: EndpointStatus,
    ) -> Result<Option<Endpoint>> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        Ok(inner.endpoints.get_mut(&id).map(|endpoint| {
            endpoint.active = active;
            endpoint.status = status;
            endpoint.updated_at = now;
            endpoint.clone()
        }))
    }

    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.heartbeats.remove(&id);
        Ok(inner.endpoints.remove(&id).is_some())
    }

    async fn append_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.endpoints.contains_key(&heartbeat.endpoint_id) {
            return Err(MonitraError::endpoint_not_found(heartbeat.endpoint_id));
        }
        inner
            .heartbeats
            .entry(heartbeat.endpoint_id)
            .or_default()
            .push(heartbeat.clone());
        Ok(())
    }

    async fn recent_heartbeats(&self, id: EndpointId, limit: usize) -> Result<Vec<Heartbeat>> {
        let inner = self.inner.read();
        let Some(all) = inner.heartbeats.get(&id) else {
            return Ok(Vec::new());
        };
        // Appended in completion order; newest last.
        let mut recent: Vec<Heartbeat> = all.iter().rev().cloned().collect();
        recent.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));
        recent.truncate(limit);
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChecksConfig;
    use crate::model::{CheckKind, NewEndpoint, Outcome};
    use chrono::Duration;
    use uuid::Uuid;

    fn endpoint(owner: UserId) -> Endpoint {
        NewEndpoint {
            owner_id: owner,
            notify_email: "ops@example.com".into(),
            name: "api".into(),
            target: "https://example.com".into(),
            kind: CheckKind::Http,
            interval_secs: Some(60),
        }
        .into_endpoint(&ChecksConfig::default(), Utc::now())
        .unwrap()
    }

    #[tokio::test]
    async fn test_status_update_skipped_while_inactive() {
        let store = InMemoryStore::new();
        let e = endpoint(UserId(Uuid::new_v4()));
        store.create_endpoint(&e).await.unwrap();

        assert!(store.update_endpoint_status(e.id, EndpointStatus::Up, Utc::now()).await.unwrap());

        store.set_endpoint_active(e.id, false, EndpointStatus::Paused).await.unwrap();
        assert!(!store.update_endpoint_status(e.id, EndpointStatus::Down, Utc::now()).await.unwrap());

        let stored = store.get_endpoint(e.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EndpointStatus::Paused);
        assert!(store.list_active_endpoints().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_heartbeats_newest_first() {
        let store = InMemoryStore::new();
        let e = endpoint(UserId(Uuid::new_v4()));
        store.create_endpoint(&e).await.unwrap();

        let start = Utc::now();
        for i in 0..5 {
            let hb = Heartbeat::new(e.id, Outcome::Up, i, None, start + Duration::seconds(i as i64));
            store.append_heartbeat(&hb).await.unwrap();
        }

        let recent = store.recent_heartbeats(e.id, 3).await.unwrap();
        let latencies: Vec<u64> = recent.iter().map(|h| h.latency_ms).collect();
        assert_eq!(latencies, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_delete_cascades_heartbeats() {
        let store = InMemoryStore::new();
        let e = endpoint(UserId(Uuid::new_v4()));
        store.create_endpoint(&e).await.unwrap();
        store
            .append_heartbeat(&Heartbeat::new(e.id, Outcome::Down, 10, None, Utc::now()))
            .await
            .unwrap();

        assert!(store.delete_endpoint(e.id).await.unwrap());
        assert_eq!(store.heartbeat_count(e.id), 0);
        assert!(store.append_heartbeat(&Heartbeat::new(e.id, Outcome::Up, 1, None, Utc::now())).await.is_err());
    }

    #[tokio::test]
    async fn test_list_for_user_filters_owner() {
        let store = InMemoryStore::new();
        let alice = UserId(Uuid::new_v4());
        let bob = UserId(Uuid::new_v4());
        store.create_endpoint(&endpoint(alice)).await.unwrap();
        store.create_endpoint(&endpoint(alice)).await.unwrap();
        store.create_endpoint(&endpoint(bob)).await.unwrap();

        assert_eq!(store.list_endpoints_for_user(alice).await.unwrap().len(), 2);
        assert_eq!(store.list_endpoints_for_user(bob).await.unwrap().len(), 1);
    }
}
