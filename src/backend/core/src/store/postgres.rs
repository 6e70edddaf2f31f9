use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::MonitorStore;
use crate::config::DatabaseConfig;
use crate::error::{MonitraError, Result};
use crate::model::{CheckKind, Endpoint, EndpointId, EndpointStatus, Heartbeat, Outcome, UserId};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `endpoints` and `heartbeats` tables.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MonitraError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const ENDPOINT_COLUMNS: &str = "id, owner_id, name, target, kind, interval_secs, active, status, \
                                notify_email, last_checked, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct EndpointRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    target: String,
    kind: String,
    interval_secs: i64,
    active: bool,
    status: String,
    notify_email: String,
    last_checked: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EndpointRow> for Endpoint {
    type Error = MonitraError;

    fn try_from(row: EndpointRow) -> Result<Self> {
        Ok(Endpoint {
            id: EndpointId(row.id),
            owner_id: UserId(row.owner_id),
            name: row.name,
            target: row.target,
            kind: row.kind.parse::<CheckKind>()?,
            interval_secs: row.interval_secs.max(0) as u64,
            active: row.active,
            status: row.status.parse::<EndpointStatus>()?,
            notify_email: row.notify_email,
            last_checked: row.last_checked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HeartbeatRow {
    id: Uuid,
    endpoint_id: Uuid,
    outcome: String,
    latency_ms: i64,
    message: Option<String>,
    checked_at: DateTime<Utc>,
}

impl TryFrom<HeartbeatRow> for Heartbeat {
    type Error = MonitraError;

    fn try_from(row: HeartbeatRow) -> Result<Self> {
        Ok(Heartbeat {
            id: row.id,
            endpoint_id: EndpointId(row.endpoint_id),
            outcome: row.outcome.parse::<Outcome>()?,
            latency_ms: row.latency_ms.max(0) as u64,
            message: row.message,
            checked_at: row.checked_at,
        })
    }
}

fn endpoints(rows: Vec<EndpointRow>) -> Result<Vec<Endpoint>> {
    rows.into_iter().map(Endpoint::try_from).collect()
}

#[async_trait]
impl MonitorStore for PgStore {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO endpoints (id, owner_id, name, target, kind, interval_secs, active,
                                   status, notify_email, last_checked, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(endpoint.id.0)
        .bind(endpoint.owner_id.0)
        .bind(&endpoint.name)
        .bind(&endpoint.target)
        .bind(endpoint.kind.as_str())
        .bind(endpoint.interval_secs as i64)
        .bind(endpoint.active)
        .bind(endpoint.status.as_str())
        .bind(&endpoint.notify_email)
        .bind(endpoint.last_checked)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>> {
        let row = sqlx::query_as::<_, EndpointRow>(&format!(
            "SELECT {} FROM endpoints WHERE id = $1",
            ENDPOINT_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Endpoint::try_from).transpose()
    }

    async fn list_endpoints_for_user(&self, owner: UserId) -> Result<Vec<Endpoint>> {
        let rows = sqlx::query_as::<_, EndpointRow>(&format!(
            "SELECT {} FROM endpoints WHERE owner_id = $1 ORDER BY created_at, id",
            ENDPOINT_COLUMNS
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;

        endpoints(rows)
    }

    async fn list_active_endpoints(&self) -> Result<Vec<Endpoint>> {
        let rows = sqlx::query_as::<_, EndpointRow>(&format!(
            "SELECT {} FROM endpoints WHERE active ORDER BY id",
            ENDPOINT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        endpoints(rows)
    }

    async fn update_endpoint_status(
        &self,
        id: EndpointId,
        status: EndpointStatus,
        last_checked: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE endpoints
            SET status = $2, last_checked = $3, updated_at = NOW()
            WHERE id = $1 AND active
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(last_checked)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_endpoint_active(
        &self,
        id: EndpointId,
        active: bool,
        status: EndpointStatus,
    ) -> Result<Option<Endpoint>> {
        let row = sqlx::query_as::<_, EndpointRow>(&format!(
            r#"
            UPDATE endpoints
            SET active = $2, status = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ENDPOINT_COLUMNS
        ))
        .bind(id.0)
        .bind(active)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Endpoint::try_from).transpose()
    }

    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM endpoints WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (id, endpoint_id, outcome, latency_ms, message, checked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(heartbeat.id)
        .bind(heartbeat.endpoint_id.0)
        .bind(heartbeat.outcome.as_str())
        .bind(heartbeat.latency_ms as i64)
        .bind(&heartbeat.message)
        .bind(heartbeat.checked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            // foreign_key_violation: the endpoint was deleted after it was read
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                MonitraError::endpoint_not_found(&heartbeat.endpoint_id)
            }
            other => MonitraError::from(other),
        })?;

        Ok(())
    }

    async fn recent_heartbeats(&self, id: EndpointId, limit: usize) -> Result<Vec<Heartbeat>> {
        let rows = sqlx::query_as::<_, HeartbeatRow>(
            r#"
            SELECT id, endpoint_id, outcome, latency_ms, message, checked_at
            FROM heartbeats
            WHERE endpoint_id = $1
            ORDER BY checked_at DESC
            LIMIT $2
            "#,
        )
        .bind(id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Heartbeat::try_from).collect()
    }
}
