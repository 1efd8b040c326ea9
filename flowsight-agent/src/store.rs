//! Postgres-backed mirror of the cluster's workload state.

use anyhow::{Context, Result};
use flowsight::cluster::{ClusterEvent, WorkloadObject};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

/// Maps a watched workload kind onto its inventory table. Kinds without a
/// table are not stored.
fn table_for(object: &WorkloadObject) -> Option<&'static str> {
    match object {
        WorkloadObject::Pod(_) => Some("pods"),
        WorkloadObject::Service(_) => Some("services"),
        WorkloadObject::Endpoints(_) => Some("endpoints"),
        _ => None,
    }
}

/// Whether the table carries an address column, and its name.
fn ip_column(table: &str) -> Option<&'static str> {
    match table {
        "pods" => Some("ip"),
        "services" => Some("cluster_ip"),
        _ => None,
    }
}

/// Stateful inventory of workloads mapped to their addresses and manifests.
pub struct StateStore {
    pool: PgPool,
}

impl StateStore {
    /// Connects to the database and clears any state left over from a
    /// previous run; the watch streams replay the full inventory.
    pub async fn connect(conn_string: &str) -> Result<StateStore> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(conn_string)
            .await
            .context("failed to connect to database")?;
        info!("connection to database established");

        let store = StateStore { pool };
        store.clear().await;
        Ok(store)
    }

    async fn clear(&self) {
        for table in ["pods", "services", "endpoints"] {
            if let Err(e) = sqlx::query(&format!("delete from {table}"))
                .execute(&self.pool)
                .await
            {
                error!(table, error = %e, "failed to clear table");
            }
        }
    }

    /// Applies one watch event to the inventory. Upserts are keyed by uid,
    /// so replayed MODIFIED events converge on a single row holding the
    /// latest manifest. Per-event failures are logged, not fatal.
    pub async fn handle_update(&self, event: &ClusterEvent) {
        let object = event.object();
        let Some(table) = table_for(object) else {
            debug!(kind = object.kind(), "ignoring unhandled workload kind");
            return;
        };
        let Some(uid) = object.uid() else {
            warn!(kind = object.kind(), "event object carries no uid");
            return;
        };

        let result = match event {
            ClusterEvent::Added(_) | ClusterEvent::Modified(_) => {
                self.upsert(table, uid, object).await
            }
            ClusterEvent::Deleted(_) => self.delete(table, uid).await,
        };

        match result {
            Ok(()) => info!(
                kind = object.kind(),
                namespace = object.namespace().unwrap_or_default(),
                name = object.name().unwrap_or_default(),
                ip = object.ip().unwrap_or_default(),
                "applied watch event"
            ),
            Err(e) => error!(kind = object.kind(), error = %e, "state store update failed"),
        }
    }

    async fn upsert(&self, table: &str, uid: &str, object: &WorkloadObject) -> Result<()> {
        let definition =
            serde_json::to_string(object).context("failed to serialize object manifest")?;

        let query = match ip_column(table) {
            Some(ip_column) => format!(
                "insert into {table} (uid, name, namespace, {ip_column}, definition) \
                 values ($1, $2, $3, $4, $5) \
                 on conflict (uid) do update set \
                 name = excluded.name, namespace = excluded.namespace, \
                 {ip_column} = excluded.{ip_column}, definition = excluded.definition"
            ),
            None => format!(
                "insert into {table} (uid, name, namespace, definition) \
                 values ($1, $2, $3, $4) \
                 on conflict (uid) do update set \
                 name = excluded.name, namespace = excluded.namespace, \
                 definition = excluded.definition"
            ),
        };

        let mut statement = sqlx::query(&query)
            .bind(uid)
            .bind(object.name())
            .bind(object.namespace());
        if ip_column(table).is_some() {
            // Unset addresses and headless services land as NULL
            statement = statement.bind(object.ip());
        }
        statement
            .bind(definition)
            .execute(&self.pool)
            .await
            .with_context(|| format!("upsert into {table} failed"))?;

        Ok(())
    }

    async fn delete(&self, table: &str, uid: &str) -> Result<()> {
        sqlx::query(&format!("delete from {table} where uid = $1"))
            .bind(uid)
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete from {table} failed"))?;

        Ok(())
    }
}
