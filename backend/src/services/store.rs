//! Event store for ledger streams
//!
//! Events are appended with an optimistic version check: an event is only
//! accepted when its sequence is exactly one past the stream's last version.
//! Snapshots are an optimization and never move backwards.

use std::collections::HashMap;
use std::sync::Arc;

use ledger_core::{LedgerEvent, LedgerKey, LedgerSnapshot};
use sqlx::{types::Json, PgPool};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

/// Where ledger events and snapshots are persisted
#[derive(Clone)]
pub enum EventStore {
    Memory(Arc<MemoryStore>),
    Postgres(PgPool),
}

/// Process-local store, used when no database is configured and in tests
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<LedgerKey, Vec<LedgerEvent>>>,
    snapshots: RwLock<HashMap<LedgerKey, LedgerSnapshot>>,
}

impl EventStore {
    pub fn in_memory() -> Self {
        EventStore::Memory(Arc::new(MemoryStore::default()))
    }

    pub fn postgres(pool: PgPool) -> Self {
        EventStore::Postgres(pool)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventStore::Memory(_) => "memory",
            EventStore::Postgres(_) => "postgres",
        }
    }

    /// Check that the backing store answers
    pub async fn ping(&self) -> bool {
        match self {
            EventStore::Memory(_) => true,
            EventStore::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
        }
    }

    /// Append one event; fails with a version conflict unless it extends the stream
    pub async fn append(&self, event: &LedgerEvent) -> AppResult<()> {
        match self {
            EventStore::Memory(store) => {
                let mut streams = store.events.write().await;
                let stream = streams.entry(event.key).or_default();
                let last = stream.last().map(|e| e.sequence).unwrap_or(0);
                if event.sequence != last + 1 {
                    return Err(AppError::VersionConflict {
                        key: event.key,
                        version: event.sequence,
                    });
                }
                stream.push(event.clone());
                Ok(())
            }
            EventStore::Postgres(pool) => {
                let last: Option<i64> = sqlx::query_scalar(
                    r#"
                    SELECT MAX(version) FROM ledger_events
                    WHERE organization_id = $1 AND site_id = $2 AND product_id = $3
                    "#,
                )
                .bind(event.key.organization_id)
                .bind(event.key.site_id)
                .bind(event.key.product_id)
                .fetch_one(pool)
                .await?;

                if event.sequence as i64 != last.unwrap_or(0) + 1 {
                    return Err(AppError::VersionConflict {
                        key: event.key,
                        version: event.sequence,
                    });
                }

                let result = sqlx::query(
                    r#"
                    INSERT INTO ledger_events (
                        organization_id, site_id, product_id, version,
                        event_type, idempotency_key, payload, occurred_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(event.key.organization_id)
                .bind(event.key.site_id)
                .bind(event.key.product_id)
                .bind(event.sequence as i64)
                .bind(event.payload.name())
                .bind(event.idempotency_key.as_deref())
                .bind(Json(event))
                .bind(event.occurred_at)
                .execute(pool)
                .await;

                match result {
                    Ok(_) => Ok(()),
                    // Another writer got the same version in first
                    Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                        Err(AppError::VersionConflict {
                            key: event.key,
                            version: event.sequence,
                        })
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Events with a version greater than `after_version`, in order
    pub async fn load_events(
        &self,
        key: LedgerKey,
        after_version: u64,
        limit: Option<usize>,
    ) -> AppResult<Vec<LedgerEvent>> {
        match self {
            EventStore::Memory(store) => {
                let streams = store.events.read().await;
                let events = streams
                    .get(&key)
                    .map(|stream| {
                        stream
                            .iter()
                            .filter(|e| e.sequence > after_version)
                            .take(limit.unwrap_or(usize::MAX))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(events)
            }
            EventStore::Postgres(pool) => {
                let rows: Vec<Json<LedgerEvent>> = sqlx::query_scalar(
                    r#"
                    SELECT payload FROM ledger_events
                    WHERE organization_id = $1 AND site_id = $2 AND product_id = $3
                      AND version > $4
                    ORDER BY version
                    LIMIT $5
                    "#,
                )
                .bind(key.organization_id)
                .bind(key.site_id)
                .bind(key.product_id)
                .bind(after_version as i64)
                .bind(limit.map(|l| l as i64))
                .fetch_all(pool)
                .await?;

                Ok(rows.into_iter().map(|Json(event)| event).collect())
            }
        }
    }

    /// A single event by version
    pub async fn load_event(&self, key: LedgerKey, version: u64) -> AppResult<Option<LedgerEvent>> {
        match self {
            EventStore::Memory(store) => {
                let streams = store.events.read().await;
                Ok(streams
                    .get(&key)
                    .and_then(|stream| stream.iter().find(|e| e.sequence == version))
                    .cloned())
            }
            EventStore::Postgres(pool) => {
                let row: Option<Json<LedgerEvent>> = sqlx::query_scalar(
                    r#"
                    SELECT payload FROM ledger_events
                    WHERE organization_id = $1 AND site_id = $2 AND product_id = $3
                      AND version = $4
                    "#,
                )
                .bind(key.organization_id)
                .bind(key.site_id)
                .bind(key.product_id)
                .bind(version as i64)
                .fetch_optional(pool)
                .await?;

                Ok(row.map(|Json(event)| event))
            }
        }
    }

    /// The event that recorded an idempotency key, if any
    pub async fn find_by_idempotency_key(
        &self,
        key: LedgerKey,
        idempotency_key: &str,
    ) -> AppResult<Option<LedgerEvent>> {
        match self {
            EventStore::Memory(store) => {
                let streams = store.events.read().await;
                Ok(streams
                    .get(&key)
                    .and_then(|stream| {
                        stream
                            .iter()
                            .find(|e| e.idempotency_key.as_deref() == Some(idempotency_key))
                    })
                    .cloned())
            }
            EventStore::Postgres(pool) => {
                let row: Option<Json<LedgerEvent>> = sqlx::query_scalar(
                    r#"
                    SELECT payload FROM ledger_events
                    WHERE organization_id = $1 AND site_id = $2 AND product_id = $3
                      AND idempotency_key = $4
                    "#,
                )
                .bind(key.organization_id)
                .bind(key.site_id)
                .bind(key.product_id)
                .bind(idempotency_key)
                .fetch_optional(pool)
                .await?;

                Ok(row.map(|Json(event)| event))
            }
        }
    }

    /// Store a snapshot unless a newer one is already stored
    pub async fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> AppResult<()> {
        match self {
            EventStore::Memory(store) => {
                let mut snapshots = store.snapshots.write().await;
                let newer = snapshots
                    .get(&snapshot.key)
                    .map(|existing| existing.version >= snapshot.version)
                    .unwrap_or(false);
                if !newer {
                    snapshots.insert(snapshot.key, snapshot.clone());
                }
                Ok(())
            }
            EventStore::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO ledger_snapshots (organization_id, site_id, product_id, version, state)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (organization_id, site_id, product_id) DO UPDATE
                    SET version = EXCLUDED.version, state = EXCLUDED.state, updated_at = NOW()
                    WHERE ledger_snapshots.version < EXCLUDED.version
                    "#,
                )
                .bind(snapshot.key.organization_id)
                .bind(snapshot.key.site_id)
                .bind(snapshot.key.product_id)
                .bind(snapshot.version as i64)
                .bind(Json(snapshot))
                .execute(pool)
                .await?;

                Ok(())
            }
        }
    }

    pub async fn load_snapshot(&self, key: LedgerKey) -> AppResult<Option<LedgerSnapshot>> {
        match self {
            EventStore::Memory(store) => Ok(store.snapshots.read().await.get(&key).cloned()),
            EventStore::Postgres(pool) => {
                let row: Option<Json<LedgerSnapshot>> = sqlx::query_scalar(
                    r#"
                    SELECT state FROM ledger_snapshots
                    WHERE organization_id = $1 AND site_id = $2 AND product_id = $3
                    "#,
                )
                .bind(key.organization_id)
                .bind(key.site_id)
                .bind(key.product_id)
                .fetch_optional(pool)
                .await?;

                Ok(row.map(|Json(snapshot)| snapshot))
            }
        }
    }
}
