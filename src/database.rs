/// file: src/database.rs
/// description: PostgreSQL pool setup and the connections/delta/handles data access layer.
/// Database layer — deadpool_postgres pool + all SQL operations.
///
/// Schema `tracker` (see `migrations/001_initial.sql`, applied by the
/// `migrate` subcommand): `connections` holds every `(handle, company)` pair
/// once, `connections_delta` mirrors recent additions, `handles` is the batch
/// target list.
use crate::config::DatabaseConfig;
use crate::models::{AppError, CleanRow, PersistedRecord, RecordKey, RowRange};
use crate::publisher::{Appended, DeltaMode, RecordStore};
use async_trait::async_trait;
use deadpool_postgres::{
    Config as PoolConfig, ManagerConfig, Pool, PoolConfig as DeadpoolPoolConfig, RecyclingMethod,
    Runtime,
};
use std::collections::HashSet;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

const MIGRATION_001: &str = include_str!("../migrations/001_initial.sql");

// ---------------------------------------------------------------------------
// Pool construction
// ---------------------------------------------------------------------------

pub fn build_pool(cfg: &DatabaseConfig) -> anyhow::Result<Pool> {
    let mut pc = PoolConfig::new();
    pc.host = Some(cfg.host.clone());
    pc.port = Some(cfg.port);
    pc.dbname = Some(cfg.database.clone());
    pc.user = Some(cfg.user.clone());
    if !cfg.password.is_empty() {
        pc.password = Some(cfg.password.clone());
    }
    pc.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    pc.pool = Some(DeadpoolPoolConfig::new(cfg.max_connections));

    pc.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| anyhow::anyhow!("Failed to create DB pool: {e}"))
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn map_record(row: &Row) -> PersistedRecord {
    PersistedRecord {
        handle: row.get("handle"),
        company: row.get("company"),
        date_scraped: row.get("date_scraped"),
        is_new: row.get("is_new"),
    }
}

// ---------------------------------------------------------------------------
// DbClient
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    // ── Liveness / schema ───────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<(), AppError> {
        let conn = self.pool.get().await?;
        conn.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        let conn = self.pool.get().await?;
        conn.batch_execute(MIGRATION_001).await?;
        info!("Applied migration 001_initial");
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    pub async fn get_connections(
        &self,
        handle: Option<&str>,
    ) -> Result<Vec<PersistedRecord>, AppError> {
        let conn = self.pool.get().await?;
        let rows = match handle {
            Some(h) => conn.query(sql_connections_for_handle(), &[&h]).await?,
            None => conn.query(sql_all_connections(), &[]).await?,
        };
        Ok(rows.iter().map(map_record).collect())
    }

    pub async fn fetch_handles(&self) -> Result<Vec<String>, AppError> {
        let conn = self.pool.get().await?;
        let rows = conn.query(sql_fetch_handles(), &[]).await?;
        Ok(rows.iter().map(|r| r.get("handle")).collect())
    }
}

#[async_trait]
impl RecordStore for DbClient {
    async fn read_all_keys(&self) -> Result<HashSet<RecordKey>, AppError> {
        let conn = self.pool.get().await?;
        let rows = conn.query(sql_read_all_keys(), &[]).await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<_, String>("handle"), r.get::<_, String>("company")))
            .collect())
    }

    async fn append_rows(&self, rows: &[CleanRow]) -> Result<Appended, AppError> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        let stmt = tx.prepare_cached(sql_append_connection()).await?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            // A concurrent writer may have inserted the key since the read.
            if let Some(r) = tx
                .query_opt(&stmt, &[&row.handle, &row.item, &row.date])
                .await?
            {
                ids.push(r.get::<_, i64>("id"));
                inserted.push(row.clone());
            }
        }
        tx.commit().await?;

        let range = match (ids.iter().min(), ids.iter().max()) {
            (Some(&start), Some(&end)) => RowRange { start, end },
            // every key was taken by another writer
            _ => RowRange { start: 0, end: -1 },
        };
        debug!(requested = rows.len(), inserted = ids.len(), "Appended connections");
        Ok(Appended {
            range,
            rows: inserted,
        })
    }

    async fn write_delta(&self, rows: &[CleanRow], mode: DeltaMode) -> Result<(), AppError> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        if mode == DeltaMode::Replace {
            tx.execute(sql_clear_delta(), &[]).await?;
        }
        let stmt = tx.prepare_cached(sql_append_delta()).await?;
        for row in rows {
            tx.execute(&stmt, &[&row.handle, &row.item, &row.date])
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_range(&self, range: RowRange) -> Result<(), AppError> {
        if range.is_empty() {
            return Ok(());
        }
        let conn = self.pool.get().await?;
        let n = conn
            .execute(sql_mark_range(), &[&range.start, &range.end])
            .await?;
        debug!(start = range.start, end = range.end, marked = n, "Flagged new rows");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQL text
// ---------------------------------------------------------------------------

fn sql_read_all_keys() -> &'static str {
    "SELECT handle, company FROM tracker.connections"
}

fn sql_append_connection() -> &'static str {
    "INSERT INTO tracker.connections (handle, company, date_scraped) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (handle, company) DO NOTHING \
     RETURNING id"
}

fn sql_clear_delta() -> &'static str {
    "DELETE FROM tracker.connections_delta"
}

fn sql_append_delta() -> &'static str {
    "INSERT INTO tracker.connections_delta (handle, company, date_scraped) \
     VALUES ($1, $2, $3)"
}

fn sql_mark_range() -> &'static str {
    "UPDATE tracker.connections SET is_new = TRUE WHERE id BETWEEN $1 AND $2"
}

fn sql_all_connections() -> &'static str {
    "SELECT handle, company, date_scraped, is_new FROM tracker.connections \
     ORDER BY date_scraped DESC, id DESC"
}

fn sql_connections_for_handle() -> &'static str {
    "SELECT handle, company, date_scraped, is_new FROM tracker.connections \
     WHERE handle = $1 \
     ORDER BY date_scraped DESC, id DESC"
}

fn sql_fetch_handles() -> &'static str {
    "SELECT handle FROM tracker.handles ORDER BY position, handle"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_never_overwrite_existing_pairs() {
        let sql = sql_append_connection();
        assert!(sql.contains("ON CONFLICT (handle, company) DO NOTHING"));
        assert!(sql.contains("RETURNING id"));
    }

    #[test]
    fn mark_range_is_inclusive_on_both_ends() {
        assert!(sql_mark_range().contains("id BETWEEN $1 AND $2"));
    }

    #[test]
    fn connection_listings_are_newest_first() {
        assert!(sql_all_connections().ends_with("ORDER BY date_scraped DESC, id DESC"));
        let filtered = sql_connections_for_handle();
        assert!(filtered.contains("WHERE handle = $1"));
        assert!(filtered.contains("ORDER BY date_scraped DESC"));
    }

    #[test]
    fn migration_declares_dedup_constraint() {
        assert!(MIGRATION_001.contains("CREATE SCHEMA IF NOT EXISTS tracker"));
        assert!(MIGRATION_001.contains("UNIQUE (handle, company)"));
        assert!(MIGRATION_001.contains("tracker.connections_delta"));
        assert!(MIGRATION_001.contains("tracker.handles"));
    }

    #[test]
    fn delta_replace_clears_whole_table() {
        assert_eq!(sql_clear_delta(), "DELETE FROM tracker.connections_delta");
    }
}
