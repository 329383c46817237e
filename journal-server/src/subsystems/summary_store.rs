//! Summary store - durable, per-user, date-range-queryable summaries
//!
//! Two backends behind `SummaryStore`:
//! - `PgSummaryStore`: one row per stored summary in a configurable table
//! - `MemorySummaryStore`: process-local, for development and tests
//!
//! `store` always inserts. Several summaries may share a user and date;
//! readers sort by `timestamp` to find the latest.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use journal_core::models::now_millis;
use journal_core::{JournalConfig, NewSummary, Summary};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Insert a summary, stamping the write time.
    async fn store(&self, summary: NewSummary) -> Result<Summary, StoreError>;

    /// Summaries for `user_id` with `start <= date <= end`. Order unspecified.
    async fn query_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Summary>, StoreError>;

    /// Dates (ascending, deduplicated) that carry at least one summary in range.
    async fn query_dates_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, StoreError>;

    /// Short backend status string for `/health`.
    async fn health(&self) -> Result<String, StoreError>;

    fn name(&self) -> &str;
}

/// Build the store selected by `[summary_store] backend`.
pub async fn create_store_from_config(
    config: &JournalConfig,
) -> Result<Arc<dyn SummaryStore>, StoreError> {
    match config.summary_store.backend.as_str() {
        "memory" => Ok(Arc::new(MemorySummaryStore::new())),
        _ => {
            // Default: "postgres"
            let pool = journal_core::db::create_pool(&config.database).await?;
            let store = PgSummaryStore::new(pool, &config.database.summary_table)?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

// ============================================================================
// Postgres
// ============================================================================

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid && name.len() <= 63 {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    user_id: String,
    date: NaiveDate,
    polished_entry: String,
    key_points: String,
    original_entries: Vec<String>,
    created_ms: i64,
}

impl From<SummaryRow> for Summary {
    fn from(row: SummaryRow) -> Self {
        Summary {
            user_id: row.user_id,
            date: row.date,
            polished_entry: row.polished_entry,
            key_points: row.key_points,
            original_entries: row.original_entries,
            timestamp: row.created_ms,
        }
    }
}

#[derive(Clone)]
pub struct PgSummaryStore {
    pool: PgPool,
    table: String,
}

impl PgSummaryStore {
    pub fn new(pool: PgPool, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Create the table and its lookup index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                date DATE NOT NULL,
                polished_entry TEXT NOT NULL,
                key_points TEXT NOT NULL,
                original_entries TEXT[] NOT NULL DEFAULT '{{}}',
                created_ms BIGINT NOT NULL
            )",
            table = self.table
        );
        sqlx::query(&create).execute(&self.pool).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_user_date_idx ON {table} (user_id, date)",
            table = self.table
        );
        sqlx::query(&index).execute(&self.pool).await?;

        tracing::info!(table = %self.table, "Summary table ready");
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for PgSummaryStore {
    async fn store(&self, summary: NewSummary) -> Result<Summary, StoreError> {
        let stored = Summary::stamped(summary, now_millis());
        let query = format!(
            "INSERT INTO {} (id, user_id, date, polished_entry, key_points, original_entries, created_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.table
        );
        sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&stored.user_id)
            .bind(stored.date)
            .bind(&stored.polished_entry)
            .bind(&stored.key_points)
            .bind(&stored.original_entries)
            .bind(stored.timestamp)
            .execute(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn query_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Summary>, StoreError> {
        let query = format!(
            "SELECT user_id, date, polished_entry, key_points, original_entries, created_ms
             FROM {}
             WHERE user_id = $1 AND date BETWEEN $2 AND $3",
            self.table
        );
        let rows = sqlx::query_as::<_, SummaryRow>(&query)
            .bind(user_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Summary::from).collect())
    }

    async fn query_dates_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let query = format!(
            "SELECT DISTINCT date FROM {}
             WHERE user_id = $1 AND date BETWEEN $2 AND $3
             ORDER BY date",
            self.table
        );
        let rows: Vec<(NaiveDate,)> = sqlx::query_as(&query)
            .bind(user_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(journal_core::db::health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Clone, Default)]
pub struct MemorySummaryStore {
    rows: Arc<RwLock<Vec<Summary>>>,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SummaryStore for MemorySummaryStore {
    async fn store(&self, summary: NewSummary) -> Result<Summary, StoreError> {
        let stored = Summary::stamped(summary, now_millis());
        self.rows.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn query_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Summary>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id && s.date >= start && s.date <= end)
            .cloned()
            .collect())
    }

    async fn query_dates_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let mut dates: Vec<NaiveDate> = self
            .query_range(user_id, start, end)
            .await?
            .into_iter()
            .map(|s| s.date)
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(format!("in-memory ({} summaries)", self.len().await))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
