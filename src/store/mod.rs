//! Email log backed by SQLite.
//!
//! The [`EmailLogStore`] owns the `email_logs` table: one row per provider
//! send attempt, created as `pending` and moved to `sent` or `failed` once
//! the provider answers. Rows are only removed by [`EmailLogStore::purge_older_than`]
//! or [`EmailLogStore::clear_all`].
//!
//! A store opened with logging disabled holds no pool; every operation is
//! then a no-op returning `None`, `false`, `0` or an empty list.

pub mod export;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;

pub use export::logs_to_csv;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Delivery status of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Attempt recorded, provider has not answered yet.
    Pending,
    /// Provider accepted the message.
    Sent,
    /// Provider rejected the message or could not be reached.
    Failed,
}

impl LogStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, LogStoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(LogStoreError::InvalidEnum {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailLog {
    /// Row id.
    pub id: i64,
    /// Provider email id (empty until the provider assigns one).
    pub provider_id: String,
    /// Comma-joined recipients.
    pub to_email: String,
    /// Sender address.
    pub from_email: String,
    /// Subject line.
    pub subject: String,
    /// Current status.
    pub status: LogStatus,
    /// Provider response or error detail (JSON text).
    pub response: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 last-update timestamp.
    pub updated_at: String,
}

/// Fields for a new log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    /// Provider email id, if already known.
    pub provider_id: String,
    /// Comma-joined recipients.
    pub to_email: String,
    /// Sender address.
    pub from_email: String,
    /// Subject line.
    pub subject: String,
    /// Initial status.
    pub status: LogStatus,
    /// Response or error detail.
    pub response: String,
}

/// Optional fields updated alongside a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusDetail {
    /// Provider email id to store.
    pub provider_id: Option<String>,
    /// Response body or error detail to store.
    pub response: Option<String>,
}

/// Sort direction on `created_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Newest first.
    #[default]
    Desc,
    /// Oldest first.
    Asc,
}

/// Query filter for [`EmailLogStore::query`] and [`EmailLogStore::count`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Only rows with this status.
    pub status: Option<LogStatus>,
    /// Substring matched against sender and recipients.
    pub email: Option<String>,
    /// Only rows created at or after this instant.
    pub date_from: Option<DateTime<Utc>>,
    /// Only rows created at or before this instant.
    pub date_to: Option<DateTime<Utc>>,
    /// Sort direction.
    pub order: SortOrder,
    /// Maximum rows returned; all rows when `None`.
    pub limit: Option<u32>,
    /// Rows to skip.
    pub offset: u32,
}

impl LogFilter {
    /// Newest `limit` rows.
    pub fn recent(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Aggregate counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    /// All rows.
    pub total: u64,
    /// Rows with status `sent`.
    pub sent: u64,
    /// Rows with status `failed`.
    pub failed: u64,
    /// Rows with status `pending`.
    pub pending: u64,
}

impl LogStats {
    /// Percentage of rows that were sent, rounded to two decimals.
    pub fn success_rate(&self) -> f64 {
        let (Ok(sent), Ok(total)) = (u32::try_from(self.sent), u32::try_from(self.total)) else {
            return 0.0;
        };
        if total == 0 {
            return 0.0;
        }
        let rate = f64::from(sent) / f64::from(total) * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from email log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database directory could not be created.
    #[error("failed to prepare log directory {path}: {source}")]
    Io {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An invalid enum value was read from the database.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which field contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// CSV export failed.
    #[error("export failed: {0}")]
    Export(String),
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

type LogRow = (i64, String, String, String, String, String, String, String, String);

const SELECT_COLUMNS: &str = "SELECT id, provider_id, to_email, from_email, subject, status, \
                              response, created_at, updated_at FROM email_logs";

/// SQLite-backed email log.
#[derive(Debug, Clone)]
pub struct EmailLogStore {
    pool: Option<SqlitePool>,
}

impl EmailLogStore {
    /// Open (or create) the log database at `path` and apply the schema.
    ///
    /// When `enabled` is false no database is touched and the store is inert.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migration fails.
    pub async fn open(path: &Path, enabled: bool) -> Result<Self, LogStoreError> {
        if !enabled {
            return Ok(Self::disabled());
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LogStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// An in-memory store (single connection), used by tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub async fn in_memory() -> Result<Self, LogStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// A store with logging disabled.
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, LogStoreError> {
        sqlx::raw_sql(include_str!("../../migrations/001_email_logs.sql"))
            .execute(&pool)
            .await?;
        info!("email log store initialised");
        Ok(Self { pool: Some(pool) })
    }

    /// Returns `true` when logging is enabled.
    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// The underlying pool, when enabled.
    pub fn pool(&self) -> Option<&SqlitePool> {
        self.pool.as_ref()
    }

    /// Insert a new row and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`LogStoreError::Database`] if the insert fails.
    pub async fn record(&self, entry: &NewLogEntry) -> Result<Option<i64>, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            "INSERT INTO email_logs \
             (provider_id, to_email, from_email, subject, status, response, \
              created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        )
        .bind(&entry.provider_id)
        .bind(&entry.to_email)
        .bind(&entry.from_email)
        .bind(&entry.subject)
        .bind(entry.status.as_str())
        .bind(&entry.response)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(Some(result.last_insert_rowid()))
    }

    /// Move a row to `status`, storing any provided detail.
    ///
    /// Returns `true` when a row was updated.
    ///
    /// # Errors
    ///
    /// Returns [`LogStoreError::Database`] if the update fails.
    pub async fn update_status(
        &self,
        id: i64,
        status: LogStatus,
        detail: StatusDetail,
    ) -> Result<bool, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE email_logs SET status = ?1, updated_at = ?2, \
             provider_id = COALESCE(?3, provider_id), response = COALESCE(?4, response) \
             WHERE id = ?5",
        )
        .bind(status.as_str())
        .bind(timestamp(Utc::now()))
        .bind(detail.provider_id.filter(|p| !p.is_empty()))
        .bind(detail.response.filter(|r| !r.is_empty()))
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row holds an unknown status.
    pub async fn get(&self, id: i64) -> Result<Option<EmailLog>, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };
        let row: Option<LogRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.map(into_log).transpose()
    }

    /// All rows carrying a provider email id, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row holds an unknown status.
    pub async fn by_provider_id(&self, provider_id: &str) -> Result<Vec<EmailLog>, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(Vec::new());
        };
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE provider_id = ?1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(provider_id)
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(into_log).collect()
    }

    /// Rows matching `filter`, ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row holds an unknown status.
    pub async fn query(&self, filter: &LogFilter) -> Result<Vec<EmailLog>, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(Vec::new());
        };
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        push_filter(&mut builder, filter);

        let direction = match filter.order {
            SortOrder::Desc => "DESC",
            SortOrder::Asc => "ASC",
        };
        builder.push(format!(" ORDER BY created_at {direction}, id {direction}"));
        builder.push(" LIMIT ");
        builder.push_bind(filter.limit.map_or(-1, i64::from));
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(filter.offset));

        let rows: Vec<LogRow> = builder.build_query_as().fetch_all(pool).await?;
        rows.into_iter().map(into_log).collect()
    }

    /// Number of rows matching `filter` (ordering and paging ignored).
    ///
    /// # Errors
    ///
    /// Returns [`LogStoreError::Database`] if the query fails.
    pub async fn count(&self, filter: &LogFilter) -> Result<u64, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(0);
        };
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT count(*) FROM email_logs");
        push_filter(&mut builder, filter);
        let row: (i64,) = builder.build_query_as().fetch_one(pool).await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Counts by status, optionally limited to rows created since `since`.
    ///
    /// # Errors
    ///
    /// Returns [`LogStoreError::Database`] if the query fails.
    pub async fn statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogStats, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(LogStats::default());
        };
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT status, count(*) FROM email_logs");
        if let Some(since) = since {
            builder.push(" WHERE created_at >= ");
            builder.push_bind(timestamp(since));
        }
        builder.push(" GROUP BY status");
        let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(pool).await?;

        let mut stats = LogStats::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match LogStatus::parse(&status)? {
                LogStatus::Sent => stats.sent = count,
                LogStatus::Failed => stats.failed = count,
                LogStatus::Pending => stats.pending = count,
            }
            stats.total = stats.total.saturating_add(count);
        }
        Ok(stats)
    }

    /// Delete rows created more than `age` ago; returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns [`LogStoreError::Database`] if the delete fails.
    pub async fn purge_older_than(&self, age: TimeDelta) -> Result<u64, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(0);
        };
        let Some(threshold) = Utc::now().checked_sub_signed(age) else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM email_logs WHERE created_at < ?1")
            .bind(timestamp(threshold))
            .execute(pool)
            .await?;
        info!(deleted = result.rows_affected(), "purged old email logs");
        Ok(result.rows_affected())
    }

    /// Delete every row and reset the id sequence.
    ///
    /// # Errors
    ///
    /// Returns [`LogStoreError::Database`] if the delete fails.
    pub async fn clear_all(&self) -> Result<bool, LogStoreError> {
        let Some(pool) = &self.pool else {
            return Ok(false);
        };
        sqlx::raw_sql(
            "DELETE FROM email_logs; DELETE FROM sqlite_sequence WHERE name = 'email_logs';",
        )
        .execute(pool)
        .await?;
        info!("cleared email logs");
        Ok(true)
    }
}

/// Format a timestamp the way rows store it (sortable RFC 3339, UTC).
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &LogFilter) {
    let mut sep = " WHERE ";

    if let Some(status) = filter.status {
        builder.push(sep);
        builder.push("status = ");
        builder.push_bind(status.as_str());
        sep = " AND ";
    }
    if let Some(email) = filter.email.as_deref().filter(|e| !e.trim().is_empty()) {
        let pattern = format!("%{}%", escape_like(email.trim()));
        builder.push(sep);
        builder.push("(to_email LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\' OR from_email LIKE ");
        builder.push_bind(pattern);
        builder.push(" ESCAPE '\\')");
        sep = " AND ";
    }
    if let Some(from) = filter.date_from {
        builder.push(sep);
        builder.push("created_at >= ");
        builder.push_bind(timestamp(from));
        sep = " AND ";
    }
    if let Some(to) = filter.date_to {
        builder.push(sep);
        builder.push("created_at <= ");
        builder.push_bind(timestamp(to));
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn into_log(row: LogRow) -> Result<EmailLog, LogStoreError> {
    let (id, provider_id, to_email, from_email, subject, status, response, created_at, updated_at) =
        row;
    Ok(EmailLog {
        id,
        provider_id,
        to_email,
        from_email,
        subject,
        status: LogStatus::parse(&status)?,
        response,
        created_at,
        updated_at,
    })
}
