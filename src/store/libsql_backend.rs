//! libSQL backend: async `RecordStore` implementation.
//!
//! Supports local file and in-memory databases. Every call is bounded by a
//! timeout so a wedged database surfaces as an error instead of a hang.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    ContactInfo, LeadStats, LeadSummary, ProblemCategory, ProblemSelection, RecordStore,
    StoredProblem, UserIdentity, UserRecord,
};

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Write format for timestamps; lexical order equals chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations. Writes are
/// funneled through `write_gate` so a transaction on the shared connection
/// never picks up another caller's statements.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_gate: Mutex<()>,
    timeout: Duration,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.ensure_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.ensure_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            write_gate: Mutex::new(()),
            timeout: DEFAULT_STORE_TIMEOUT,
        })
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Raw connection, for tests that need to break the schema underneath.
    #[cfg(test)]
    pub(crate) fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `fut` under the store timeout, logging any failure.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, DatabaseError>
    where
        F: Future<Output = Result<T, DatabaseError>>,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout {
                operation,
                after: self.timeout,
            }),
        };
        if let Err(ref e) = result {
            error!(operation, error = %e, "Store operation failed");
        }
        result
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn now_str() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // SQLite datetime() output, with or without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_category(s: Option<String>) -> Option<ProblemCategory> {
    let raw = s?;
    match raw.parse() {
        Ok(category) => Some(category),
        Err(e) => {
            tracing::warn!(value = %raw, "Ignoring stored category: {e}");
            None
        }
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn age_from_db(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

/// Map a libsql Row to a UserRecord.
///
/// Column order matches LEAD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<UserRecord, libsql::Error> {
    let created_str: String = row.get(8)?;
    let completed_str: Option<String> = row.get(9).ok();

    Ok(UserRecord {
        user_id: row.get(0)?,
        display_name: row.get(1).ok(),
        handle: row.get(2).ok(),
        problem_category: parse_category(row.get(3).ok()),
        custom_problem_text: row.get(4).ok(),
        contact_name: row.get(5).ok(),
        age: age_from_db(row.get(6).ok()),
        contact_handle: row.get(7).ok(),
        created_at: parse_datetime(&created_str),
        completed_at: completed_str.as_deref().map(parse_datetime),
    })
}

/// Map a libsql Row to a LeadSummary.
///
/// Column order matches SUMMARY_COLUMNS.
fn row_to_summary(row: &libsql::Row) -> Result<LeadSummary, libsql::Error> {
    let created_str: String = row.get(6)?;

    Ok(LeadSummary {
        user_id: row.get(0)?,
        contact_name: row.get(1)?,
        age: age_from_db(row.get(2).ok()).unwrap_or_default(),
        contact_handle: row.get(3)?,
        problem: StoredProblem {
            category: parse_category(row.get(4).ok()),
            custom_text: row.get(5).ok(),
        },
        created_at: parse_datetime(&created_str),
    })
}

fn not_found(user_id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "lead".to_string(),
        id: user_id.to_string(),
    }
}

// ── Trait implementation ────────────────────────────────────────────

const LEAD_COLUMNS: &str = "user_id, display_name, handle, problem_category, custom_problem_text, contact_name, age, contact_handle, created_at, completed_at";

const SUMMARY_COLUMNS: &str =
    "user_id, contact_name, age, contact_handle, problem_category, custom_problem_text, created_at";

const COMPLETE_FILTER: &str =
    "contact_name IS NOT NULL AND age IS NOT NULL AND contact_handle IS NOT NULL";

#[async_trait]
impl RecordStore for LibSqlBackend {
    async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        self.bounded("ensure_schema", async {
            let _gate = self.write_gate.lock().await;
            migrations::run_migrations(self.conn()).await
        })
        .await
    }

    async fn create_if_absent(&self, identity: &UserIdentity) -> Result<bool, DatabaseError> {
        self.bounded("create_if_absent", async {
            let _gate = self.write_gate.lock().await;
            let inserted = self
                .conn()
                .execute(
                    "INSERT INTO leads (user_id, display_name, handle, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (user_id) DO NOTHING",
                    params![
                        identity.user_id.as_str(),
                        opt_text(identity.display_name.as_deref()),
                        opt_text(identity.handle.as_deref()),
                        now_str(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("create_if_absent: {e}")))?;

            if inserted > 0 {
                info!(user_id = %identity.user_id, "Lead record created");
            }
            Ok(inserted > 0)
        })
        .await
    }

    async fn exists(&self, user_id: &str) -> Result<bool, DatabaseError> {
        self.bounded("exists", async {
            let mut rows = self
                .conn()
                .query("SELECT 1 FROM leads WHERE user_id = ?1", params![user_id])
                .await
                .map_err(|e| DatabaseError::Query(format!("exists: {e}")))?;

            match rows.next().await {
                Ok(row) => Ok(row.is_some()),
                Err(e) => Err(DatabaseError::Query(format!("exists: {e}"))),
            }
        })
        .await
    }

    async fn set_problem(
        &self,
        user_id: &str,
        selection: &ProblemSelection,
    ) -> Result<(), DatabaseError> {
        self.bounded("set_problem", async {
            let _gate = self.write_gate.lock().await;
            let updated = self
                .conn()
                .execute(
                    "UPDATE leads SET problem_category = ?2, custom_problem_text = ?3 WHERE user_id = ?1",
                    params![
                        user_id,
                        selection.category().as_str(),
                        opt_text(selection.custom_text()),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("set_problem: {e}")))?;

            if updated == 0 {
                return Err(not_found(user_id));
            }
            info!(user_id, category = %selection.category(), "Problem recorded");
            Ok(())
        })
        .await
    }

    async fn set_contact_info(
        &self,
        user_id: &str,
        contact: &ContactInfo,
    ) -> Result<(), DatabaseError> {
        self.bounded("set_contact_info", async {
            let _gate = self.write_gate.lock().await;
            let tx = self
                .conn()
                .transaction()
                .await
                .map_err(|e| DatabaseError::Query(format!("set_contact_info begin: {e}")))?;

            let result = tx
                .execute(
                    "UPDATE leads
                     SET contact_name = ?2, age = ?3, contact_handle = ?4, completed_at = ?5
                     WHERE user_id = ?1",
                    params![
                        user_id,
                        contact.name.as_str(),
                        i64::from(contact.age),
                        contact.handle.as_str(),
                        now_str(),
                    ],
                )
                .await;

            let updated = match result {
                Ok(updated) => updated,
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(DatabaseError::Query(format!("set_contact_info: {e}")));
                }
            };

            if updated == 0 {
                let _ = tx.rollback().await;
                return Err(not_found(user_id));
            }

            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("set_contact_info commit: {e}")))?;

            info!(user_id, "Contact details recorded");
            Ok(())
        })
        .await
    }

    async fn get_problem(&self, user_id: &str) -> Result<StoredProblem, DatabaseError> {
        self.bounded("get_problem", async {
            let mut rows = self
                .conn()
                .query(
                    "SELECT problem_category, custom_problem_text FROM leads WHERE user_id = ?1",
                    params![user_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("get_problem: {e}")))?;

            match rows.next().await {
                Ok(Some(row)) => Ok(StoredProblem {
                    category: parse_category(row.get(0).ok()),
                    custom_text: row.get(1).ok(),
                }),
                Ok(None) => Err(not_found(user_id)),
                Err(e) => Err(DatabaseError::Query(format!("get_problem: {e}"))),
            }
        })
        .await
    }

    async fn get_record(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        self.bounded("get_record", async {
            let mut rows = self
                .conn()
                .query(
                    &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE user_id = ?1"),
                    params![user_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

            match rows.next().await {
                Ok(Some(row)) => {
                    let record = row_to_record(&row)
                        .map_err(|e| DatabaseError::Query(format!("get_record row parse: {e}")))?;
                    Ok(Some(record))
                }
                Ok(None) => Ok(None),
                Err(e) => Err(DatabaseError::Query(format!("get_record: {e}"))),
            }
        })
        .await
    }

    async fn aggregate_stats(&self, recent_limit: usize) -> Result<LeadStats, DatabaseError> {
        self.bounded("aggregate_stats", async {
            let conn = self.conn();
            let total_users = count_where(conn, "1 = 1").await?;
            let complete_records = count_where(conn, COMPLETE_FILTER).await?;

            let mut rows = conn
                .query(
                    "SELECT problem_category, COUNT(*) FROM leads
                     WHERE problem_category IS NOT NULL
                     GROUP BY problem_category
                     ORDER BY COUNT(*) DESC, problem_category ASC",
                    (),
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("aggregate_stats distribution: {e}")))?;

            let mut by_category = Vec::new();
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| DatabaseError::Query(format!("aggregate_stats distribution: {e}")))?
            {
                let count: i64 = row.get(1).unwrap_or(0);
                if let Some(category) = parse_category(row.get(0).ok()) {
                    by_category.push((category, u64::try_from(count).unwrap_or_default()));
                }
            }

            let limit = i64::try_from(recent_limit).unwrap_or(i64::MAX);
            let mut rows = conn
                .query(
                    &format!(
                        "SELECT {SUMMARY_COLUMNS} FROM leads WHERE {COMPLETE_FILTER}
                         ORDER BY COALESCE(completed_at, created_at) DESC, rowid DESC
                         LIMIT ?1"
                    ),
                    params![limit],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("aggregate_stats recent: {e}")))?;

            let mut recent = Vec::new();
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| DatabaseError::Query(format!("aggregate_stats recent: {e}")))?
            {
                recent.push(
                    row_to_summary(&row)
                        .map_err(|e| DatabaseError::Query(format!("recent row parse: {e}")))?,
                );
            }

            debug!(total_users, complete_records, "Stats aggregated");
            Ok(LeadStats {
                total_users,
                complete_records,
                by_category,
                recent,
            })
        })
        .await
    }

    async fn export_all(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        self.bounded("export_all", async {
            let mut rows = self
                .conn()
                .query(
                    &format!("SELECT {LEAD_COLUMNS} FROM leads ORDER BY created_at DESC, rowid DESC"),
                    (),
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("export_all: {e}")))?;

            let mut records = Vec::new();
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| DatabaseError::Query(format!("export_all: {e}")))?
            {
                records.push(
                    row_to_record(&row)
                        .map_err(|e| DatabaseError::Query(format!("export_all row parse: {e}")))?,
                );
            }
            Ok(records)
        })
        .await
    }
}

async fn count_where(conn: &Connection, filter: &str) -> Result<u64, DatabaseError> {
    let mut rows = conn
        .query(&format!("SELECT COUNT(*) FROM leads WHERE {filter}"), ())
        .await
        .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(u64::try_from(row.get::<i64>(0).unwrap_or(0)).unwrap_or_default()),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Query(format!("count: {e}"))),
    }
}
