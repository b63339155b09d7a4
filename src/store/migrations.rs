//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially. Migrations
//! only ever add tables, columns and indexes.
//!
//! On first run against a database written by the previous bot (a `users`
//! table, no `_migrations` table), the legacy rows are copied into `leads`.
//! The legacy table itself is left untouched.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS leads (
                user_id TEXT PRIMARY KEY,
                display_name TEXT,
                handle TEXT,
                problem_category TEXT,
                custom_problem_text TEXT,
                contact_name TEXT,
                age INTEGER,
                contact_handle TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_leads_created ON leads(created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "lead_completion_time",
        sql: r#"
            ALTER TABLE leads ADD COLUMN completed_at TEXT;
            CREATE INDEX IF NOT EXISTS idx_leads_category ON leads(problem_category);
        "#,
    },
];

/// Columns later versions of the previous bot added to `users`.
const LEGACY_LATE_COLUMNS: &[(&str, &str)] = &[
    ("custom_problem", "TEXT"),
    ("age", "INTEGER"),
    ("real_name", "TEXT"),
];

/// Copies legacy rows into `leads`, translating segment labels to category codes.
///
/// The previous bot stored the display label for fixed categories and the raw
/// button tag for the custom one; its contact handle lived in `phone`.
const LEGACY_IMPORT_SQL: &str = r#"
    INSERT OR IGNORE INTO leads (
        user_id, display_name, handle, problem_category, custom_problem_text,
        contact_name, age, contact_handle, created_at, completed_at
    )
    SELECT
        CAST(user_id AS TEXT),
        full_name,
        NULLIF(username, 'не указан'),
        CASE problem_segment
            WHEN 'Тревога/Стресс' THEN 'anxiety'
            WHEN 'btn_anxiety' THEN 'anxiety'
            WHEN 'Отношения' THEN 'relationships'
            WHEN 'btn_relations' THEN 'relationships'
            WHEN 'Выгорание/Самооценка' THEN 'burnout_self_esteem'
            WHEN 'btn_self' THEN 'burnout_self_esteem'
            WHEN 'btn_custom' THEN 'custom'
            ELSE NULL
        END,
        CASE WHEN problem_segment = 'btn_custom' THEN custom_problem ELSE NULL END,
        real_name,
        age,
        phone,
        COALESCE(created_at, datetime('now')),
        CASE
            WHEN real_name IS NOT NULL AND age IS NOT NULL AND phone IS NOT NULL
            THEN COALESCE(created_at, datetime('now'))
        END
    FROM users
"#;

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    if current_version == 0 && legacy_table_exists(conn).await? {
        import_legacy_users(conn).await?;
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Check whether the previous bot's `users` table is present.
async fn legacy_table_exists(conn: &Connection) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='users'",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check legacy tables: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read legacy check: {e}")))?;

    match row {
        Some(row) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
        None => Ok(false),
    }
}

/// Bring an old `users` table up to its final shape, then copy it into `leads`.
async fn import_legacy_users(conn: &Connection) -> Result<(), DatabaseError> {
    tracing::warn!("Legacy users table detected; importing into leads (legacy table is kept)");

    // Early versions of the previous bot lacked these
    let existing = table_columns(conn, "users").await?;
    for (column, sql_type) in LEGACY_LATE_COLUMNS {
        if existing.iter().any(|c| c == column) {
            continue;
        }
        conn.execute(&format!("ALTER TABLE users ADD COLUMN {column} {sql_type}"), ())
            .await
            .map_err(|e| {
                DatabaseError::Migration(format!("Failed to add legacy column {column}: {e}"))
            })?;
        tracing::info!(column, "Added missing legacy column");
    }

    let imported = conn
        .execute(LEGACY_IMPORT_SQL, ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Legacy import failed: {e}")))?;

    tracing::info!(imported, "Legacy users imported");
    Ok(())
}

/// Column names of `table`, in declaration order.
async fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, DatabaseError> {
    let mut rows = conn
        .query(&format!("PRAGMA table_info({table})"), ())
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read columns of {table}: {e}")))?;

    let mut columns = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read columns of {table}: {e}")))?
    {
        let name = row
            .get::<String>(1)
            .map_err(|e| DatabaseError::Query(format!("Bad column info for {table}: {e}")))?;
        columns.push(name);
    }
    Ok(columns)
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn count(conn: &Connection, sql: &str) -> i64 {
        let mut rows = conn.query(sql, ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get(0).unwrap()
    }

    #[tokio::test]
    async fn migrations_create_leads_table() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let tables = count(
            &conn,
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('leads', '_migrations')",
        )
        .await;
        assert_eq!(tables, 2);

        // V2 column is present
        conn.execute(
            "INSERT INTO leads (user_id, created_at, completed_at) VALUES ('1', '2026-01-01 00:00:00', NULL)",
            (),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row1 = rows.next().await.unwrap().unwrap();
        assert_eq!(row1.get::<i64>(0).unwrap(), 1);
        assert_eq!(row1.get::<String>(1).unwrap(), "initial_schema");

        let row2 = rows.next().await.unwrap().unwrap();
        assert_eq!(row2.get::<i64>(0).unwrap(), 2);
        assert_eq!(row2.get::<String>(1).unwrap(), "lead_completion_time");
    }

    #[tokio::test]
    async fn existing_rows_survive_new_migration() {
        let conn = test_conn().await;

        // A database that only ever saw V1
        conn.execute_batch(MIGRATIONS[0].sql).await.unwrap();
        conn.execute(
            "CREATE TABLE _migrations (version INTEGER PRIMARY KEY, name TEXT NOT NULL, applied_at TEXT NOT NULL DEFAULT (datetime('now')))",
            (),
        )
        .await
        .unwrap();
        seed_version(&conn, 1, "initial_schema").await.unwrap();
        conn.execute(
            "INSERT INTO leads (user_id, contact_name, created_at) VALUES ('7', 'Vera', '2025-05-05 10:00:00')",
            (),
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        assert_eq!(get_current_version(&conn).await.unwrap(), 2);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM leads WHERE user_id = '7' AND contact_name = 'Vera'").await,
            1
        );
    }

    #[tokio::test]
    async fn legacy_users_are_imported_without_dropping() {
        let conn = test_conn().await;

        // The earliest shape of the previous bot's table (no custom_problem/age/real_name)
        conn.execute_batch(
            "CREATE TABLE users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                full_name TEXT NOT NULL,
                problem_segment TEXT,
                phone TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO users (user_id, username, full_name, problem_segment, phone, created_at)
                VALUES (101, 'не указан', 'Ivan Petrov', 'Отношения', NULL, '2024-03-01 09:00:00');",
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        // Late columns were added and the legacy table is still there
        conn.execute(
            "INSERT INTO users (user_id, full_name, problem_segment, custom_problem, real_name, age, phone)
                VALUES (102, 'Olga', 'btn_custom', 'cannot sleep at night', 'Olga', 31, 'olga_k')",
            (),
        )
        .await
        .unwrap();

        let mut rows = conn
            .query(
                "SELECT user_id, display_name, handle, problem_category, created_at FROM leads",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "101");
        assert_eq!(row.get::<String>(1).unwrap(), "Ivan Petrov");
        assert!(row.get::<String>(2).is_err(), "placeholder username maps to NULL");
        assert_eq!(row.get::<String>(3).unwrap(), "relationships");
        assert_eq!(row.get::<String>(4).unwrap(), "2024-03-01 09:00:00");
        assert!(rows.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_custom_problem_and_contact_are_imported() {
        let conn = test_conn().await;
        conn.execute_batch(
            "CREATE TABLE users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                full_name TEXT NOT NULL,
                problem_segment TEXT,
                custom_problem TEXT,
                real_name TEXT,
                age INTEGER,
                phone TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO users VALUES (5, 'olga_k', 'Olga K', 'btn_custom', 'cannot sleep at night', 'Olga', 31, 'olga_k', '2024-04-02 12:30:00');",
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT problem_category, custom_problem_text, contact_name, age, contact_handle, completed_at FROM leads WHERE user_id = '5'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "custom");
        assert_eq!(row.get::<String>(1).unwrap(), "cannot sleep at night");
        assert_eq!(row.get::<String>(2).unwrap(), "Olga");
        assert_eq!(row.get::<i64>(3).unwrap(), 31);
        assert_eq!(row.get::<String>(4).unwrap(), "olga_k");
        assert_eq!(row.get::<String>(5).unwrap(), "2024-04-02 12:30:00");
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn migration_future_is_send() {
        let conn = test_conn().await;
        let fut = run_migrations(&conn);
        assert_send(&fut);
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn partially_upgraded_legacy_table_gets_only_missing_columns() {
        let conn = test_conn().await;
        // A mid-life shape: `age` already added, the other late columns not yet
        conn.execute_batch(
            "CREATE TABLE users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                full_name TEXT NOT NULL,
                problem_segment TEXT,
                age INTEGER,
                phone TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO users (user_id, full_name, problem_segment, age, phone)
                VALUES (9, 'Nina', 'btn_anxiety', 44, 'nina');",
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        let columns = table_columns(&conn, "users").await.unwrap();
        for column in ["custom_problem", "age", "real_name"] {
            assert_eq!(
                columns.iter().filter(|c| c.as_str() == column).count(),
                1,
                "{column} in {columns:?}"
            );
        }
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM leads WHERE user_id = '9' AND age = 44").await,
            1
        );
    }

    #[tokio::test]
    async fn table_columns_lists_declared_columns() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let columns = table_columns(&conn, "leads").await.unwrap();
        assert_eq!(columns.first().map(String::as_str), Some("user_id"));
        assert_eq!(columns.last().map(String::as_str), Some("completed_at"));
        assert!(table_columns(&conn, "missing").await.unwrap().is_empty());
    }
}
