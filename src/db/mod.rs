mod cascade;
mod consistency;
pub mod models;

pub use cascade::{delete_household_cascade, delete_user_cascade, DeletionSummary};
pub use consistency::{
    check_consistency, repair_consistency, ConsistencyReport, OwnerlessHousehold, RepairSummary,
};
pub use models::*;

use anyhow::{Context, Result};
use chrono::{NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub type DbPool = SqlitePool;

/// Current time in the fixed-width RFC 3339 form stored in every timestamp column.
///
/// Fixed width keeps lexicographic comparisons in SQL consistent with time order.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Format an arbitrary instant the same way as [`now`]
pub fn timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Today's date in UTC
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(db_path: &Path) -> Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    info!("Initializing database at {}", db_path.display());

    // Per-connection settings, so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
///
/// The connection is never recycled, otherwise the database would vanish.
pub async fn init_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Users, households, bills, expenses, contributions
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Feedback
    if !table_exists(pool, "feedback").await? {
        execute_sql(pool, include_str!("../../migrations/002_feedback.sql")).await?;
    }

    // Migration 003: Notification log
    if !table_exists(pool, "notification_log").await? {
        execute_sql(pool, include_str!("../../migrations/003_notification_log.sql")).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_file_connection_enforces_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init(&dir.path().join("data").join("hearth.db")).await.unwrap();

        let mut conns = Vec::new();
        for _ in 0..3 {
            conns.push(pool.acquire().await.unwrap());
        }
        for conn in conns.iter_mut() {
            let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
                .fetch_one(&mut **conn)
                .await
                .unwrap();
            assert_eq!(enabled, 1);
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        for table in [
            "users",
            "households",
            "household_members",
            "bills",
            "bill_splits",
            "bill_payments",
            "expenses",
            "contributions",
            "feedback",
            "notification_log",
        ] {
            assert!(table_exists(&pool, table).await.unwrap(), "{table} missing");
        }
    }

    #[tokio::test]
    async fn test_init_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hearth.db");
        let pool = init(&path).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let a = timestamp(chrono::DateTime::from_timestamp(0, 0).unwrap());
        let b = timestamp(chrono::DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap());
        assert_eq!(a, "1970-01-01T00:00:00.000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
