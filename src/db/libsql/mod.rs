//! libSQL/Turso backend for the `Database` trait.
//!
//! Supports a local file database and an embedded replica synced from a
//! remote Turso instance. Every method opens a fresh connection; the
//! underlying `libsql::Database` is shared.

mod leads;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Connection, Value};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Database;
use crate::db::libsql_migrations::SCHEMA;
use crate::db::query::SqlValue;
use crate::error::DatabaseError;

/// libSQL database backend.
pub struct LibSqlBackend {
    db: Arc<libsql::Database>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("failed to open libsql database: {e}")))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open an embedded replica kept in sync with a remote database.
    pub async fn new_remote_replica(
        path: &Path,
        url: &str,
        auth_token: &str,
    ) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_remote_replica(path, url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("failed to open libsql replica: {e}")))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open a connection with the session pragmas every query relies on.
    pub async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("failed to connect to libsql: {e}")))?;
        conn.query("PRAGMA busy_timeout = 5000", ()).await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }
}

#[async_trait::async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Migration(format!("libsql schema: {e}")))?;
        tracing::debug!("libsql schema applied");
        Ok(())
    }
}

// ==================== Row helpers ====================

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => Some(s),
        _ => None,
    }
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    row.get::<i64>(idx).unwrap_or_default()
}

/// Decimal stored as its exact text form.
pub(crate) fn get_opt_decimal(row: &libsql::Row, idx: i32) -> Result<Option<Decimal>, DatabaseError> {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => s
            .parse::<Decimal>()
            .map(Some)
            .map_err(|e| DatabaseError::Serialization(format!("invalid decimal '{s}': {e}"))),
        Ok(Value::Integer(v)) => Ok(Some(Decimal::from(v))),
        _ => Ok(None),
    }
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_text_owned(value: Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s),
        None => Value::Null,
    }
}

pub(crate) fn opt_uuid(value: Option<Uuid>) -> Value {
    match value {
        Some(id) => Value::Text(id.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_decimal(value: Option<Decimal>) -> Value {
    match value {
        Some(d) => Value::Text(d.to_string()),
        None => Value::Null,
    }
}

/// Canonical timestamp text. Fixed width keeps lexical and temporal order equal.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn opt_ts(value: Option<&DateTime<Utc>>) -> Value {
    match value {
        Some(ts) => Value::Text(fmt_ts(ts)),
        None => Value::Null,
    }
}

/// Parse RFC 3339 text, falling back to SQLite's `YYYY-MM-DD HH:MM:SS` form.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
}

pub(crate) fn sql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Uuid(id) => Value::Text(id.to_string()),
        SqlValue::Timestamp(ts) => Value::Text(fmt_ts(ts)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamps_format_with_fixed_width() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        assert_eq!(fmt_ts(&ts), "2024-03-09T07:05:00.000Z");
    }

    #[test]
    fn parse_timestamp_accepts_sqlite_datetime() {
        let parsed = parse_timestamp("2024-03-09 07:05:00").expect("parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap());
        let parsed = parse_timestamp("2024-03-09T07:05:00.000Z").expect("parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let tmpdir = tempfile::tempdir().expect("tempdir");
        let backend = LibSqlBackend::new_local(&tmpdir.path().join("nested/crm.db"))
            .await
            .expect("open");
        backend.run_migrations().await.expect("first run");
        backend.run_migrations().await.expect("second run");

        let conn = backend.connect().await.expect("connect");
        for table in ["users", "lead_notes", "lead_follow_ups", "lead_activities"] {
            let row = conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    libsql::params![table],
                )
                .await
                .expect("query")
                .next()
                .await
                .expect("row");
            assert!(row.is_some(), "missing table {table}");
        }
    }
}
