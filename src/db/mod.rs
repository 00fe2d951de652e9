// Database module - entity store capability, SQLite backend and in-memory double

pub mod memory;
pub mod models;
pub mod sqlite;
pub mod store;

use rusqlite::Connection;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

pub use memory::MemoryStore;
pub use models::{
    CorporateAction, CorporateActionKind, CostBasisPolicy, Holding, PerformanceSnapshot,
    Portfolio, PortfolioAction, PortfolioActionStatus, RealizedGain, TaxLot, Transaction,
    TransactionDraft, TransactionKind,
};
pub use sqlite::SqliteStore;
pub use store::{authorize, Store, StoreTx};

/// Get the default database path (~/.lotbook/data.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::Internal("HOME environment variable not set".to_string()))?;
    Ok(PathBuf::from(home).join(".lotbook").join("data.db"))
}

/// Open database connection
pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Internal(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
    }
    let conn = Connection::open(path)?;

    // Enable foreign keys
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;

    Ok(conn)
}

/// Initialize the database with schema
///
/// The schema is idempotent, so this is safe to run on every open.
pub fn init_database(conn: &Connection) -> Result<()> {
    let schema_sql = include_str!("schema.sql");
    conn.execute_batch(schema_sql)?;
    debug!("Database schema ready");
    Ok(())
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

/// Helper to read Decimal values stored as TEXT, INTEGER or REAL
pub fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Decimal> {
    get_optional_decimal_value(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "decimal".to_string(),
        rusqlite::types::Type::Null,
    ))
}

/// Helper to read optional Decimal from SQLite
pub fn get_optional_decimal_value(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<Decimal>> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes).map_err(|e| conversion_error(idx, e))?;
            Decimal::from_str(s)
                .map(Some)
                .map_err(|e| conversion_error(idx, e))
        }
        ValueRef::Integer(i) => Ok(Some(Decimal::from(i))),
        ValueRef::Real(f) => Decimal::try_from(f)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        ValueRef::Blob(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            rusqlite::types::Type::Blob,
        )),
    }
}

/// Helper to read a UUID stored as TEXT
pub fn get_uuid(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

pub fn get_optional_uuid(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Helper to read a TEXT column through `FromStr` (enums, currency codes)
pub fn get_parsed<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    let s: String = row.get(idx)?;
    s.parse::<T>().map_err(|e| conversion_error(idx, e))
}

/// Canonical TEXT form for stored amounts
pub fn decimal_text(value: Decimal) -> String {
    crate::money::canonical(value).to_string()
}

pub fn optional_decimal_text(value: Option<Decimal>) -> Option<String> {
    value.map(decimal_text)
}
