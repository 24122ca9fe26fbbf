//! SQLite store for the event log, ledger and quarantinable entities
//!
//! ## Tables
//!
//! - `events` - append-only facts (creations, blocks, reviews)
//! - `balance_operations` - append-only, hash-chained ledger entries
//! - `users` - features and quarantine snapshot
//! - `contents` - status and pre-quarantine status
//!
//! ## Transactions
//!
//! Every mutating operation runs inside [`EngineDb::write`], which opens an
//! `IMMEDIATE` transaction. SQLite grants the write lock before the first
//! statement, so a firewall count and the quarantine that follows it can never
//! interleave with another writer on the same database.
//!
//! A file-backed database also keeps a read-only connection. Under WAL,
//! [`EngineDb::read`] sees the last committed snapshot without waiting for the
//! writer's lock. In-memory databases read through the writer connection.

pub mod schema;
pub mod events;
pub mod users;
pub mod contents;
pub mod balance;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::EngineError;

/// Result of a write closure that may need to persist side-effects and still
/// fail the request (a tripped firewall rule, for example)
pub enum Outcome<T> {
    Commit(T),
    CommitThenFail(EngineError),
}

/// SQLite database for the engine
pub struct EngineDb {
    conn: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl EngineDb {
    /// Open or create the database in `storage_dir`
    pub fn open(storage_dir: &Path) -> Result<Self, EngineError> {
        std::fs::create_dir_all(storage_dir)
            .map_err(|e| EngineError::Internal(format!("Failed to create storage dir: {}", e)))?;
        let db_path = storage_dir.join("tabgate.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| EngineError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )
        .map_err(|e| EngineError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let mut db = Self::from_connection(conn)?;

        let reader = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| EngineError::Internal(format!("Failed to open read connection: {}", e)))?;
        reader.execute_batch("PRAGMA busy_timeout=5000;")?;
        db.reader = Some(Mutex::new(reader));

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, EngineError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            EngineError::Internal(format!("Failed to open in-memory SQLite: {}", e))
        })?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, EngineError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            reader: None,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn lock_reader(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        match &self.reader {
            Some(reader) => reader
                .lock()
                .map_err(|e| EngineError::Internal(format!("Read lock poisoned: {}", e))),
            None => self.lock(),
        }
    }

    /// Run a read against one consistent snapshot
    pub fn read<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let mut conn = self.lock_reader()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.finish()?;
        Ok(value)
    }

    /// Run a mutation atomically; any error rolls the whole closure back
    pub fn write<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, EngineError>,
    {
        self.write_outcome(|tx| f(tx).map(Outcome::Commit))
    }

    /// Like [`EngineDb::write`], but the closure may ask to commit and still
    /// report an error to the caller
    pub fn write_outcome<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<Outcome<T>, EngineError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Dropping `tx` on the error path rolls back.
        match f(&tx)? {
            Outcome::Commit(value) => {
                tx.commit()?;
                Ok(value)
            }
            Outcome::CommitThenFail(error) => {
                tx.commit()?;
                Err(error)
            }
        }
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, EngineError> {
        self.read(|conn| {
            let count = |table: &str| -> Result<u64, EngineError> {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
                Ok(n as u64)
            };

            Ok(DbStats {
                event_count: count("events")?,
                balance_operation_count: count("balance_operations")?,
                user_count: count("users")?,
                content_count: count("contents")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub event_count: u64,
    pub balance_operation_count: u64,
    pub user_count: u64,
    pub content_count: u64,
}
