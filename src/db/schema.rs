//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::EngineError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, EngineError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| EngineError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), EngineError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| EngineError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| EngineError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(EVENTS_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create events table: {}", e)))?;

    conn.execute_batch(ENTITIES_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create entity tables: {}", e)))?;

    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create ledger table: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

const EVENTS_SCHEMA: &str = r#"
-- seq gives a stable order for events sharing a timestamp
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL,
    originator_user_id TEXT,
    originator_ip TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS events_no_update BEFORE UPDATE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS events_no_delete BEFORE DELETE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;
"#;

const ENTITIES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL,
    email TEXT NOT NULL,
    features_json TEXT NOT NULL DEFAULT '[]',
    -- features held before a firewall block, NULL when not quarantined
    quarantine_snapshot_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contents (
    id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL,
    parent_id TEXT,
    title TEXT,
    body TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    content_type TEXT NOT NULL DEFAULT 'content',
    -- status held before a firewall block, NULL when not quarantined
    pre_firewall_status TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    published_at TEXT,
    deleted_at TEXT,

    FOREIGN KEY (owner_id) REFERENCES users(id),
    FOREIGN KEY (parent_id) REFERENCES contents(id)
);
"#;

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS balance_operations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    balance_type TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    originator_type TEXT NOT NULL,
    originator_id TEXT NOT NULL,
    event_id TEXT,
    prev_hash TEXT NOT NULL,
    hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS balance_operations_no_update BEFORE UPDATE ON balance_operations
BEGIN
    SELECT RAISE(ABORT, 'balance operations are append-only');
END;

CREATE TRIGGER IF NOT EXISTS balance_operations_no_delete BEFORE DELETE ON balance_operations
BEGIN
    SELECT RAISE(ABORT, 'balance operations are append-only');
END;
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_events_type_created ON events(type, created_at);
CREATE INDEX IF NOT EXISTS idx_events_user_type ON events(originator_user_id, type, created_at);
CREATE INDEX IF NOT EXISTS idx_events_ip_type ON events(originator_ip, type, created_at);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username ON users(lower(username));
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(lower(email));

CREATE INDEX IF NOT EXISTS idx_contents_owner_status ON contents(owner_id, status, published_at);
CREATE INDEX IF NOT EXISTS idx_contents_parent ON contents(parent_id);

CREATE INDEX IF NOT EXISTS idx_balance_recipient ON balance_operations(recipient_id, balance_type);
CREATE INDEX IF NOT EXISTS idx_balance_originator ON balance_operations(originator_type, originator_id);
"#;
