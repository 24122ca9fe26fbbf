//! View types for the HTTP API boundary
//!
//! Rows from `db/*` carry storage details (quarantine snapshots, emails,
//! `*_json` columns). Views expose what clients see, with ledger-derived
//! balances computed at read time so they always reflect the current log.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::contents::{ContentRow, ContentStatus, ContentType};
use crate::db::events::Event;
use crate::db::users::UserRow;
use crate::error::EngineError;
use crate::features::FeatureSet;
use crate::ledger;

// ============================================================================
// User View
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub features: FeatureSet,
    pub tabcoins: i64,
    pub tabcash: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl UserView {
    pub fn load(conn: &Connection, row: UserRow) -> Result<Self, EngineError> {
        Ok(Self {
            tabcoins: ledger::user_tabcoins(conn, &row.id)?,
            tabcash: ledger::user_tabcash(conn, &row.id)?,
            id: row.id,
            username: row.username,
            features: row.features,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Content View
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ContentView {
    pub id: String,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub status: ContentStatus,
    pub content_type: ContentType,
    pub tabcoins: i64,
    pub tabcoins_credit: i64,
    pub tabcoins_debit: i64,
    pub created_at: String,
    pub updated_at: String,
    pub published_at: Option<String>,
    pub deleted_at: Option<String>,
}

impl ContentView {
    pub fn load(conn: &Connection, row: ContentRow) -> Result<Self, EngineError> {
        let coins = ledger::content_tabcoins(conn, &row.id)?;
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            parent_id: row.parent_id,
            title: row.title,
            body: row.body,
            status: row.status,
            content_type: row.content_type,
            tabcoins: coins.total,
            tabcoins_credit: coins.credit,
            tabcoins_debit: coins.debit,
            created_at: row.created_at,
            updated_at: row.updated_at,
            published_at: row.published_at,
            deleted_at: row.deleted_at,
        })
    }
}

// ============================================================================
// Incident View
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct AffectedView {
    pub users: Vec<UserView>,
    pub contents: Vec<ContentView>,
}

/// Firewall incident as returned by the event and review endpoints
#[derive(Debug, Clone, Serialize)]
pub struct IncidentView {
    pub affected: AffectedView,
    /// Block events oldest first, then any review events
    pub events: Vec<Event>,
}

/// Review response; empty when the reviewer may not read incidents
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReviewView {
    Incident(IncidentView),
    Hidden {},
}
