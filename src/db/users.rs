//! User rows and their quarantine state

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::clock::to_db_timestamp;
use crate::error::EngineError;
use crate::features::FeatureSet;

/// User row from database
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub features: FeatureSet,
    /// Features held before a firewall block; `Some` while quarantined
    pub quarantine_snapshot: Option<FeatureSet>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let features: String = row.get("features_json")?;
        let snapshot: Option<String> = row.get("quarantine_snapshot_json")?;

        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            email: row.get("email")?,
            features: parse_features(&features)?,
            quarantine_snapshot: snapshot.as_deref().map(parse_features).transpose()?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantine_snapshot.is_some()
    }

    pub fn is_nuked(&self) -> bool {
        self.features.is_nuked()
    }
}

fn parse_features(raw: &str) -> Result<FeatureSet, rusqlite::Error> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Input for creating a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub features: FeatureSet,
}

/// Insert a new user and return it
pub fn insert_user(
    conn: &Connection,
    input: &NewUser,
    at: DateTime<Utc>,
) -> Result<UserRow, EngineError> {
    let id = Uuid::new_v4().to_string();
    let now = to_db_timestamp(at);

    conn.execute(
        "INSERT INTO users (id, username, email, features_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, input.username, input.email, input.features.to_json()?, now],
    )?;

    get_user(conn, &id)?.ok_or_else(|| EngineError::Internal("Inserted user vanished".into()))
}

/// Get user by ID
pub fn get_user(conn: &Connection, id: &str) -> Result<Option<UserRow>, EngineError> {
    Ok(conn
        .query_row("SELECT * FROM users WHERE id = ?", params![id], UserRow::from_row)
        .optional()?)
}

pub fn username_taken(conn: &Connection, username: &str) -> Result<bool, EngineError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE lower(username) = lower(?)",
        params![username],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub fn email_taken(conn: &Connection, email: &str) -> Result<bool, EngineError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE lower(email) = lower(?)",
        params![email],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Replace a user's features
pub fn set_features(
    conn: &Connection,
    id: &str,
    features: &FeatureSet,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE users SET features_json = ?1, updated_at = ?2 WHERE id = ?3",
        params![features.to_json()?, to_db_timestamp(at), id],
    )?;
    Ok(())
}

/// Strip every feature, keeping the current set as the restore point
pub fn quarantine_user(conn: &Connection, user: &UserRow, at: DateTime<Utc>) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE users SET quarantine_snapshot_json = ?1, features_json = '[]', updated_at = ?2
         WHERE id = ?3 AND quarantine_snapshot_json IS NULL",
        params![user.features.to_json()?, to_db_timestamp(at), user.id],
    )?;
    Ok(())
}

/// Put back the features held before quarantine
pub fn restore_user(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE users SET features_json = COALESCE(quarantine_snapshot_json, features_json),
                          quarantine_snapshot_json = NULL, updated_at = ?1
         WHERE id = ?2",
        params![to_db_timestamp(at), id],
    )?;
    Ok(())
}

/// Replace features with the terminal set and drop any restore point
pub fn nuke_user(
    conn: &Connection,
    id: &str,
    nuked: &FeatureSet,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE users SET features_json = ?1, quarantine_snapshot_json = NULL, updated_at = ?2
         WHERE id = ?3",
        params![nuked.to_json()?, to_db_timestamp(at), id],
    )?;
    Ok(())
}
