//! Content rows and their status transitions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::to_db_timestamp;
use crate::error::EngineError;

/// Root contents start a thread, children reply to another content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Root,
    Child,
}

impl ContentKind {
    pub fn of(parent_id: Option<&str>) -> Self {
        match parent_id {
            Some(_) => ContentKind::Child,
            None => ContentKind::Root,
        }
    }

    /// Suffix used in feature, rule and event names (`text_root`, `text_child`)
    pub fn suffix(&self) -> &'static str {
        match self {
            ContentKind::Root => "text_root",
            ContentKind::Child => "text_child",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Published,
    Deleted,
    /// Quarantined by the rule engine, awaiting review
    Firewall,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
            ContentStatus::Deleted => "deleted",
            ContentStatus::Firewall => "firewall",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ContentStatus::Draft),
            "published" => Ok(ContentStatus::Published),
            "deleted" => Ok(ContentStatus::Deleted),
            "firewall" => Ok(ContentStatus::Firewall),
            other => Err(format!("unknown content status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Content,
    /// Promotional content paid for with TabCash
    Ad,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Content => "content",
            ContentType::Ad => "ad",
        }
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(ContentType::Content),
            "ad" => Ok(ContentType::Ad),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

fn parse_column<T: FromStr<Err = String>>(raw: String) -> Result<T, rusqlite::Error> {
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
    })
}

/// Content row from database
#[derive(Debug, Clone)]
pub struct ContentRow {
    pub id: String,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub status: ContentStatus,
    pub content_type: ContentType,
    /// Status held before a firewall block; `Some` while quarantined
    pub pre_firewall_status: Option<ContentStatus>,
    pub created_at: String,
    pub updated_at: String,
    pub published_at: Option<String>,
    pub deleted_at: Option<String>,
}

impl ContentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let pre: Option<String> = row.get("pre_firewall_status")?;

        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            parent_id: row.get("parent_id")?,
            title: row.get("title")?,
            body: row.get("body")?,
            status: parse_column(row.get("status")?)?,
            content_type: parse_column(row.get("content_type")?)?,
            pre_firewall_status: pre.map(parse_column).transpose()?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            published_at: row.get("published_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::of(self.parent_id.as_deref())
    }
}

/// Input for inserting content
#[derive(Debug, Clone)]
pub struct NewContent {
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub status: ContentStatus,
    pub content_type: ContentType,
}

/// Insert content; `published_at` is set when it starts out published
pub fn insert_content(
    conn: &Connection,
    id: &str,
    input: &NewContent,
    at: DateTime<Utc>,
) -> Result<ContentRow, EngineError> {
    let now = to_db_timestamp(at);
    let published_at = (input.status == ContentStatus::Published).then(|| now.clone());

    conn.execute(
        "INSERT INTO contents (id, owner_id, parent_id, title, body, status, content_type,
                               created_at, updated_at, published_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)",
        params![
            id,
            input.owner_id,
            input.parent_id,
            input.title,
            input.body,
            input.status.as_str(),
            input.content_type.as_str(),
            now,
            published_at,
        ],
    )?;

    get_content(conn, id)?.ok_or_else(|| EngineError::Internal("Inserted content vanished".into()))
}

/// Fresh id for content about to be inserted
pub fn new_content_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get content by ID
pub fn get_content(conn: &Connection, id: &str) -> Result<Option<ContentRow>, EngineError> {
    Ok(conn
        .query_row("SELECT * FROM contents WHERE id = ?", params![id], ContentRow::from_row)
        .optional()?)
}

/// Update editable text fields
pub fn update_text(
    conn: &Connection,
    id: &str,
    title: Option<&str>,
    body: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE contents SET title = COALESCE(?1, title), body = COALESCE(?2, body), updated_at = ?3
         WHERE id = ?4",
        params![title, body, to_db_timestamp(at), id],
    )?;
    Ok(())
}

/// Move to `status`, stamping `published_at`/`deleted_at` the first time
pub fn set_status(
    conn: &Connection,
    id: &str,
    status: ContentStatus,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    let now = to_db_timestamp(at);
    conn.execute(
        "UPDATE contents SET status = ?1, updated_at = ?2,
             published_at = CASE WHEN ?1 = 'published' THEN COALESCE(published_at, ?2) ELSE published_at END,
             deleted_at = CASE WHEN ?1 = 'deleted' THEN COALESCE(deleted_at, ?2) ELSE deleted_at END
         WHERE id = ?3",
        params![status.as_str(), now, id],
    )?;
    Ok(())
}

/// Move to `firewall`, remembering the current status
pub fn quarantine_content(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE contents SET pre_firewall_status = status, status = 'firewall', updated_at = ?1
         WHERE id = ?2 AND status IN ('draft', 'published')",
        params![to_db_timestamp(at), id],
    )?;
    Ok(())
}

/// Leave `firewall` for the status held before quarantine
pub fn restore_content(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE contents SET status = COALESCE(pre_firewall_status, status),
                             pre_firewall_status = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'firewall'",
        params![to_db_timestamp(at), id],
    )?;
    Ok(())
}

/// Leave `firewall` for `deleted`
pub fn delete_quarantined(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
    let now = to_db_timestamp(at);
    conn.execute(
        "UPDATE contents SET status = 'deleted', pre_firewall_status = NULL,
                             deleted_at = COALESCE(deleted_at, ?1), updated_at = ?1
         WHERE id = ?2 AND status = 'firewall'",
        params![now, id],
    )?;
    Ok(())
}

/// The owner's currently published non-ad contents of one kind, newest
/// first. Deleting a badly rated content takes it out of this window.
pub fn recent_published_ids(
    conn: &Connection,
    owner_id: &str,
    kind: ContentKind,
    limit: u32,
) -> Result<Vec<String>, EngineError> {
    let parent_clause = match kind {
        ContentKind::Root => "parent_id IS NULL",
        ContentKind::Child => "parent_id IS NOT NULL",
    };

    let sql = format!(
        "SELECT id FROM contents
         WHERE owner_id = ?1 AND {} AND content_type = 'content' AND status = 'published'
         ORDER BY published_at DESC, rowid DESC
         LIMIT ?2",
        parent_clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner_id, limit as i64], |row| row.get(0))?;

    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}
