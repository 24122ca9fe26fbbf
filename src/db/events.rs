//! Append-only event log
//!
//! Every creation, firewall block and moderation review lands here as one
//! immutable row. Counters, incidents and review state are all derived from
//! these rows; the table has no update or delete path (triggers reject both).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::clock::{from_db_timestamp, to_db_timestamp};
use crate::error::EngineError;

/// Closed set of event types written by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventType {
    CreateUser,
    CreateContentTextRoot,
    CreateContentTextChild,
    UpdateContentTextRoot,
    UpdateContentTextChild,
    UpdateContentTabcoins,
    FirewallBlockUsers,
    FirewallBlockContentsTextRoot,
    FirewallBlockContentsTextChild,
    ModerationBlockUsers,
    ModerationUnblockUsers,
    ModerationBlockContentsTextRoot,
    ModerationUnblockContentsTextRoot,
    ModerationBlockContentsTextChild,
    ModerationUnblockContentsTextChild,
}

impl EventType {
    pub const ALL: [EventType; 15] = [
        EventType::CreateUser,
        EventType::CreateContentTextRoot,
        EventType::CreateContentTextChild,
        EventType::UpdateContentTextRoot,
        EventType::UpdateContentTextChild,
        EventType::UpdateContentTabcoins,
        EventType::FirewallBlockUsers,
        EventType::FirewallBlockContentsTextRoot,
        EventType::FirewallBlockContentsTextChild,
        EventType::ModerationBlockUsers,
        EventType::ModerationUnblockUsers,
        EventType::ModerationBlockContentsTextRoot,
        EventType::ModerationUnblockContentsTextRoot,
        EventType::ModerationBlockContentsTextChild,
        EventType::ModerationUnblockContentsTextChild,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CreateUser => "create:user",
            EventType::CreateContentTextRoot => "create:content:text_root",
            EventType::CreateContentTextChild => "create:content:text_child",
            EventType::UpdateContentTextRoot => "update:content:text_root",
            EventType::UpdateContentTextChild => "update:content:text_child",
            EventType::UpdateContentTabcoins => "update:content:tabcoins",
            EventType::FirewallBlockUsers => "firewall:block_users",
            EventType::FirewallBlockContentsTextRoot => "firewall:block_contents:text_root",
            EventType::FirewallBlockContentsTextChild => "firewall:block_contents:text_child",
            EventType::ModerationBlockUsers => "moderation:block_users",
            EventType::ModerationUnblockUsers => "moderation:unblock_users",
            EventType::ModerationBlockContentsTextRoot => "moderation:block_contents:text_root",
            EventType::ModerationUnblockContentsTextRoot => "moderation:unblock_contents:text_root",
            EventType::ModerationBlockContentsTextChild => "moderation:block_contents:text_child",
            EventType::ModerationUnblockContentsTextChild => {
                "moderation:unblock_contents:text_child"
            }
        }
    }

    /// Written by the rule engine when a rule trips
    pub fn is_firewall(&self) -> bool {
        matches!(
            self,
            EventType::FirewallBlockUsers
                | EventType::FirewallBlockContentsTextRoot
                | EventType::FirewallBlockContentsTextChild
        )
    }

    /// Written by a reviewer confirming or undoing an incident
    pub fn is_moderation(&self) -> bool {
        self.as_str().starts_with("moderation:")
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

impl TryFrom<String> for EventType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

/// Event row from database
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Insertion order, breaks ties between equal timestamps
    #[serde(skip)]
    pub seq: i64,
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub originator_user_id: Option<String>,
    #[serde(skip)]
    pub originator_ip: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let type_str: String = row.get("type")?;
        let event_type = type_str.parse::<EventType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?;

        let metadata_json: String = row.get("metadata_json")?;
        let metadata = serde_json::from_str(&metadata_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let created_at: String = row.get("created_at")?;
        let created_at = from_db_timestamp(&created_at).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            seq: row.get("seq")?,
            id: row.get("id")?,
            event_type,
            originator_user_id: row.get("originator_user_id")?,
            originator_ip: row.get("originator_ip")?,
            metadata,
            created_at,
        })
    }

    /// String ids listed under `key` in the metadata
    pub fn metadata_ids(&self, key: &str) -> Vec<String> {
        match self.metadata.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Single string id stored under `key`
    pub fn metadata_id(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Input for appending an event
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub originator_user_id: Option<String>,
    pub originator_ip: Option<String>,
    pub metadata: Map<String, Value>,
}

impl NewEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            originator_user_id: None,
            originator_ip: None,
            metadata: Map::new(),
        }
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.originator_user_id = Some(user_id.into());
        self
    }

    pub fn from_ip(mut self, ip: impl Into<String>) -> Self {
        self.originator_ip = Some(ip.into());
        self
    }

    /// Add a metadata entry; insertion order is preserved on disk
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Who an event is attributed to, for windowed counting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Originator<'a> {
    User(&'a str),
    Ip(&'a str),
}

/// Append one event stamped `at`
pub fn append_event(
    conn: &Connection,
    new: NewEvent,
    at: DateTime<Utc>,
) -> Result<Event, EngineError> {
    let id = Uuid::new_v4().to_string();
    let metadata_json = serde_json::to_string(&new.metadata)?;

    conn.execute(
        "INSERT INTO events (id, type, originator_user_id, originator_ip, metadata_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            new.event_type.as_str(),
            new.originator_user_id,
            new.originator_ip,
            metadata_json,
            to_db_timestamp(at),
        ],
    )?;

    debug!(event_id = %id, event_type = %new.event_type, "Appended event");

    Ok(Event {
        seq: conn.last_insert_rowid(),
        id,
        event_type: new.event_type,
        originator_user_id: new.originator_user_id,
        originator_ip: new.originator_ip,
        metadata: new.metadata,
        created_at: at,
    })
}

/// Get event by ID
pub fn get_event(conn: &Connection, id: &str) -> Result<Option<Event>, EngineError> {
    let mut stmt = conn.prepare("SELECT * FROM events WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(Event::from_row(row)?)),
        None => Ok(None),
    }
}

/// Events of one type from one originator within `[from, to]`, oldest first
pub fn list_in_window(
    conn: &Connection,
    event_type: EventType,
    originator: &Originator<'_>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Event>, EngineError> {
    let (column, value) = match originator {
        Originator::User(id) => ("originator_user_id", *id),
        Originator::Ip(ip) => ("originator_ip", *ip),
    };

    let sql = format!(
        "SELECT * FROM events
         WHERE type = ?1 AND {} = ?2 AND created_at >= ?3 AND created_at <= ?4
         ORDER BY created_at ASC, seq ASC",
        column
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![event_type.as_str(), value, to_db_timestamp(from), to_db_timestamp(to)],
        Event::from_row,
    )?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Events of one type, any originator, within `[from, to]`, oldest first
pub fn list_by_type_between(
    conn: &Connection,
    event_type: EventType,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Event>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM events
         WHERE type = ?1 AND created_at >= ?2 AND created_at <= ?3
         ORDER BY created_at ASC, seq ASC",
    )?;
    let rows = stmt.query_map(
        params![event_type.as_str(), to_db_timestamp(from), to_db_timestamp(to)],
        Event::from_row,
    )?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Moderation events whose `related_events` mention any of `event_ids`
pub fn list_reviews_of(conn: &Connection, event_ids: &[String]) -> Result<Vec<Event>, EngineError> {
    if event_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: Vec<_> = event_ids.iter().map(|_| "?").collect();
    let sql = format!(
        "SELECT DISTINCT e.* FROM events e, json_each(e.metadata_json, '$.related_events') r
         WHERE e.type LIKE 'moderation:%' AND r.value IN ({})
         ORDER BY e.created_at ASC, e.seq ASC",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(event_ids.iter()), Event::from_row)?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
