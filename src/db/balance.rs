//! Balance operations: the append-only, hash-chained ledger table
//!
//! Each row commits to its predecessor through `prev_hash`, so rewriting any
//! historical row (even with the append-only triggers disabled) breaks every
//! hash after it. [`read_chain`] hands the rows back in chain order for
//! verification.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::clock::to_db_timestamp;
use crate::error::EngineError;

/// `prev_hash` of the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum BalanceType {
    UserTabcoin,
    UserTabcash,
    ContentTabcoinInitial,
    ContentTabcoinCredit,
    ContentTabcoinDebit,
}

impl BalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceType::UserTabcoin => "user:tabcoin",
            BalanceType::UserTabcash => "user:tabcash",
            BalanceType::ContentTabcoinInitial => "content:tabcoin:initial",
            BalanceType::ContentTabcoinCredit => "content:tabcoin:credit",
            BalanceType::ContentTabcoinDebit => "content:tabcoin:debit",
        }
    }

    /// Every entry type that makes up a content's own TabCoins
    pub const CONTENT_TABCOINS: [BalanceType; 3] = [
        BalanceType::ContentTabcoinInitial,
        BalanceType::ContentTabcoinCredit,
        BalanceType::ContentTabcoinDebit,
    ];
}

impl fmt::Display for BalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<BalanceType> for String {
    fn from(t: BalanceType) -> Self {
        t.as_str().to_string()
    }
}

impl FromStr for BalanceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user:tabcoin" => Ok(BalanceType::UserTabcoin),
            "user:tabcash" => Ok(BalanceType::UserTabcash),
            "content:tabcoin:initial" => Ok(BalanceType::ContentTabcoinInitial),
            "content:tabcoin:credit" => Ok(BalanceType::ContentTabcoinCredit),
            "content:tabcoin:debit" => Ok(BalanceType::ContentTabcoinDebit),
            other => Err(format!("unknown balance type: {}", other)),
        }
    }
}

/// What caused a balance operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum OriginatorType {
    Event,
    User,
    Content,
    /// Operator funding outside any user action
    Grant,
}

impl OriginatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginatorType::Event => "event",
            OriginatorType::User => "user",
            OriginatorType::Content => "content",
            OriginatorType::Grant => "grant",
        }
    }
}

impl From<OriginatorType> for String {
    fn from(t: OriginatorType) -> Self {
        t.as_str().to_string()
    }
}

impl FromStr for OriginatorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(OriginatorType::Event),
            "user" => Ok(OriginatorType::User),
            "content" => Ok(OriginatorType::Content),
            "grant" => Ok(OriginatorType::Grant),
            other => Err(format!("unknown originator type: {}", other)),
        }
    }
}

/// Balance operation row from database
#[derive(Debug, Clone, Serialize)]
pub struct BalanceOperation {
    pub seq: i64,
    pub id: String,
    pub balance_type: BalanceType,
    pub recipient_id: String,
    pub amount: i64,
    pub originator_type: OriginatorType,
    pub originator_id: String,
    pub event_id: Option<String>,
    pub prev_hash: String,
    pub hash: String,
    pub created_at: String,
}

impl BalanceOperation {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let balance_type: String = row.get("balance_type")?;
        let originator_type: String = row.get("originator_type")?;
        let bad = |e: String| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        };

        Ok(Self {
            seq: row.get("seq")?,
            id: row.get("id")?,
            balance_type: balance_type.parse().map_err(bad)?,
            recipient_id: row.get("recipient_id")?,
            amount: row.get("amount")?,
            originator_type: originator_type.parse().map_err(bad)?,
            originator_id: row.get("originator_id")?,
            event_id: row.get("event_id")?,
            prev_hash: row.get("prev_hash")?,
            hash: row.get("hash")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Hash this entry should carry given its own `prev_hash`
    pub fn expected_hash(&self) -> String {
        entry_hash(
            &self.prev_hash,
            &self.id,
            self.balance_type,
            &self.recipient_id,
            self.amount,
            self.originator_type,
            &self.originator_id,
            self.event_id.as_deref(),
            &self.created_at,
        )
    }
}

/// Input for appending a balance operation
#[derive(Debug, Clone)]
pub struct NewBalanceOperation {
    pub balance_type: BalanceType,
    pub recipient_id: String,
    pub amount: i64,
    pub originator_type: OriginatorType,
    pub originator_id: String,
    pub event_id: Option<String>,
}

/// SHA-256 over the previous hash and the entry's canonical bytes
#[allow(clippy::too_many_arguments)]
fn entry_hash(
    prev_hash: &str,
    id: &str,
    balance_type: BalanceType,
    recipient_id: &str,
    amount: i64,
    originator_type: OriginatorType,
    originator_id: &str,
    event_id: Option<&str>,
    created_at: &str,
) -> String {
    let amount = amount.to_string();
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    for field in [
        id,
        balance_type.as_str(),
        recipient_id,
        amount.as_str(),
        originator_type.as_str(),
        originator_id,
        event_id.unwrap_or(""),
        created_at,
    ] {
        hasher.update([0x1f_u8]);
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn last_hash(conn: &Connection) -> Result<String, EngineError> {
    let hash: Option<String> = conn
        .query_row(
            "SELECT hash FROM balance_operations ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hash.unwrap_or_else(|| GENESIS_HASH.to_string()))
}

/// Append one operation at the head of the chain
pub fn append_operation(
    conn: &Connection,
    new: &NewBalanceOperation,
    at: DateTime<Utc>,
) -> Result<BalanceOperation, EngineError> {
    let id = Uuid::new_v4().to_string();
    let created_at = to_db_timestamp(at);
    let prev_hash = last_hash(conn)?;
    let hash = entry_hash(
        &prev_hash,
        &id,
        new.balance_type,
        &new.recipient_id,
        new.amount,
        new.originator_type,
        &new.originator_id,
        new.event_id.as_deref(),
        &created_at,
    );

    conn.execute(
        "INSERT INTO balance_operations
            (id, balance_type, recipient_id, amount, originator_type, originator_id,
             event_id, prev_hash, hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            new.balance_type.as_str(),
            new.recipient_id,
            new.amount,
            new.originator_type.as_str(),
            new.originator_id,
            new.event_id,
            prev_hash,
            hash,
            created_at,
        ],
    )?;

    Ok(BalanceOperation {
        seq: conn.last_insert_rowid(),
        id,
        balance_type: new.balance_type,
        recipient_id: new.recipient_id.clone(),
        amount: new.amount,
        originator_type: new.originator_type,
        originator_id: new.originator_id.clone(),
        event_id: new.event_id.clone(),
        prev_hash,
        hash,
        created_at,
    })
}

/// Signed sum of a recipient's entries of the given types
pub fn sum_for(
    conn: &Connection,
    recipient_id: &str,
    types: &[BalanceType],
) -> Result<i64, EngineError> {
    if types.is_empty() {
        return Ok(0);
    }

    let placeholders: Vec<_> = types.iter().map(|_| "?").collect();
    let sql = format!(
        "SELECT COALESCE(SUM(amount), 0) FROM balance_operations
         WHERE recipient_id = ? AND balance_type IN ({})",
        placeholders.join(", ")
    );

    let mut values: Vec<&str> = vec![recipient_id];
    values.extend(types.iter().map(|t| t.as_str()));

    Ok(conn.query_row(&sql, rusqlite::params_from_iter(values), |row| row.get(0))?)
}

/// Signed sum of a recipient's entries of one type caused by one originator
pub fn sum_from_originator(
    conn: &Connection,
    recipient_id: &str,
    balance_type: BalanceType,
    originator_type: OriginatorType,
    originator_id: &str,
) -> Result<i64, EngineError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM balance_operations
         WHERE recipient_id = ?1 AND balance_type = ?2
           AND originator_type = ?3 AND originator_id = ?4",
        params![recipient_id, balance_type.as_str(), originator_type.as_str(), originator_id],
        |row| row.get(0),
    )?)
}

/// Every operation in chain order
pub fn read_chain(conn: &Connection) -> Result<Vec<BalanceOperation>, EngineError> {
    let mut stmt = conn.prepare("SELECT * FROM balance_operations ORDER BY seq ASC")?;
    let rows = stmt.query_map([], BalanceOperation::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Operations addressed to one recipient, oldest first
pub fn list_for_recipient(
    conn: &Connection,
    recipient_id: &str,
) -> Result<Vec<BalanceOperation>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM balance_operations WHERE recipient_id = ? ORDER BY seq ASC")?;
    let rows = stmt.query_map(params![recipient_id], BalanceOperation::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
