//! TabCoins / TabCash ledger rules
//!
//! Balances are never stored; they are signed sums over
//! `balance_operations`. This module decides which operations a publication,
//! rating or deletion writes, and checks the hash chain.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{LedgerPolicy, PrestigePolicy};
use crate::db::balance::{
    self, BalanceOperation, BalanceType, NewBalanceOperation, OriginatorType, GENESIS_HASH,
};
use crate::db::contents::{ContentKind, ContentRow, ContentType};
use crate::error::EngineError;
use crate::prestige::{self, PrestigeVerdict};

pub fn user_tabcoins(conn: &Connection, user_id: &str) -> Result<i64, EngineError> {
    balance::sum_for(conn, user_id, &[BalanceType::UserTabcoin])
}

pub fn user_tabcash(conn: &Connection, user_id: &str) -> Result<i64, EngineError> {
    balance::sum_for(conn, user_id, &[BalanceType::UserTabcash])
}

/// A content's own TabCoins, split by source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContentTabcoins {
    pub total: i64,
    pub credit: i64,
    pub debit: i64,
}

pub fn content_tabcoins(conn: &Connection, content_id: &str) -> Result<ContentTabcoins, EngineError> {
    let credit = balance::sum_for(conn, content_id, &[BalanceType::ContentTabcoinCredit])?;
    let debit = balance::sum_for(conn, content_id, &[BalanceType::ContentTabcoinDebit])?;
    let total = balance::sum_for(conn, content_id, &BalanceType::CONTENT_TABCOINS)?;
    Ok(ContentTabcoins { total, credit, debit })
}

/// Operator funding of a user balance
pub fn grant(
    conn: &Connection,
    user_id: &str,
    currency: BalanceType,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<BalanceOperation, EngineError> {
    if !matches!(currency, BalanceType::UserTabcoin | BalanceType::UserTabcash) {
        return Err(EngineError::Internal(format!("Cannot grant {} to a user", currency)));
    }

    info!(user = %user_id, currency = %currency, amount, "Granting balance");
    balance::append_operation(
        conn,
        &NewBalanceOperation {
            balance_type: currency,
            recipient_id: user_id.to_string(),
            amount,
            originator_type: OriginatorType::Grant,
            originator_id: "ops".to_string(),
            event_id: None,
        },
        at,
    )
}

/// Ledger effect of publishing one content, decided before anything is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationPlan {
    /// Ads pay TabCash instead of earning TabCoins
    ChargeAd { cost: i64 },
    /// Credit the content and mirror the amount to the owner
    Earn { amount: i64 },
    /// Zero-valued participation entry on the content only
    Baseline,
}

/// What publishing a content would do to the ledger, failing when prestige or
/// TabCash forbids it
pub fn plan_publication(
    conn: &Connection,
    owner_id: &str,
    kind: ContentKind,
    content_type: ContentType,
    parent_owner_id: Option<&str>,
    ledger: &LedgerPolicy,
    prestige_policy: &PrestigePolicy,
) -> Result<PublicationPlan, EngineError> {
    if content_type == ContentType::Ad {
        let cost = ledger.ad_tabcash_cost;
        let available = user_tabcash(conn, owner_id)?;
        if available < cost {
            warn!(owner = %owner_id, available, cost, "Not enough TabCash for ad");
            return Err(EngineError::unprocessable(
                "Not enough TabCash to publish this ad.",
                format!("You need at least {} TabCash.", cost),
                "CONTENT:UPDATE_TABCASH:NOT_ENOUGH",
            ));
        }
        return Ok(PublicationPlan::ChargeAd { cost });
    }

    let policy = prestige_policy.for_kind(kind);
    let plan = match prestige::check(conn, owner_id, kind, policy)? {
        PrestigeVerdict::Denied => {
            warn!(owner = %owner_id, kind = ?kind, "Publication denied by prestige");
            return Err(prestige::negative_earnings_error());
        }
        PrestigeVerdict::NoEarning => PublicationPlan::Baseline,
        PrestigeVerdict::Earning if parent_owner_id == Some(owner_id) => PublicationPlan::Baseline,
        PrestigeVerdict::Earning => PublicationPlan::Earn {
            amount: ledger.initial_tabcoins(kind),
        },
    };

    debug!(owner = %owner_id, plan = ?plan, "Planned publication");
    Ok(plan)
}

/// Write the operations of a plan for the now-existing content
pub fn apply_publication(
    conn: &Connection,
    content: &ContentRow,
    plan: PublicationPlan,
    event_id: &str,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    let event_id = Some(event_id.to_string());

    match plan {
        PublicationPlan::ChargeAd { cost } => {
            balance::append_operation(
                conn,
                &NewBalanceOperation {
                    balance_type: BalanceType::UserTabcash,
                    recipient_id: content.owner_id.clone(),
                    amount: -cost,
                    originator_type: OriginatorType::Content,
                    originator_id: content.id.clone(),
                    event_id,
                },
                at,
            )?;
        }
        PublicationPlan::Earn { amount } => {
            balance::append_operation(
                conn,
                &NewBalanceOperation {
                    balance_type: BalanceType::ContentTabcoinInitial,
                    recipient_id: content.id.clone(),
                    amount,
                    originator_type: OriginatorType::User,
                    originator_id: content.owner_id.clone(),
                    event_id: event_id.clone(),
                },
                at,
            )?;
            balance::append_operation(
                conn,
                &NewBalanceOperation {
                    balance_type: BalanceType::UserTabcoin,
                    recipient_id: content.owner_id.clone(),
                    amount,
                    originator_type: OriginatorType::Content,
                    originator_id: content.id.clone(),
                    event_id,
                },
                at,
            )?;
        }
        PublicationPlan::Baseline => {
            balance::append_operation(
                conn,
                &NewBalanceOperation {
                    balance_type: BalanceType::ContentTabcoinInitial,
                    recipient_id: content.id.clone(),
                    amount: 0,
                    originator_type: OriginatorType::User,
                    originator_id: content.owner_id.clone(),
                    event_id,
                },
                at,
            )?;
        }
    }

    Ok(())
}

/// Reverse whatever the owner still holds from a content being deleted.
/// Only a net gain is taken back; a net loss from bad ratings stays.
pub fn settle_deletion(
    conn: &Connection,
    content: &ContentRow,
    event_id: Option<&str>,
    at: DateTime<Utc>,
) -> Result<i64, EngineError> {
    let net = balance::sum_from_originator(
        conn,
        &content.owner_id,
        BalanceType::UserTabcoin,
        OriginatorType::Content,
        &content.id,
    )?;

    if net <= 0 {
        return Ok(0);
    }

    balance::append_operation(
        conn,
        &NewBalanceOperation {
            balance_type: BalanceType::UserTabcoin,
            recipient_id: content.owner_id.clone(),
            amount: -net,
            originator_type: OriginatorType::Content,
            originator_id: content.id.clone(),
            event_id: event_id.map(str::to_string),
        },
        at,
    )?;

    debug!(content = %content.id, owner = %content.owner_id, reversed = net, "Settled deletion");
    Ok(net)
}

/// Direction of a rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Credit,
    Debit,
}

impl Rating {
    pub fn amount(&self) -> i64 {
        match self {
            Rating::Credit => 1,
            Rating::Debit => -1,
        }
    }
}

/// Charge the voter and move one TabCoin on the content and its owner
pub fn apply_rating(
    conn: &Connection,
    voter_id: &str,
    content: &ContentRow,
    rating: Rating,
    event_id: &str,
    policy: &LedgerPolicy,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    let available = user_tabcoins(conn, voter_id)?;
    if available < policy.rating_tabcoin_cost {
        return Err(EngineError::unprocessable(
            "Not enough TabCoins to rate this content.",
            format!("You need at least {} TabCoins.", policy.rating_tabcoin_cost),
            "RATING:UPDATE_TABCOINS:NOT_ENOUGH",
        ));
    }

    let event = Some(event_id.to_string());
    let ops = [
        NewBalanceOperation {
            balance_type: BalanceType::UserTabcoin,
            recipient_id: voter_id.to_string(),
            amount: -policy.rating_tabcoin_cost,
            originator_type: OriginatorType::Event,
            originator_id: event_id.to_string(),
            event_id: event.clone(),
        },
        NewBalanceOperation {
            balance_type: BalanceType::UserTabcash,
            recipient_id: voter_id.to_string(),
            amount: policy.rating_tabcash_reward,
            originator_type: OriginatorType::Event,
            originator_id: event_id.to_string(),
            event_id: event.clone(),
        },
        NewBalanceOperation {
            balance_type: match rating {
                Rating::Credit => BalanceType::ContentTabcoinCredit,
                Rating::Debit => BalanceType::ContentTabcoinDebit,
            },
            recipient_id: content.id.clone(),
            amount: rating.amount(),
            originator_type: OriginatorType::User,
            originator_id: voter_id.to_string(),
            event_id: event.clone(),
        },
        NewBalanceOperation {
            balance_type: BalanceType::UserTabcoin,
            recipient_id: content.owner_id.clone(),
            amount: rating.amount(),
            originator_type: OriginatorType::Content,
            originator_id: content.id.clone(),
            event_id: event,
        },
    ];

    for op in &ops {
        balance::append_operation(conn, op, at)?;
    }
    Ok(())
}

/// Result of walking the hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub entries: usize,
    /// `seq` of the first entry whose link or hash does not check out
    pub first_broken_seq: Option<i64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken_seq.is_none()
    }
}

/// Recompute every hash and link from genesis
pub fn verify_chain(conn: &Connection) -> Result<ChainReport, EngineError> {
    let chain = balance::read_chain(conn)?;
    let mut prev = GENESIS_HASH.to_string();

    for op in &chain {
        if op.prev_hash != prev || op.expected_hash() != op.hash {
            warn!(seq = op.seq, "Ledger chain broken");
            return Ok(ChainReport {
                entries: chain.len(),
                first_broken_seq: Some(op.seq),
            });
        }
        prev = op.hash.clone();
    }

    Ok(ChainReport {
        entries: chain.len(),
        first_broken_seq: None,
    })
}
