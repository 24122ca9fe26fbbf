//! Prestige gate
//!
//! A user's prestige for a content kind is the net rating their most recent
//! published contents of that kind received, divided by the lookback size.
//! Below the hard floor nothing can be published; below the earn floor
//! publishing is allowed but earns no initial TabCoins.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PrestigeKindPolicy;
use crate::db::balance::{self, BalanceType};
use crate::db::contents;
use crate::error::EngineError;

pub use crate::db::contents::ContentKind;

/// Exact fraction with a positive denominator, written `"-9/20"` in config
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ratio {
    numerator: i64,
    denominator: i64,
}

impl Ratio {
    /// A negative denominator moves its sign to the numerator
    pub const fn new(numerator: i64, denominator: i64) -> Self {
        if denominator < 0 {
            Self { numerator: -numerator, denominator: -denominator }
        } else {
            Self { numerator, denominator }
        }
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }
}

impl PartialEq for Ratio {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ratio {}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.numerator as i128 * other.denominator as i128;
        let rhs = other.numerator as i128 * self.denominator as i128;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for Ratio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| format!("expected a fraction like \"-9/20\", got {:?}", s))?;
        let numerator: i64 = num.trim().parse().map_err(|e| format!("bad numerator: {}", e))?;
        let denominator: i64 = den.trim().parse().map_err(|e| format!("bad denominator: {}", e))?;
        if denominator == 0 {
            return Err("denominator must not be zero".to_string());
        }
        Ok(Ratio::new(numerator, denominator))
    }
}

impl TryFrom<String> for Ratio {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ratio> for String {
    fn from(r: Ratio) -> Self {
        r.to_string()
    }
}

/// Outcome of the gate for one publication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrestigeVerdict {
    /// Publishing is refused outright
    Denied,
    /// Publish, but without initial TabCoins
    NoEarning,
    Earning,
}

/// Sum the newest `lookback` outcomes over a fixed `lookback` denominator
pub fn ratio_from_outcomes(outcomes: &[i64], lookback: u32) -> Ratio {
    let numerator: i64 = outcomes.iter().take(lookback as usize).sum();
    Ratio::new(numerator, i64::from(lookback.max(1)))
}

/// Place a ratio against the floors; sitting exactly on a floor passes it
pub fn judge(ratio: Ratio, policy: &PrestigeKindPolicy) -> PrestigeVerdict {
    if ratio < policy.hard_floor {
        PrestigeVerdict::Denied
    } else if ratio < policy.earn_floor {
        PrestigeVerdict::NoEarning
    } else {
        PrestigeVerdict::Earning
    }
}

/// Current prestige of `owner_id` for `kind`
pub fn user_ratio(
    conn: &Connection,
    owner_id: &str,
    kind: ContentKind,
    policy: &PrestigeKindPolicy,
) -> Result<Ratio, EngineError> {
    let recent = contents::recent_published_ids(conn, owner_id, kind, policy.lookback)?;

    let outcomes = recent
        .iter()
        .map(|id| {
            balance::sum_for(
                conn,
                id,
                &[BalanceType::ContentTabcoinCredit, BalanceType::ContentTabcoinDebit],
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ratio = ratio_from_outcomes(&outcomes, policy.lookback);
    debug!(owner = %owner_id, kind = ?kind, ratio = %ratio, "Computed prestige");
    Ok(ratio)
}

/// Run the gate for a publication by `owner_id`
pub fn check(
    conn: &Connection,
    owner_id: &str,
    kind: ContentKind,
    policy: &PrestigeKindPolicy,
) -> Result<PrestigeVerdict, EngineError> {
    Ok(judge(user_ratio(conn, owner_id, kind, policy)?, policy))
}

pub fn negative_earnings_error() -> EngineError {
    EngineError::validation(
        "Publishing is not possible because other recent contents were badly rated.",
        "Delete your most recent contents that were rated as not relevant.",
        "PRESTIGE:VALIDATE_CAN_PUBLISH:NEGATIVE_USER_EARNINGS",
    )
}
