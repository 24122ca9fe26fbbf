//! Rule evaluation
//!
//! [`FirewallEngine::evaluate`] must run inside the same write transaction as
//! the creation it guards. The transaction holds SQLite's write lock from its
//! first statement, so the count and the quarantine that may follow are never
//! interleaved with another creation.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use super::rules::{EntityKind, FirewallRule, Scope};
use crate::config::FirewallPolicy;
use crate::db::contents::{self, ContentStatus};
use crate::db::events::{self, Event, NewEvent};
use crate::db::users;
use crate::error::{EngineError, ErrorDetails};

/// Result of checking one creation attempt
#[derive(Debug)]
pub enum Verdict {
    /// Under the threshold; `attempt` counts this request
    Allowed { attempt: u32 },
    /// Rule tripped: entities are quarantined and `event` recorded. The
    /// caller commits and answers with `error`.
    Blocked { event: Event, error: EngineError },
}

pub struct FirewallEngine {
    policy: FirewallPolicy,
}

impl FirewallEngine {
    pub fn new(policy: FirewallPolicy) -> Self {
        Self { policy }
    }

    /// Count this attempt against the rule and quarantine the scope's recent
    /// creations when it goes over
    pub fn evaluate(
        &self,
        conn: &Connection,
        rule: FirewallRule,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Verdict, EngineError> {
        let policy = self.policy.rule(rule);
        let since = policy.window_start(now)?;

        let creations =
            events::list_in_window(conn, rule.creation_event(), &scope.originator(), since, now)?;
        let attempt = creations.len() as u32 + 1;

        if attempt <= policy.threshold {
            debug!(
                rule = %rule,
                scope = %scope.key(),
                attempt,
                threshold = policy.threshold,
                "Firewall allowed"
            );
            return Ok(Verdict::Allowed { attempt });
        }

        let created_ids: Vec<String> = creations
            .iter()
            .filter_map(|e| e.metadata_id("id").map(str::to_string))
            .collect();

        let affected = match rule.entity() {
            EntityKind::Users => quarantine_users(conn, &created_ids, now)?,
            EntityKind::Contents => quarantine_contents(conn, &created_ids, now)?,
        };

        let mut block = NewEvent::new(rule.block_event())
            .with("from_rule", rule.as_str())
            .with(
                rule.entity().metadata_key(),
                Value::from(affected.clone()),
            );
        block = match scope {
            Scope::Ip(ip) => block.from_ip(ip.as_str()),
            Scope::Owner(owner) => block.by_user(owner.as_str()),
        };
        let event = events::append_event(conn, block, now)?;

        info!(
            rule = %rule,
            scope = %scope.key(),
            attempt,
            threshold = policy.threshold,
            affected = affected.len(),
            event_id = %event.id,
            "Firewall rule tripped"
        );

        Ok(Verdict::Blocked {
            event,
            error: too_many_requests(rule),
        })
    }
}

/// Quarantine users that are neither quarantined nor nuked, in the given order
fn quarantine_users(
    conn: &Connection,
    ids: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<String>, EngineError> {
    let mut affected = Vec::new();
    for id in ids {
        let Some(user) = users::get_user(conn, id)? else {
            continue;
        };
        if user.is_quarantined() || user.is_nuked() {
            continue;
        }
        users::quarantine_user(conn, &user, now)?;
        affected.push(user.id);
    }
    Ok(affected)
}

/// Quarantine draft or published contents, in the given order
fn quarantine_contents(
    conn: &Connection,
    ids: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<String>, EngineError> {
    let mut affected = Vec::new();
    for id in ids {
        let Some(content) = contents::get_content(conn, id)? else {
            continue;
        };
        if !matches!(content.status, ContentStatus::Draft | ContentStatus::Published) {
            continue;
        }
        contents::quarantine_content(conn, id, now)?;
        affected.push(content.id);
    }
    Ok(affected)
}

/// The 429 returned for a tripped rule; its shape matches every other
/// client error
pub fn too_many_requests(rule: FirewallRule) -> EngineError {
    EngineError::TooManyRequests(ErrorDetails::new(
        "You are making too many requests.",
        "Wait a few minutes before trying again.",
        format!("FIREWALL:{}:TOO_MANY_REQUESTS", rule.code()),
    ))
}
