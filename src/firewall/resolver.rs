//! Incident resolution
//!
//! An incident is never stored. Starting from one block event, the resolver
//! links other block events of the same rule when
//!
//! - they were created within one rule window of each other,
//! - their affected sets intersect (listed ids plus the scope key), and
//! - neither was reviewed before the other was written,
//!
//! and repeats until no new event joins. Resolution only reads, so it is safe
//! to run alongside writers and as often as needed.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::Connection;
use tracing::debug;

use super::rules::{EntityKind, FirewallRule, Scope};
use crate::config::FirewallPolicy;
use crate::db::contents;
use crate::db::events::{self, Event};
use crate::db::users;
use crate::error::EngineError;
use crate::views::{AffectedView, ContentView, IncidentView, UserView};

/// Block events merged into one reviewable unit
#[derive(Debug, Clone)]
pub struct Incident {
    pub rule: FirewallRule,
    /// Oldest first
    pub block_events: Vec<Event>,
    /// Reviews referencing any block event, oldest first
    pub review_events: Vec<Event>,
}

impl Incident {
    pub fn is_reviewed(&self) -> bool {
        !self.review_events.is_empty()
    }

    pub fn block_event_ids(&self) -> Vec<String> {
        self.block_events.iter().map(|e| e.id.clone()).collect()
    }

    /// Ids listed by the block events, first appearance wins
    pub fn listed_ids(&self) -> Vec<String> {
        let key = self.rule.entity().metadata_key();
        let mut seen = HashSet::new();
        self.block_events
            .iter()
            .flat_map(|e| e.metadata_ids(key))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }
}

/// Scope a block event counted by
fn scope_of(rule: FirewallRule, event: &Event) -> Option<Scope> {
    match rule.entity() {
        EntityKind::Users => event.originator_ip.clone().map(Scope::Ip),
        EntityKind::Contents => event.originator_user_id.clone().map(Scope::Owner),
    }
}

fn affected_keys(rule: FirewallRule, event: &Event) -> HashSet<String> {
    let mut keys: HashSet<String> = event
        .metadata_ids(rule.entity().metadata_key())
        .into_iter()
        .collect();
    if let Some(scope) = scope_of(rule, event) {
        keys.insert(scope.key());
    }
    keys
}

/// `seq` of the first review of each event, memoized per resolution
struct ReviewIndex<'c> {
    conn: &'c Connection,
    first_review: HashMap<String, Option<i64>>,
}

impl<'c> ReviewIndex<'c> {
    fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            first_review: HashMap::new(),
        }
    }

    fn first_review_seq(&mut self, event_id: &str) -> Result<Option<i64>, EngineError> {
        if let Some(seq) = self.first_review.get(event_id) {
            return Ok(*seq);
        }
        let seq = events::list_reviews_of(self.conn, &[event_id.to_string()])?
            .iter()
            .map(|e| e.seq)
            .min();
        self.first_review.insert(event_id.to_string(), seq);
        Ok(seq)
    }

    /// True when one event was already reviewed before the other existed
    fn separated(&mut self, a: &Event, b: &Event) -> Result<bool, EngineError> {
        let a_review = self.first_review_seq(&a.id)?;
        let b_review = self.first_review_seq(&b.id)?;
        Ok(a_review.is_some_and(|seq| seq < b.seq) || b_review.is_some_and(|seq| seq < a.seq))
    }
}

/// Resolve the incident containing `event_id`; `None` when the id is unknown
/// or not a firewall block event
pub fn resolve_incident(
    conn: &Connection,
    event_id: &str,
    policy: &FirewallPolicy,
) -> Result<Option<Incident>, EngineError> {
    let Some(start) = events::get_event(conn, event_id)? else {
        return Ok(None);
    };
    let Some(rule) = FirewallRule::from_block_event(start.event_type) else {
        return Ok(None);
    };

    let rule_policy = policy.rule(rule);
    let window = rule_policy.window()?;
    let mut reviews = ReviewIndex::new(conn);

    let mut members: BTreeMap<i64, Event> = BTreeMap::new();
    let mut keys: HashMap<i64, HashSet<String>> = HashMap::new();
    let mut frontier = vec![start];

    while let Some(current) = frontier.pop() {
        if members.contains_key(&current.seq) {
            continue;
        }
        let current_keys = affected_keys(rule, &current);

        let candidates = events::list_by_type_between(
            conn,
            current.event_type,
            rule_policy.window_start(current.created_at)?,
            current.created_at.checked_add_signed(window).ok_or_else(|| {
                EngineError::Internal("Firewall window end out of range".to_string())
            })?,
        )?;

        for candidate in candidates {
            if candidate.seq == current.seq || members.contains_key(&candidate.seq) {
                continue;
            }
            let candidate_keys = keys
                .entry(candidate.seq)
                .or_insert_with(|| affected_keys(rule, &candidate));
            if current_keys.is_disjoint(candidate_keys) {
                continue;
            }
            if reviews.separated(&current, &candidate)? {
                continue;
            }
            frontier.push(candidate);
        }

        keys.insert(current.seq, current_keys);
        members.insert(current.seq, current);
    }

    let mut block_events: Vec<Event> = members.into_values().collect();
    block_events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));

    let ids: Vec<String> = block_events.iter().map(|e| e.id.clone()).collect();
    let review_events = events::list_reviews_of(conn, &ids)?;

    debug!(
        event_id = %event_id,
        rule = %rule,
        block_events = block_events.len(),
        reviewed = !review_events.is_empty(),
        "Resolved incident"
    );

    Ok(Some(Incident {
        rule,
        block_events,
        review_events,
    }))
}

/// Load current state of every affected entity
pub fn hydrate_incident(conn: &Connection, incident: &Incident) -> Result<IncidentView, EngineError> {
    let mut affected = AffectedView::default();

    match incident.rule.entity() {
        EntityKind::Users => {
            for id in incident.listed_ids() {
                if let Some(user) = users::get_user(conn, &id)? {
                    affected.users.push(UserView::load(conn, user)?);
                }
            }
        }
        EntityKind::Contents => {
            let mut owners = Vec::new();
            for id in incident.listed_ids() {
                if let Some(content) = contents::get_content(conn, &id)? {
                    if !owners.contains(&content.owner_id) {
                        owners.push(content.owner_id.clone());
                    }
                    affected.contents.push(ContentView::load(conn, content)?);
                }
            }
            for owner in owners {
                if let Some(user) = users::get_user(conn, &owner)? {
                    affected.users.push(UserView::load(conn, user)?);
                }
            }
        }
    }

    let events = incident
        .block_events
        .iter()
        .chain(incident.review_events.iter())
        .cloned()
        .collect();

    Ok(IncidentView { affected, events })
}
