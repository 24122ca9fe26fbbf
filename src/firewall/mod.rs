//! Abuse firewall
//!
//! ## Components
//!
//! - [`rules`] - the fixed rule set and the scope each rule counts by
//! - [`engine`] - count-then-quarantine guard run inside every creation
//! - [`resolver`] - merges related block events into one reviewable incident
//!
//! Rule counters are never stored. Each evaluation re-scans the event log over
//! the rule's window, so the engine holds no state between requests.

pub mod engine;
pub mod resolver;
pub mod rules;

use std::fmt;
use std::str::FromStr;

pub use engine::{FirewallEngine, Verdict};
pub use resolver::{hydrate_incident, resolve_incident, Incident};
pub use rules::{EntityKind, FirewallRule, Scope};

/// Reviewer decision on an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    /// Keep the quarantine and make it permanent
    Confirm,
    /// Lift the quarantine
    Undo,
}

impl FromStr for ReviewAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirm" => Ok(ReviewAction::Confirm),
            "undo" => Ok(ReviewAction::Undo),
            other => Err(format!("unknown review action: {}", other)),
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewAction::Confirm => f.write_str("confirm"),
            ReviewAction::Undo => f.write_str("undo"),
        }
    }
}
