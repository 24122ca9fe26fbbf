//! The fixed set of firewall rules and what each one watches

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::contents::ContentKind;
use crate::db::events::{EventType, Originator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FirewallRule {
    CreateUser,
    CreateContentTextRoot,
    CreateContentTextChild,
}

/// Which entity table a rule quarantines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Users,
    Contents,
}

impl EntityKind {
    /// Metadata key holding the affected ids
    pub fn metadata_key(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Contents => "contents",
        }
    }
}

impl FirewallRule {
    pub const ALL: [FirewallRule; 3] = [
        FirewallRule::CreateUser,
        FirewallRule::CreateContentTextRoot,
        FirewallRule::CreateContentTextChild,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FirewallRule::CreateUser => "create:user",
            FirewallRule::CreateContentTextRoot => "create:content:text_root",
            FirewallRule::CreateContentTextChild => "create:content:text_child",
        }
    }

    pub fn for_content(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Root => FirewallRule::CreateContentTextRoot,
            ContentKind::Child => FirewallRule::CreateContentTextChild,
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            FirewallRule::CreateUser => EntityKind::Users,
            _ => EntityKind::Contents,
        }
    }

    /// Successful creations this rule counts
    pub fn creation_event(&self) -> EventType {
        match self {
            FirewallRule::CreateUser => EventType::CreateUser,
            FirewallRule::CreateContentTextRoot => EventType::CreateContentTextRoot,
            FirewallRule::CreateContentTextChild => EventType::CreateContentTextChild,
        }
    }

    /// Event appended when the rule trips
    pub fn block_event(&self) -> EventType {
        match self {
            FirewallRule::CreateUser => EventType::FirewallBlockUsers,
            FirewallRule::CreateContentTextRoot => EventType::FirewallBlockContentsTextRoot,
            FirewallRule::CreateContentTextChild => EventType::FirewallBlockContentsTextChild,
        }
    }

    pub fn from_block_event(event_type: EventType) -> Option<Self> {
        FirewallRule::ALL
            .into_iter()
            .find(|rule| rule.block_event() == event_type)
    }

    /// Review event for a confirm (`block = true`) or an undo
    pub fn review_event(&self, block: bool) -> EventType {
        match (self, block) {
            (FirewallRule::CreateUser, true) => EventType::ModerationBlockUsers,
            (FirewallRule::CreateUser, false) => EventType::ModerationUnblockUsers,
            (FirewallRule::CreateContentTextRoot, true) => EventType::ModerationBlockContentsTextRoot,
            (FirewallRule::CreateContentTextRoot, false) => {
                EventType::ModerationUnblockContentsTextRoot
            }
            (FirewallRule::CreateContentTextChild, true) => {
                EventType::ModerationBlockContentsTextChild
            }
            (FirewallRule::CreateContentTextChild, false) => {
                EventType::ModerationUnblockContentsTextChild
            }
        }
    }

    /// Upper-snake name used in error location codes
    pub fn code(&self) -> &'static str {
        match self {
            FirewallRule::CreateUser => "CREATE_USER",
            FirewallRule::CreateContentTextRoot => "CREATE_CONTENT_TEXT_ROOT",
            FirewallRule::CreateContentTextChild => "CREATE_CONTENT_TEXT_CHILD",
        }
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FirewallRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FirewallRule::ALL
            .into_iter()
            .find(|rule| rule.as_str() == s)
            .ok_or_else(|| format!("unknown firewall rule: {}", s))
    }
}

impl TryFrom<String> for FirewallRule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FirewallRule> for String {
    fn from(rule: FirewallRule) -> Self {
        rule.as_str().to_string()
    }
}

/// The actor a rule counts creations for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Source address of an anonymous sign-up
    Ip(String),
    /// Owner of created content
    Owner(String),
}

impl Scope {
    pub fn originator(&self) -> Originator<'_> {
        match self {
            Scope::Ip(ip) => Originator::Ip(ip),
            Scope::Owner(id) => Originator::User(id),
        }
    }

    /// Key joined into an incident's affected set
    pub fn key(&self) -> String {
        match self {
            Scope::Ip(ip) => format!("ip:{}", ip),
            Scope::Owner(id) => format!("owner:{}", id),
        }
    }
}
