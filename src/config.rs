//! Configuration for tabgate
//!
//! Firewall thresholds, prestige floors and ledger amounts are policy values,
//! so they live here as named settings instead of literals in the engine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::firewall::FirewallRule;
use crate::prestige::{ContentKind, Ratio};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabgate")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default)]
    pub firewall: FirewallPolicy,

    #[serde(default)]
    pub prestige: PrestigePolicy,

    #[serde(default)]
    pub ledger: LedgerPolicy,
}

fn default_http_port() -> u16 {
    8095
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            firewall: FirewallPolicy::default(),
            prestige: PrestigePolicy::default(),
            ledger: LedgerPolicy::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn validate(&self) -> Result<(), String> {
        for rule in FirewallRule::ALL {
            let policy = self.firewall.rule(rule);
            if policy.threshold == 0 {
                return Err(format!("firewall rule {} needs a threshold of at least 1", rule));
            }
            if policy.window_secs <= 0 {
                return Err(format!("firewall rule {} needs a positive window", rule));
            }
            if policy.window_secs > MAX_WINDOW_SECS {
                return Err(format!(
                    "firewall rule {} window must not exceed {} seconds",
                    rule, MAX_WINDOW_SECS
                ));
            }
        }

        for kind in [ContentKind::Root, ContentKind::Child] {
            let policy = self.prestige.for_kind(kind);
            if policy.lookback == 0 {
                return Err(format!("prestige lookback for {:?} must be at least 1", kind));
            }
            if policy.hard_floor.denominator() <= 0 || policy.earn_floor.denominator() <= 0 {
                return Err(format!("prestige floors for {:?} need a positive denominator", kind));
            }
            if policy.hard_floor > policy.earn_floor {
                return Err(format!(
                    "prestige hard floor ({}) for {:?} must not exceed the earn floor ({})",
                    policy.hard_floor, kind, policy.earn_floor
                ));
            }
        }

        let ledger = &self.ledger;
        let amounts = [
            ("root_initial_tabcoins", ledger.root_initial_tabcoins),
            ("child_initial_tabcoins", ledger.child_initial_tabcoins),
            ("ad_tabcash_cost", ledger.ad_tabcash_cost),
            ("rating_tabcoin_cost", ledger.rating_tabcoin_cost),
            ("rating_tabcash_reward", ledger.rating_tabcash_reward),
        ];
        for (name, amount) in amounts {
            if amount < 0 {
                return Err(format!("ledger amount {} must not be negative", name));
            }
        }

        Ok(())
    }
}

/// Longest accepted rule window (five years)
pub const MAX_WINDOW_SECS: i64 = 5 * 366 * 24 * 60 * 60;

/// Threshold and lookback window of a single firewall rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePolicy {
    /// Requests allowed per window; the next one trips the rule
    pub threshold: u32,
    pub window_secs: i64,
}

impl RulePolicy {
    pub fn window(&self) -> Result<Duration, EngineError> {
        Duration::try_seconds(self.window_secs).ok_or_else(|| {
            EngineError::Internal(format!("Firewall window out of range: {}s", self.window_secs))
        })
    }

    /// Start of the window ending at `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
        now.checked_sub_signed(self.window()?).ok_or_else(|| {
            EngineError::Internal(format!("Firewall window out of range: {}s", self.window_secs))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallPolicy {
    #[serde(default = "default_create_user_rule")]
    pub create_user: RulePolicy,
    #[serde(default = "default_text_root_rule")]
    pub create_content_text_root: RulePolicy,
    #[serde(default = "default_text_child_rule")]
    pub create_content_text_child: RulePolicy,
}

fn default_create_user_rule() -> RulePolicy {
    RulePolicy { threshold: 2, window_secs: 30 * 60 }
}

fn default_text_root_rule() -> RulePolicy {
    RulePolicy { threshold: 5, window_secs: 30 * 60 }
}

fn default_text_child_rule() -> RulePolicy {
    RulePolicy { threshold: 20, window_secs: 10 * 60 }
}

impl Default for FirewallPolicy {
    fn default() -> Self {
        Self {
            create_user: default_create_user_rule(),
            create_content_text_root: default_text_root_rule(),
            create_content_text_child: default_text_child_rule(),
        }
    }
}

impl FirewallPolicy {
    pub fn rule(&self, rule: FirewallRule) -> &RulePolicy {
        match rule {
            FirewallRule::CreateUser => &self.create_user,
            FirewallRule::CreateContentTextRoot => &self.create_content_text_root,
            FirewallRule::CreateContentTextChild => &self.create_content_text_child,
        }
    }
}

/// Prestige floors for one content kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrestigeKindPolicy {
    /// How many recent contents feed the ratio (also its denominator)
    pub lookback: u32,
    /// Publishing is denied below this ratio
    pub hard_floor: Ratio,
    /// Initial TabCoins are withheld below this ratio
    pub earn_floor: Ratio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrestigePolicy {
    #[serde(default = "default_root_prestige")]
    pub root: PrestigeKindPolicy,
    #[serde(default = "default_child_prestige")]
    pub child: PrestigeKindPolicy,
}

fn default_root_prestige() -> PrestigeKindPolicy {
    PrestigeKindPolicy {
        lookback: 20,
        hard_floor: Ratio::new(-9, 20),
        earn_floor: Ratio::new(0, 20),
    }
}

fn default_child_prestige() -> PrestigeKindPolicy {
    PrestigeKindPolicy {
        lookback: 20,
        hard_floor: Ratio::new(-15, 20),
        earn_floor: Ratio::new(0, 20),
    }
}

impl Default for PrestigePolicy {
    fn default() -> Self {
        Self {
            root: default_root_prestige(),
            child: default_child_prestige(),
        }
    }
}

impl PrestigePolicy {
    pub fn for_kind(&self, kind: ContentKind) -> &PrestigeKindPolicy {
        match kind {
            ContentKind::Root => &self.root,
            ContentKind::Child => &self.child,
        }
    }
}

/// Amounts moved by the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPolicy {
    #[serde(default = "default_root_initial")]
    pub root_initial_tabcoins: i64,
    #[serde(default = "default_child_initial")]
    pub child_initial_tabcoins: i64,
    /// TabCash spent to publish an `ad`
    #[serde(default = "default_ad_cost")]
    pub ad_tabcash_cost: i64,
    /// TabCoins the voter spends per rating
    #[serde(default = "default_rating_cost")]
    pub rating_tabcoin_cost: i64,
    /// TabCash the voter receives per rating
    #[serde(default = "default_rating_reward")]
    pub rating_tabcash_reward: i64,
}

fn default_root_initial() -> i64 {
    2
}

fn default_child_initial() -> i64 {
    1
}

fn default_ad_cost() -> i64 {
    100
}

fn default_rating_cost() -> i64 {
    2
}

fn default_rating_reward() -> i64 {
    1
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            root_initial_tabcoins: default_root_initial(),
            child_initial_tabcoins: default_child_initial(),
            ad_tabcash_cost: default_ad_cost(),
            rating_tabcoin_cost: default_rating_cost(),
            rating_tabcash_reward: default_rating_reward(),
        }
    }
}

impl LedgerPolicy {
    pub fn initial_tabcoins(&self, kind: ContentKind) -> i64 {
        match kind {
            ContentKind::Root => self.root_initial_tabcoins,
            ContentKind::Child => self.child_initial_tabcoins,
        }
    }
}
