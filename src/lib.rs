//! tabgate - abuse firewall, moderation review and TabCoins ledger
//!
//! Guards a content-publishing platform against bursts of sign-ups and posts.
//!
//! ## Architecture
//!
//! - **Firewall**: counts recent creation events per rule and scope; past the
//!   threshold it quarantines the burst and records a block event
//! - **Incidents**: overlapping block events are merged at read time into one
//!   incident, which a moderator confirms or undoes as a unit
//! - **Ledger**: append-only, hash-chained TabCoins/TabCash operations
//! - **Prestige**: a user's recent ratings decide whether publishing earns,
//!   pays nothing, or is refused
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/tabgate/
//! ├── tabgate.db             # SQLite: events, ledger, users, contents
//! └── config.toml            # Thresholds, floors and amounts
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod firewall;
pub mod http;
pub mod ledger;
pub mod prestige;
pub mod services;
pub mod views;

// Re-exports
pub use clock::{SimulatedTimeSource, SystemTimeSource, TimeSource};
pub use config::Config;
pub use db::EngineDb;
pub use error::EngineError;
pub use features::{Feature, FeatureSet, UserState};
pub use firewall::{FirewallEngine, FirewallRule, ReviewAction};
pub use http::HttpServer;
pub use services::{EngineEvent, EventBus, Services};
pub use views::{ContentView, IncidentView, ReviewView, UserView};
