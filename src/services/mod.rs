//! Service layer for tabgate
//!
//! Services sit between HTTP handlers and the `db` repositories. Each
//! operation:
//! - validates input that needs no database
//! - runs its reads, firewall check and writes in one [`EngineDb`] transaction
//! - emits an [`EngineEvent`] once the transaction has committed
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (business logic, transactions)
//!     ↓
//! firewall / ledger / prestige
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod content_service;
pub mod events;
pub mod moderation_service;
pub mod response;
pub mod user_service;

pub use content_service::{ContentService, CreateContentInput, UpdateContentInput};
pub use events::{EngineEvent, EventBus, EventListener};
pub use moderation_service::ModerationService;
pub use response::*;
pub use user_service::{CreateUserInput, UserService};

use std::sync::Arc;

use rusqlite::Connection;
use uuid::Uuid;

use crate::clock::{SystemTimeSource, TimeSource};
use crate::config::Config;
use crate::db::users::{self, UserRow};
use crate::db::EngineDb;
use crate::error::EngineError;
use crate::firewall::FirewallEngine;

/// Dependencies every service shares
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Arc<EngineDb>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn TimeSource>,
    pub events: Arc<EventBus>,
    pub firewall: Arc<FirewallEngine>,
}

/// Service container for dependency injection
///
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub users: Arc<UserService>,
    pub contents: Arc<ContentService>,
    pub moderation: Arc<ModerationService>,
    pub events: Arc<EventBus>,
    pub db: Arc<EngineDb>,
}

impl Services {
    /// Create all services on the system clock
    pub fn new(db: Arc<EngineDb>, config: Config) -> Self {
        Self::with_clock(db, config, Arc::new(SystemTimeSource))
    }

    /// Create all services on an injected clock (tests drive time this way)
    pub fn with_clock(db: Arc<EngineDb>, config: Config, clock: Arc<dyn TimeSource>) -> Self {
        let events = Arc::new(EventBus::new());
        let ctx = ServiceContext {
            db: db.clone(),
            firewall: Arc::new(FirewallEngine::new(config.firewall.clone())),
            config: Arc::new(config),
            clock,
            events: events.clone(),
        };

        Self {
            users: Arc::new(UserService::new(ctx.clone())),
            contents: Arc::new(ContentService::new(ctx.clone())),
            moderation: Arc::new(ModerationService::new(ctx)),
            events,
            db,
        }
    }
}

/// Load the acting user, refusing unknown ids
pub(crate) fn require_actor(conn: &Connection, actor_id: &str) -> Result<UserRow, EngineError> {
    users::get_user(conn, actor_id)?.ok_or_else(|| {
        EngineError::forbidden(
            "The acting user could not be identified.",
            "Sign in again before retrying.",
            "AUTHORIZATION:ACTOR:UNKNOWN",
        )
    })
}

/// Accept only version-4 UUIDs, reporting `key` on failure
pub(crate) fn parse_uuid_v4(raw: &str, key: &str, code: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(raw)
        .ok()
        .filter(|id| id.get_version_num() == 4)
        .ok_or_else(|| {
            EngineError::validation_key(key, format!("\"{}\" must be a valid UUID v4.", key), code)
        })
}
