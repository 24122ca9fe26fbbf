//! User service - sign-up, activation and capability grants
//!
//! Sign-up is guarded by the `create:user` rule, scoped by source address.

use serde::Deserialize;
use tracing::{info, warn};

use super::events::EngineEvent;
use super::{require_actor, ServiceContext};
use crate::db::balance::{BalanceOperation, BalanceType};
use crate::db::events::{self, Event, EventType, NewEvent};
use crate::db::users::{self, NewUser, UserRow};
use crate::db::Outcome;
use crate::error::EngineError;
use crate::features::{Feature, FeatureSet, UserState};
use crate::firewall::{FirewallRule, Scope, Verdict};
use crate::ledger;
use crate::views::UserView;

/// Input for creating a user
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    pub username: String,
    pub email: String,
}

impl CreateUserInput {
    fn validate(&self) -> Result<(), EngineError> {
        let username = self.username.trim();
        if username.is_empty()
            || username.chars().count() > 30
            || !username.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(EngineError::validation_key(
                "username",
                "\"username\" must have 1 to 30 letters or digits.",
                "USER:CREATE:USERNAME:INVALID",
            ));
        }
        let email = self.email.trim();
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(EngineError::validation_key(
                "email",
                "\"email\" must be a valid address.",
                "USER:CREATE:EMAIL:INVALID",
            ));
        }
        Ok(())
    }
}

pub struct UserService {
    ctx: ServiceContext,
}

impl UserService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Register a new inactive user from `source_ip`
    pub fn create(&self, input: CreateUserInput, source_ip: &str) -> Result<UserView, EngineError> {
        input.validate()?;
        let now = self.ctx.clock.now();
        let mut blocked: Option<Event> = None;

        let result = self.ctx.db.write_outcome(|tx| {
            let username = input.username.trim();
            let email = input.email.trim();
            if users::username_taken(tx, username)? {
                return Err(EngineError::validation_key(
                    "username",
                    "This username is already in use.",
                    "USER:CREATE:USERNAME:TAKEN",
                ));
            }
            if users::email_taken(tx, email)? {
                return Err(EngineError::validation_key(
                    "email",
                    "This email is already in use.",
                    "USER:CREATE:EMAIL:TAKEN",
                ));
            }

            let scope = Scope::Ip(source_ip.to_string());
            if let Verdict::Blocked { event, error } =
                self.ctx.firewall.evaluate(tx, FirewallRule::CreateUser, &scope, now)?
            {
                blocked = Some(event);
                return Ok(Outcome::CommitThenFail(error));
            }

            let user = users::insert_user(
                tx,
                &NewUser {
                    username: username.to_string(),
                    email: email.to_string(),
                    features: FeatureSet::for_state(UserState::Inactive),
                },
                now,
            )?;
            events::append_event(
                tx,
                NewEvent::new(EventType::CreateUser)
                    .from_ip(source_ip)
                    .with("id", user.id.clone()),
                now,
            )?;

            Ok(Outcome::Commit(UserView::load(tx, user)?))
        });

        if let Some(event) = blocked {
            warn!(ip = %source_ip, event_id = %event.id, "Sign-up blocked by firewall");
            self.ctx.events.emit(EngineEvent::FirewallBlocked {
                affected: event.metadata_ids("users").len(),
                event_id: event.id,
                rule: FirewallRule::CreateUser,
            });
        }

        let view = result?;
        info!(user_id = %view.id, username = %view.username, "User created");
        self.ctx.events.emit(EngineEvent::UserCreated {
            id: view.id.clone(),
            username: view.username.clone(),
        });
        Ok(view)
    }

    /// Move an inactive user to the active feature set
    pub fn activate(&self, user_id: &str) -> Result<UserView, EngineError> {
        let now = self.ctx.clock.now();
        self.ctx.db.write(|tx| {
            let user = load_mutable_user(tx, user_id)?;

            let mut features = user.features.clone();
            for feature in FeatureSet::for_state(UserState::Active).iter() {
                features.insert(*feature);
            }
            let features: FeatureSet = features
                .iter()
                .copied()
                .filter(|f| *f != Feature::ReadActivationToken)
                .collect();

            users::set_features(tx, &user.id, &features, now)?;
            reload(tx, &user.id)
        })
    }

    /// Add privileged features such as `review:firewall` (operator hook)
    pub fn grant_features(&self, user_id: &str, granted: &[Feature]) -> Result<UserView, EngineError> {
        if granted.contains(&Feature::Nuked) {
            return Err(EngineError::validation_key(
                "features",
                "\"nuked\" is only set by moderation.",
                "USER:GRANT_FEATURES:NUKED",
            ));
        }

        let now = self.ctx.clock.now();
        self.ctx.db.write(|tx| {
            let user = load_mutable_user(tx, user_id)?;
            let mut features = user.features.clone();
            for feature in granted {
                features.insert(*feature);
            }
            users::set_features(tx, &user.id, &features, now)?;
            info!(user_id = %user.id, granted = ?granted, "Granted features");
            reload(tx, &user.id)
        })
    }

    /// Fund a user's TabCoins or TabCash outside any user action (operator hook)
    pub fn grant_balance(
        &self,
        user_id: &str,
        currency: BalanceType,
        amount: i64,
    ) -> Result<BalanceOperation, EngineError> {
        let now = self.ctx.clock.now();
        self.ctx.db.write(|tx| {
            require_actor(tx, user_id)?;
            ledger::grant(tx, user_id, currency, amount, now)
        })
    }

    pub fn get(&self, user_id: &str) -> Result<UserView, EngineError> {
        self.ctx.db.read(|conn| reload(conn, user_id))
    }
}

fn user_not_found() -> EngineError {
    EngineError::not_found(
        "The user was not found.",
        "Check the user id.",
        "USER:NOT_FOUND",
    )
}

fn reload(conn: &rusqlite::Connection, user_id: &str) -> Result<UserView, EngineError> {
    let user = users::get_user(conn, user_id)?.ok_or_else(user_not_found)?;
    UserView::load(conn, user)
}

/// A user whose features may be changed: neither nuked nor quarantined
fn load_mutable_user(conn: &rusqlite::Connection, user_id: &str) -> Result<UserRow, EngineError> {
    let user = users::get_user(conn, user_id)?.ok_or_else(user_not_found)?;
    if user.is_nuked() {
        return Err(EngineError::forbidden(
            "This user has been banned.",
            "Contact support if you believe this is a mistake.",
            "USER:NUKED",
        ));
    }
    if user.is_quarantined() {
        return Err(EngineError::validation(
            "This user is under firewall review.",
            "Wait for a moderator to review the account.",
            "USER:QUARANTINED",
        ));
    }
    Ok(user)
}
