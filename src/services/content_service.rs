//! Content service - creation, status changes and ratings
//!
//! Creation is guarded by the `create:content:text_root|text_child` rules,
//! scoped by owner. Publication goes through the prestige gate and the
//! ledger; deletion settles the owner's earnings.

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::events::EngineEvent;
use super::{require_actor, ServiceContext};
use crate::db::contents::{
    self, ContentKind, ContentRow, ContentStatus, ContentType, NewContent,
};
use crate::db::events::{self, Event, EventType, NewEvent};
use crate::db::Outcome;
use crate::error::EngineError;
use crate::features::Feature;
use crate::firewall::{FirewallRule, Scope, Verdict};
use crate::ledger::{self, Rating};
use crate::views::ContentView;

/// Input for creating content
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContentInput {
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    #[serde(default = "default_status")]
    pub status: ContentStatus,
    #[serde(default)]
    pub content_type: ContentType,
}

fn default_status() -> ContentStatus {
    ContentStatus::Draft
}

impl CreateContentInput {
    fn validate(&self) -> Result<(), EngineError> {
        if self.body.trim().is_empty() {
            return Err(EngineError::validation_key(
                "body",
                "\"body\" must not be empty.",
                "CONTENT:CREATE:BODY:EMPTY",
            ));
        }
        if !matches!(self.status, ContentStatus::Draft | ContentStatus::Published) {
            return Err(EngineError::validation_key(
                "status",
                "\"status\" must be \"draft\" or \"published\".",
                "CONTENT:CREATE:STATUS:INVALID",
            ));
        }
        let kind = ContentKind::of(self.parent_id.as_deref());
        if kind == ContentKind::Root && self.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(EngineError::validation_key(
                "title",
                "\"title\" is required for root contents.",
                "CONTENT:CREATE:TITLE:REQUIRED",
            ));
        }
        if kind == ContentKind::Child && self.content_type == ContentType::Ad {
            return Err(EngineError::validation_key(
                "content_type",
                "Ads must be root contents.",
                "CONTENT:CREATE:AD:NOT_ROOT",
            ));
        }
        Ok(())
    }
}

/// Partial update of content
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateContentInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub status: Option<ContentStatus>,
}

/// Input for rating content
#[derive(Debug, Clone, Deserialize)]
pub struct RateContentInput {
    pub transaction_type: Rating,
}

pub struct ContentService {
    ctx: ServiceContext,
}

impl ContentService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Create content owned by `actor_id`
    pub fn create(&self, actor_id: &str, input: CreateContentInput) -> Result<ContentView, EngineError> {
        input.validate()?;
        let kind = ContentKind::of(input.parent_id.as_deref());
        let rule = FirewallRule::for_content(kind);
        let now = self.ctx.clock.now();
        let config = &self.ctx.config;
        let mut blocked: Option<Event> = None;

        let result = self.ctx.db.write_outcome(|tx| {
            let actor = require_actor(tx, actor_id)?;
            actor.features.require(&[Feature::CreateContent, kind_feature(kind)])?;

            let parent_owner = match input.parent_id.as_deref() {
                Some(parent_id) => Some(published_parent(tx, parent_id)?.owner_id),
                None => None,
            };

            let scope = Scope::Owner(actor.id.clone());
            if let Verdict::Blocked { event, error } =
                self.ctx.firewall.evaluate(tx, rule, &scope, now)?
            {
                blocked = Some(event);
                return Ok(Outcome::CommitThenFail(error));
            }

            let plan = match input.status {
                ContentStatus::Published => Some(ledger::plan_publication(
                    tx,
                    &actor.id,
                    kind,
                    input.content_type,
                    parent_owner.as_deref(),
                    &config.ledger,
                    &config.prestige,
                )?),
                _ => None,
            };

            let id = contents::new_content_id();
            let row = contents::insert_content(
                tx,
                &id,
                &NewContent {
                    owner_id: actor.id.clone(),
                    parent_id: input.parent_id.clone(),
                    title: input.title.as_deref().map(|t| t.trim().to_string()),
                    body: input.body.clone(),
                    status: input.status,
                    content_type: input.content_type,
                },
                now,
            )?;

            let event = events::append_event(
                tx,
                NewEvent::new(creation_event(kind))
                    .by_user(actor.id.as_str())
                    .with("id", row.id.clone()),
                now,
            )?;

            if let Some(plan) = plan {
                ledger::apply_publication(tx, &row, plan, &event.id, now)?;
            }

            Ok(Outcome::Commit(ContentView::load(tx, row)?))
        });

        if let Some(event) = blocked {
            warn!(owner = %actor_id, rule = %rule, event_id = %event.id, "Content blocked by firewall");
            self.ctx.events.emit(EngineEvent::FirewallBlocked {
                affected: event.metadata_ids("contents").len(),
                event_id: event.id,
                rule,
            });
        }

        let view = result?;
        info!(content_id = %view.id, owner = %view.owner_id, status = %view.status, "Content created");
        self.ctx.events.emit(EngineEvent::ContentCreated {
            id: view.id.clone(),
            owner_id: view.owner_id.clone(),
            kind,
            status: view.status,
        });
        Ok(view)
    }

    /// Edit text or move status; deletion settles the owner's earnings
    pub fn update(
        &self,
        actor_id: &str,
        content_id: &str,
        patch: UpdateContentInput,
    ) -> Result<ContentView, EngineError> {
        let now = self.ctx.clock.now();
        let config = &self.ctx.config;

        let (view, from) = self.ctx.db.write(|tx| {
            let actor = require_actor(tx, actor_id)?;
            let content = contents::get_content(tx, content_id)?
                .filter(|c| !matches!(c.status, ContentStatus::Firewall | ContentStatus::Deleted))
                .ok_or_else(content_not_found)?;

            if content.owner_id == actor.id {
                actor.features.require(&[Feature::UpdateContent])?;
            } else {
                actor.features.require(&[Feature::UpdateContentOthers])?;
            }

            validate_patch(&content, &patch)?;
            let from = content.status;
            let to = patch.status.unwrap_or(from);
            check_transition(from, to)?;

            let plan = if from == ContentStatus::Draft && to == ContentStatus::Published {
                let parent_owner = match content.parent_id.as_deref() {
                    Some(parent_id) => contents::get_content(tx, parent_id)?.map(|p| p.owner_id),
                    None => None,
                };
                Some(ledger::plan_publication(
                    tx,
                    &content.owner_id,
                    content.kind(),
                    content.content_type,
                    parent_owner.as_deref(),
                    &config.ledger,
                    &config.prestige,
                )?)
            } else {
                None
            };

            contents::update_text(
                tx,
                &content.id,
                patch.title.as_deref().map(str::trim),
                patch.body.as_deref(),
                now,
            )?;
            if to != from {
                contents::set_status(tx, &content.id, to, now)?;
            }

            let event = events::append_event(
                tx,
                NewEvent::new(update_event(content.kind()))
                    .by_user(actor.id.as_str())
                    .with("id", content.id.clone())
                    .with("status", json!({ "from": from.as_str(), "to": to.as_str() })),
                now,
            )?;

            if let Some(plan) = plan {
                ledger::apply_publication(tx, &content, plan, &event.id, now)?;
            }
            if from == ContentStatus::Published && to == ContentStatus::Deleted {
                ledger::settle_deletion(tx, &content, Some(&event.id), now)?;
            }

            let row = contents::get_content(tx, &content.id)?.ok_or_else(content_not_found)?;
            Ok((ContentView::load(tx, row)?, from))
        })?;

        info!(content_id = %view.id, from = %from, to = %view.status, "Content updated");
        self.ctx.events.emit(EngineEvent::ContentUpdated {
            id: view.id.clone(),
            from,
            to: view.status,
        });
        Ok(view)
    }

    /// Spend TabCoins to credit or debit someone else's published content
    pub fn rate(&self, voter_id: &str, content_id: &str, rating: Rating) -> Result<ContentView, EngineError> {
        let now = self.ctx.clock.now();
        let policy = &self.ctx.config.ledger;

        let view = self.ctx.db.write(|tx| {
            let voter = require_actor(tx, voter_id)?;
            voter.features.require(&[Feature::UpdateContent])?;

            let content = contents::get_content(tx, content_id)?
                .filter(|c| c.status == ContentStatus::Published)
                .ok_or_else(content_not_found)?;
            if content.owner_id == voter.id {
                return Err(EngineError::validation(
                    "You cannot rate your own content.",
                    "Rate contents written by other users.",
                    "RATING:OWN_CONTENT",
                ));
            }

            let event = events::append_event(
                tx,
                NewEvent::new(EventType::UpdateContentTabcoins)
                    .by_user(voter.id.as_str())
                    .with("content_id", content.id.clone())
                    .with("amount", rating.amount()),
                now,
            )?;
            ledger::apply_rating(tx, &voter.id, &content, rating, &event.id, policy, now)?;

            ContentView::load(tx, content)
        })?;

        self.ctx.events.emit(EngineEvent::ContentRated {
            content_id: view.id.clone(),
            voter_id: voter_id.to_string(),
            amount: rating.amount(),
        });
        Ok(view)
    }

    pub fn get(&self, content_id: &str) -> Result<ContentView, EngineError> {
        self.ctx.db.read(|conn| {
            let row = contents::get_content(conn, content_id)?.ok_or_else(content_not_found)?;
            ContentView::load(conn, row)
        })
    }
}

fn kind_feature(kind: ContentKind) -> Feature {
    match kind {
        ContentKind::Root => Feature::CreateContentTextRoot,
        ContentKind::Child => Feature::CreateContentTextChild,
    }
}

fn creation_event(kind: ContentKind) -> EventType {
    match kind {
        ContentKind::Root => EventType::CreateContentTextRoot,
        ContentKind::Child => EventType::CreateContentTextChild,
    }
}

fn update_event(kind: ContentKind) -> EventType {
    match kind {
        ContentKind::Root => EventType::UpdateContentTextRoot,
        ContentKind::Child => EventType::UpdateContentTextChild,
    }
}

fn content_not_found() -> EngineError {
    EngineError::not_found(
        "The content was not found.",
        "Check the content id.",
        "CONTENT:NOT_FOUND",
    )
}

fn published_parent(conn: &Connection, parent_id: &str) -> Result<ContentRow, EngineError> {
    contents::get_content(conn, parent_id)?
        .filter(|p| p.status == ContentStatus::Published)
        .ok_or_else(|| {
            EngineError::validation_key(
                "parent_id",
                "The parent content does not exist or is not published.",
                "CONTENT:CREATE:PARENT:NOT_FOUND",
            )
        })
}

fn validate_patch(content: &ContentRow, patch: &UpdateContentInput) -> Result<(), EngineError> {
    if patch.body.as_deref().is_some_and(|b| b.trim().is_empty()) {
        return Err(EngineError::validation_key(
            "body",
            "\"body\" must not be empty.",
            "CONTENT:UPDATE:BODY:EMPTY",
        ));
    }
    if content.kind() == ContentKind::Root
        && patch.title.as_deref().is_some_and(|t| t.trim().is_empty())
    {
        return Err(EngineError::validation_key(
            "title",
            "\"title\" is required for root contents.",
            "CONTENT:UPDATE:TITLE:REQUIRED",
        ));
    }
    Ok(())
}

/// Allowed: draft to published, draft or published to deleted, or no change
fn check_transition(from: ContentStatus, to: ContentStatus) -> Result<(), EngineError> {
    use ContentStatus::*;
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (Draft, Published) | (Draft, Deleted) | (Published, Deleted) => Ok(()),
        _ => Err(EngineError::validation_key(
            "status",
            format!("Cannot change status from \"{}\" to \"{}\".", from, to),
            "CONTENT:UPDATE:STATUS:INVALID_TRANSITION",
        )),
    }
}
