//! Moderation service - firewall incident lookup and review
//!
//! A review covers the whole incident the requested event belongs to. The
//! review event lists every block event of the incident in `related_events`,
//! which is what marks all of them reviewed; a second review of any member
//! fails with `EVENT_ALREADY_REVIEWED`.

use rusqlite::Connection;
use tracing::info;

use super::events::EngineEvent;
use super::{parse_uuid_v4, require_actor, ServiceContext};
use crate::db::contents::{self, ContentStatus};
use crate::db::events::{self, NewEvent};
use crate::db::users;
use crate::error::EngineError;
use crate::features::{Feature, FeatureSet, UserState};
use crate::firewall::{hydrate_incident, resolve_incident, EntityKind, Incident, ReviewAction};
use crate::ledger;
use crate::views::{IncidentView, ReviewView};

pub struct ModerationService {
    ctx: ServiceContext,
}

impl ModerationService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Incident containing the firewall event `event_id`, with current entity state
    pub fn get_incident(&self, actor_id: &str, event_id: &str) -> Result<IncidentView, EngineError> {
        let event_id = parse_uuid_v4(event_id, "id", "MODERATION:GET_FIREWALL:ID:INVALID")?;
        let policy = &self.ctx.config.firewall;

        self.ctx.db.read(|conn| {
            let actor = require_actor(conn, actor_id)?;
            actor.features.require(&[Feature::ReadFirewall])?;

            let incident = load_incident(conn, &event_id.to_string(), policy)?;
            hydrate_incident(conn, &incident)
        })
    }

    /// Confirm or undo the incident containing `event_id`
    pub fn review(&self, actor_id: &str, event_id: &str, action: &str) -> Result<ReviewView, EngineError> {
        let event_id = parse_uuid_v4(event_id, "id", "MODERATION:REVIEW_FIREWALL:ID:INVALID")?;
        let action: ReviewAction = action.parse().map_err(|_| {
            EngineError::validation_key(
                "action",
                "\"action\" must be \"confirm\" or \"undo\".",
                "MODERATION:REVIEW_FIREWALL:ACTION:INVALID",
            )
        })?;
        let now = self.ctx.clock.now();
        let policy = &self.ctx.config.firewall;

        let (view, review_event_id, related) = self.ctx.db.write(|tx| {
            let actor = require_actor(tx, actor_id)?;
            actor.features.require(&[Feature::ReviewFirewall])?;

            let incident = load_incident(tx, &event_id.to_string(), policy)?;
            if incident.is_reviewed() {
                return Err(EngineError::validation(
                    "This firewall event has already been reviewed.",
                    "Refresh the incident to see the existing review.",
                    "MODERATION:REVIEW_FIREWALL:EVENT_ALREADY_REVIEWED",
                ));
            }

            let related = incident.block_event_ids();
            let listed = incident.listed_ids();
            let review = events::append_event(
                tx,
                NewEvent::new(incident.rule.review_event(action == ReviewAction::Confirm))
                    .by_user(actor.id.as_str())
                    .with("related_events", related.clone())
                    .with(incident.rule.entity().metadata_key(), listed.clone()),
                now,
            )?;

            match (incident.rule.entity(), action) {
                (EntityKind::Users, ReviewAction::Undo) => {
                    for id in &listed {
                        users::restore_user(tx, id, now)?;
                    }
                }
                (EntityKind::Users, ReviewAction::Confirm) => {
                    let nuked = FeatureSet::for_state(UserState::Nuked);
                    for id in &listed {
                        users::nuke_user(tx, id, &nuked, now)?;
                    }
                }
                (EntityKind::Contents, ReviewAction::Undo) => {
                    for id in &listed {
                        contents::restore_content(tx, id, now)?;
                    }
                }
                (EntityKind::Contents, ReviewAction::Confirm) => {
                    for id in &listed {
                        let Some(content) = contents::get_content(tx, id)? else {
                            continue;
                        };
                        if content.status != ContentStatus::Firewall {
                            continue;
                        }
                        contents::delete_quarantined(tx, id, now)?;
                        ledger::settle_deletion(tx, &content, Some(&review.id), now)?;
                    }
                }
            }

            let view = if actor.features.contains(Feature::ReadFirewall) {
                let incident = load_incident(tx, &event_id.to_string(), policy)?;
                ReviewView::Incident(hydrate_incident(tx, &incident)?)
            } else {
                ReviewView::Hidden {}
            };

            Ok((view, review.id, related))
        })?;

        info!(
            review_event_id = %review_event_id,
            action = %action,
            related = related.len(),
            "Firewall incident reviewed"
        );
        self.ctx.events.emit(EngineEvent::IncidentReviewed {
            review_event_id,
            action,
            related_events: related,
        });
        Ok(view)
    }
}

fn load_incident(
    conn: &Connection,
    event_id: &str,
    policy: &crate::config::FirewallPolicy,
) -> Result<Incident, EngineError> {
    resolve_incident(conn, event_id, policy)?.ok_or_else(|| {
        EngineError::not_found(
            "The firewall event was not found.",
            "Check the event id.",
            "MODERATION:FIREWALL_EVENT:NOT_FOUND",
        )
    })
}
