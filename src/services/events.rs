//! In-process notifications for committed engine operations
//!
//! Services emit an [`EngineEvent`] only after their transaction commits, so
//! listeners never observe work that was rolled back. The persistent record
//! of every operation is the `events` table; this bus is for logging and
//! other side channels.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::contents::{ContentKind, ContentStatus};
use crate::firewall::{FirewallRule, ReviewAction};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    UserCreated {
        id: String,
        username: String,
    },
    ContentCreated {
        id: String,
        owner_id: String,
        kind: ContentKind,
        status: ContentStatus,
    },
    ContentUpdated {
        id: String,
        from: ContentStatus,
        to: ContentStatus,
    },
    ContentRated {
        content_id: String,
        voter_id: String,
        amount: i64,
    },
    FirewallBlocked {
        event_id: String,
        rule: FirewallRule,
        affected: usize,
    },
    IncidentReviewed {
        review_event_id: String,
        action: ReviewAction,
        related_events: Vec<String>,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Event bus for broadcasting engine events
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: EngineEvent) {
        trace!(event = ?event, "Emitting engine event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::FirewallBlocked { event_id, rule, affected } => {
                info!(event_id = %event_id, rule = %rule, affected, "Firewall block recorded");
            }
            EngineEvent::IncidentReviewed {
                review_event_id,
                action,
                related_events,
            } => {
                info!(
                    review_event_id = %review_event_id,
                    action = %action,
                    related = related_events.len(),
                    "Incident reviewed"
                );
            }
            EngineEvent::UserCreated { id, username } => {
                debug!(id = %id, username = %username, "User created");
            }
            EngineEvent::ContentCreated { id, owner_id, kind, status } => {
                debug!(id = %id, owner = %owner_id, kind = ?kind, status = %status, "Content created");
            }
            _ => {
                trace!(event = ?event, "Engine event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
