//! Integration tests for the creation firewall
//!
//! Drive sign-ups and content creation through the service layer and check
//! what the firewall quarantined and recorded.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tabgate::db::contents::ContentStatus;
use tabgate::db::events::{self, Event, EventType};
use tabgate::services::{CreateContentInput, CreateUserInput};
use tabgate::{Config, EngineDb, SimulatedTimeSource, Services, UserView};
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

fn setup() -> (Arc<Services>, SimulatedTimeSource) {
    let clock = SimulatedTimeSource::new(t0());
    let db = Arc::new(EngineDb::open_in_memory().unwrap());
    let services = Services::with_clock(db, Config::default(), Arc::new(clock.clone()));
    (Arc::new(services), clock)
}

fn sign_up(services: &Services, name: &str, ip: &str) -> Result<UserView, tabgate::EngineError> {
    services.users.create(
        CreateUserInput {
            username: name.to_string(),
            email: format!("{}@example.com", name),
        },
        ip,
    )
}

fn active_user(services: &Services, name: &str, ip: &str) -> UserView {
    let user = sign_up(services, name, ip).unwrap();
    services.users.activate(&user.id).unwrap()
}

fn root(title: &str) -> CreateContentInput {
    CreateContentInput {
        parent_id: None,
        title: Some(title.to_string()),
        body: format!("{} body", title),
        status: ContentStatus::Published,
        content_type: Default::default(),
    }
}

fn block_events(services: &Services, event_type: EventType) -> Vec<Event> {
    services
        .db
        .read(|conn| {
            events::list_by_type_between(conn, event_type, t0() - Duration::days(1), t0() + Duration::days(30))
        })
        .unwrap()
}

/// threshold + 1 sign-ups from one address: the last fails and the earlier
/// ones are quarantined in creation order
#[test]
fn test_sign_up_burst_quarantines_earlier_users() {
    let (services, clock) = setup();

    let first = sign_up(&services, "first", "198.51.100.1").unwrap();
    clock.advance_secs(1);
    let second = sign_up(&services, "second", "198.51.100.1").unwrap();
    clock.advance_secs(1);

    let err = sign_up(&services, "third", "198.51.100.1").unwrap_err();
    assert_eq!(err.status_code(), 429);
    assert_eq!(err.error_location_code(), "FIREWALL:CREATE_USER:TOO_MANY_REQUESTS");

    let blocks = block_events(&services, EventType::FirewallBlockUsers);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].metadata_ids("users"), vec![first.id.clone(), second.id.clone()]);
    assert_eq!(blocks[0].metadata_id("from_rule"), Some("create:user"));
    assert!(blocks[0].originator_user_id.is_none());

    for id in [&first.id, &second.id] {
        assert!(services.users.get(id).unwrap().features.is_empty());
    }

    // The rejected sign-up left no user behind
    assert_eq!(services.db.stats().unwrap().user_count, 2);
}

#[test]
fn test_other_addresses_are_not_affected() {
    let (services, _clock) = setup();

    sign_up(&services, "a1", "198.51.100.1").unwrap();
    sign_up(&services, "a2", "198.51.100.1").unwrap();
    let bystander = sign_up(&services, "b1", "203.0.113.5").unwrap();
    assert!(sign_up(&services, "a3", "198.51.100.1").is_err());

    let bystander = services.users.get(&bystander.id).unwrap();
    assert!(!bystander.features.is_empty());
    assert!(sign_up(&services, "b2", "203.0.113.5").is_ok());
}

#[test]
fn test_window_expiry_resets_the_count() {
    let (services, clock) = setup();

    sign_up(&services, "early1", "198.51.100.1").unwrap();
    sign_up(&services, "early2", "198.51.100.1").unwrap();

    clock.advance(Duration::minutes(31));
    assert!(sign_up(&services, "late1", "198.51.100.1").is_ok());
    assert!(block_events(&services, EventType::FirewallBlockUsers).is_empty());
}

/// Repeated blocks list only users not already quarantined
#[test]
fn test_repeat_block_has_empty_list() {
    let (services, clock) = setup();

    sign_up(&services, "r1", "198.51.100.1").unwrap();
    sign_up(&services, "r2", "198.51.100.1").unwrap();
    assert!(sign_up(&services, "r3", "198.51.100.1").is_err());
    clock.advance_secs(5);
    assert!(sign_up(&services, "r4", "198.51.100.1").is_err());

    let blocks = block_events(&services, EventType::FirewallBlockUsers);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].metadata_ids("users").len(), 2);
    assert!(blocks[1].metadata_ids("users").is_empty());
}

/// Concurrent sign-ups from one address trip the rule exactly once
#[test]
fn test_concurrent_sign_ups_block_once() {
    let temp = TempDir::new().unwrap();
    let db = Arc::new(EngineDb::open(temp.path()).unwrap());
    let clock = SimulatedTimeSource::new(t0());
    let services = Arc::new(Services::with_clock(db, Config::default(), Arc::new(clock)));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let services = services.clone();
            thread::spawn(move || sign_up(&services, &format!("racer{}", i), "192.0.2.77"))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let created = results.iter().filter(|r| r.is_ok()).count();
    let blocked = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.status_code() == 429))
        .count();
    assert_eq!(created, 2);
    assert_eq!(blocked, 6);

    let blocks = block_events(&services, EventType::FirewallBlockUsers);
    assert_eq!(blocks.len(), 6);
    let non_empty: Vec<_> = blocks.iter().filter(|e| !e.metadata_ids("users").is_empty()).collect();
    assert_eq!(non_empty.len(), 1);
    assert_eq!(non_empty[0].metadata_ids("users").len(), 2);
}

#[test]
fn test_root_content_burst_quarantines_contents() {
    let (services, clock) = setup();
    let author = active_user(&services, "author", "198.51.100.9");

    let mut ids = Vec::new();
    for i in 0..5 {
        clock.advance_secs(10);
        ids.push(services.contents.create(&author.id, root(&format!("Post {}", i))).unwrap().id);
    }
    clock.advance_secs(10);
    let err = services.contents.create(&author.id, root("One too many")).unwrap_err();
    assert_eq!(err.status_code(), 429);
    assert_eq!(
        err.error_location_code(),
        "FIREWALL:CREATE_CONTENT_TEXT_ROOT:TOO_MANY_REQUESTS"
    );

    let blocks = block_events(&services, EventType::FirewallBlockContentsTextRoot);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].metadata_ids("contents"), ids);
    assert_eq!(blocks[0].originator_user_id.as_deref(), Some(author.id.as_str()));

    for id in &ids {
        assert_eq!(services.contents.get(id).unwrap().status, ContentStatus::Firewall);
    }
    // The author keeps their features; only the contents are held
    assert!(!services.users.get(&author.id).unwrap().features.is_empty());
}

#[test]
fn test_child_rule_counts_separately_from_root_rule() {
    let (services, clock) = setup();
    let author = active_user(&services, "writer", "198.51.100.9");
    let replier = active_user(&services, "replier", "198.51.100.10");

    let parent = services.contents.create(&author.id, root("Thread")).unwrap();
    for i in 0..20 {
        clock.advance_secs(1);
        let reply = CreateContentInput {
            parent_id: Some(parent.id.clone()),
            title: None,
            body: format!("reply {}", i),
            status: ContentStatus::Published,
            content_type: Default::default(),
        };
        services.contents.create(&replier.id, reply).unwrap();
    }

    // Twenty replies are within the child threshold; a root still passes
    assert!(services.contents.create(&replier.id, root("Own thread")).is_ok());

    let extra = CreateContentInput {
        parent_id: Some(parent.id.clone()),
        title: None,
        body: "one more".into(),
        status: ContentStatus::Published,
        content_type: Default::default(),
    };
    let err = services.contents.create(&replier.id, extra).unwrap_err();
    assert_eq!(err.status_code(), 429);

    let blocks = block_events(&services, EventType::FirewallBlockContentsTextChild);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].metadata_ids("contents").len(), 20);
    // The parent belongs to someone else and stays published
    assert_eq!(services.contents.get(&parent.id).unwrap().status, ContentStatus::Published);
}

/// A window the clock cannot subtract fails the request and leaves the
/// store usable for every other route
#[test]
fn test_unrepresentable_window_does_not_wedge_the_store() {
    let clock = SimulatedTimeSource::new(t0());
    let db = Arc::new(EngineDb::open_in_memory().unwrap());
    let mut config = Config::default();
    config.firewall.create_user.window_secs = 10_000_000_000_000;
    assert!(config.validate().is_err());
    let services = Services::with_clock(db, config, Arc::new(clock.clone()));

    let err = sign_up(&services, "first", "203.0.113.9").unwrap_err();
    assert_eq!(err.status_code(), 500);

    let stats = services.db.stats().unwrap();
    assert_eq!(stats.user_count, 0);
    assert_eq!(stats.event_count, 0);
}
