//! Integration tests for incident resolution and review
//!
//! Each test trips a rule, then reads or reviews the incident as a moderator.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tabgate::db::contents::ContentStatus;
use tabgate::db::events::{self, Event, EventType};
use tabgate::ledger::Rating;
use tabgate::services::{CreateContentInput, CreateUserInput};
use tabgate::{
    Config, EngineDb, Feature, IncidentView, ReviewView, SimulatedTimeSource, Services, UserView,
};

const SPAM_IP: &str = "198.51.100.1";

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

fn moderator(services: &Services, name: &str, features: &[Feature]) -> UserView {
    let user = active_user(services, name, &format!("10.0.0.{}", name.len()));
    services.users.grant_features(&user.id, features).unwrap()
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

/// Two sign-ups then a blocked third; returns the two quarantined users
fn trip_sign_up_rule(services: &Services, prefix: &str) -> Vec<UserView> {
    let a = sign_up(services, &format!("{}a", prefix), SPAM_IP).unwrap();
    let b = sign_up(services, &format!("{}b", prefix), SPAM_IP).unwrap();
    assert!(sign_up(services, &format!("{}c", prefix), SPAM_IP).is_err());
    vec![a, b]
}

fn expect_incident(view: ReviewView) -> IncidentView {
    match view {
        ReviewView::Incident(incident) => incident,
        ReviewView::Hidden {} => panic!("expected an incident view"),
    }
}

#[test]
fn test_get_incident_lists_quarantined_users() {
    let (services, _clock) = setup();
    let reader = moderator(&services, "reader", &[Feature::ReadFirewall]);
    let users = trip_sign_up_rule(&services, "spam");

    let block = &block_events(&services, EventType::FirewallBlockUsers)[0];
    let incident = services.moderation.get_incident(&reader.id, &block.id).unwrap();

    let ids: Vec<_> = incident.affected.users.iter().map(|u| u.id.clone()).collect();
    assert_eq!(ids, vec![users[0].id.clone(), users[1].id.clone()]);
    assert!(incident.affected.users.iter().all(|u| u.features.is_empty()));
    assert!(incident.affected.contents.is_empty());
    assert_eq!(incident.events.len(), 1);
    assert_eq!(incident.events[0].metadata_ids("users"), ids);

    let json = serde_json::to_value(&incident).unwrap();
    assert_eq!(json["events"][0]["type"], "firewall:block_users");
    assert!(json["events"][0]["originator_user_id"].is_null());
}

#[test]
fn test_get_incident_errors() {
    let (services, _clock) = setup();
    let reader = moderator(&services, "reader", &[Feature::ReadFirewall]);
    let plain = active_user(&services, "plain", "10.1.1.1");
    trip_sign_up_rule(&services, "spam");
    let block = &block_events(&services, EventType::FirewallBlockUsers)[0];

    let err = services.moderation.get_incident(&reader.id, "not-a-uuid").unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.details().unwrap().key.as_deref(), Some("id"));

    let err = services.moderation.get_incident(&plain.id, &block.id).unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert_eq!(err.error_location_code(), "FEATURES:MISSING:read:firewall");

    let unknown = uuid::Uuid::new_v4().to_string();
    let err = services.moderation.get_incident(&reader.id, &unknown).unwrap_err();
    assert_eq!(err.status_code(), 404);

    // A creation event is not a firewall event
    let creation = &block_events(&services, EventType::CreateUser)[0];
    let err = services.moderation.get_incident(&reader.id, &creation.id).unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[test]
fn test_undo_restores_features() {
    let (services, _clock) = setup();
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    let users = trip_sign_up_rule(&services, "fine");
    let block = &block_events(&services, EventType::FirewallBlockUsers)[0];

    let view = expect_incident(services.moderation.review(&reviewer.id, &block.id, "undo").unwrap());

    for (before, after) in users.iter().zip(&view.affected.users) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.features, after.features);
    }
    assert_eq!(view.events.len(), 2);
    let review = &view.events[1];
    assert_eq!(review.event_type, EventType::ModerationUnblockUsers);
    assert_eq!(review.originator_user_id.as_deref(), Some(reviewer.id.as_str()));
    assert_eq!(review.metadata_ids("related_events"), vec![block.id.clone()]);

    // Restored users can be activated again
    assert!(services.users.activate(&users[0].id).is_ok());
}

#[test]
fn test_confirm_nukes_users() {
    let (services, _clock) = setup();
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    let users = trip_sign_up_rule(&services, "bad");
    let block = &block_events(&services, EventType::FirewallBlockUsers)[0];

    let view = expect_incident(services.moderation.review(&reviewer.id, &block.id, "confirm").unwrap());
    assert_eq!(view.events[1].event_type, EventType::ModerationBlockUsers);

    for user in &users {
        let user = services.users.get(&user.id).unwrap();
        assert_eq!(user.features.iter().copied().collect::<Vec<_>>(), vec![Feature::Nuked]);
        let err = services.users.activate(&user.id).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}

/// Reviewing one member of a merged incident reviews all of them
#[test]
fn test_merged_incident_is_reviewed_once() {
    let (services, clock) = setup();
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    trip_sign_up_rule(&services, "wave");
    clock.advance_secs(5);
    assert!(sign_up(&services, "wavez", SPAM_IP).is_err());

    let blocks = block_events(&services, EventType::FirewallBlockUsers);
    assert_eq!(blocks.len(), 2);

    // Either member resolves to the same incident
    let from_first = services.moderation.get_incident(&reviewer.id, &blocks[0].id).unwrap();
    let from_second = services.moderation.get_incident(&reviewer.id, &blocks[1].id).unwrap();
    let ids = |v: &IncidentView| v.events.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&from_first), vec![blocks[0].id.clone(), blocks[1].id.clone()]);
    assert_eq!(ids(&from_first), ids(&from_second));
    assert_eq!(from_second.affected.users.len(), 2);

    let view = expect_incident(services.moderation.review(&reviewer.id, &blocks[1].id, "undo").unwrap());
    assert_eq!(
        view.events[2].metadata_ids("related_events"),
        vec![blocks[0].id.clone(), blocks[1].id.clone()]
    );

    let err = services.moderation.review(&reviewer.id, &blocks[0].id, "confirm").unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(
        err.error_location_code(),
        "MODERATION:REVIEW_FIREWALL:EVENT_ALREADY_REVIEWED"
    );

    // The failed review changed nothing
    assert_eq!(block_events(&services, EventType::ModerationBlockUsers).len(), 0);
}

#[test]
fn test_distant_blocks_stay_separate() {
    let (services, clock) = setup();
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    trip_sign_up_rule(&services, "early");
    clock.advance(Duration::hours(2));
    trip_sign_up_rule(&services, "later");

    let blocks = block_events(&services, EventType::FirewallBlockUsers);
    assert_eq!(blocks.len(), 2);

    let first = services.moderation.get_incident(&reviewer.id, &blocks[0].id).unwrap();
    assert_eq!(first.events.len(), 1);

    services.moderation.review(&reviewer.id, &blocks[0].id, "confirm").unwrap();
    // The later burst is its own incident and still open
    assert!(services.moderation.review(&reviewer.id, &blocks[1].id, "undo").is_ok());
}

/// A block written after a review starts a new incident even inside the window
#[test]
fn test_block_after_review_is_new_incident() {
    let (services, clock) = setup();
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    let users = trip_sign_up_rule(&services, "again");
    let first = block_events(&services, EventType::FirewallBlockUsers)[0].clone();
    services.moderation.review(&reviewer.id, &first.id, "undo").unwrap();

    clock.advance_secs(30);
    assert!(sign_up(&services, "againd", SPAM_IP).is_err());
    let blocks = block_events(&services, EventType::FirewallBlockUsers);
    let second = &blocks[1];
    // The restored users were quarantined again
    assert_eq!(second.metadata_ids("users"), vec![users[0].id.clone(), users[1].id.clone()]);

    let incident = services.moderation.get_incident(&reviewer.id, &second.id).unwrap();
    assert_eq!(incident.events.len(), 1);
    assert!(services.moderation.review(&reviewer.id, &second.id, "confirm").is_ok());
}

#[test]
fn test_review_without_read_returns_empty_object() {
    let (services, _clock) = setup();
    let reviewer = moderator(&services, "blindrev", &[Feature::ReviewFirewall]);
    let users = trip_sign_up_rule(&services, "hidden");
    let block = &block_events(&services, EventType::FirewallBlockUsers)[0];

    let view = services.moderation.review(&reviewer.id, &block.id, "undo").unwrap();
    assert!(matches!(view, ReviewView::Hidden {}));
    assert_eq!(serde_json::to_string(&view).unwrap(), "{}");

    // The review still happened
    assert!(!services.users.get(&users[0].id).unwrap().features.is_empty());
}

#[test]
fn test_review_errors() {
    let (services, _clock) = setup();
    let reader = moderator(&services, "reader", &[Feature::ReadFirewall]);
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    trip_sign_up_rule(&services, "errs");
    let block = &block_events(&services, EventType::FirewallBlockUsers)[0];

    let err = services.moderation.review(&reviewer.id, &block.id, "approve").unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.details().unwrap().key.as_deref(), Some("action"));

    let err = services.moderation.review(&reviewer.id, "1234", "undo").unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = services.moderation.review(&reader.id, &block.id, "undo").unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert_eq!(err.error_location_code(), "FEATURES:MISSING:review:firewall");

    let unknown = uuid::Uuid::new_v4().to_string();
    let err = services.moderation.review(&reviewer.id, &unknown, "undo").unwrap_err();
    assert_eq!(err.status_code(), 404);
}

/// Balances on restored entities include activity from the quarantine period
#[test]
fn test_undo_reflects_ratings_during_quarantine() {
    let (services, clock) = setup();
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    let voter = active_user(&services, "voter", "10.9.9.9");
    services
        .users
        .grant_balance(&voter.id, tabgate::db::balance::BalanceType::UserTabcoin, 10)
        .unwrap();

    let author = active_user(&services, "author", SPAM_IP);
    let post = services.contents.create(&author.id, root("Hello")).unwrap();
    assert_eq!(services.users.get(&author.id).unwrap().tabcoins, 2);

    clock.advance_secs(1);
    sign_up(&services, "sidekick", SPAM_IP).unwrap();
    assert!(sign_up(&services, "thirdwheel", SPAM_IP).is_err());
    assert!(services.users.get(&author.id).unwrap().features.is_empty());

    // The author's published content stays ratable while they are held
    services.contents.rate(&voter.id, &post.id, Rating::Credit).unwrap();

    let block = &block_events(&services, EventType::FirewallBlockUsers)[0];
    let view = expect_incident(services.moderation.review(&reviewer.id, &block.id, "undo").unwrap());
    let restored = view.affected.users.iter().find(|u| u.id == author.id).unwrap();
    assert_eq!(restored.tabcoins, 3);
    assert!(restored.features.contains(Feature::CreateContent));
}

/// Confirming a content incident deletes the contents and takes back their earnings
#[test]
fn test_confirm_content_incident_settles_ledger() {
    let (services, clock) = setup();
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    let author = active_user(&services, "flooder", "10.2.2.2");

    for i in 0..5 {
        clock.advance_secs(5);
        services.contents.create(&author.id, root(&format!("Flood {}", i))).unwrap();
    }
    assert_eq!(services.users.get(&author.id).unwrap().tabcoins, 10);
    assert!(services.contents.create(&author.id, root("Flood 5")).is_err());

    let block = &block_events(&services, EventType::FirewallBlockContentsTextRoot)[0];
    let view = expect_incident(services.moderation.review(&reviewer.id, &block.id, "confirm").unwrap());

    assert_eq!(view.affected.contents.len(), 5);
    for content in &view.affected.contents {
        assert_eq!(content.status, ContentStatus::Deleted);
        assert!(content.deleted_at.is_some());
        // The content's own entries are untouched
        assert_eq!(content.tabcoins, 2);
    }
    assert_eq!(view.affected.users.len(), 1);
    assert_eq!(view.affected.users[0].id, author.id);
    assert_eq!(view.affected.users[0].tabcoins, 0);
    assert_eq!(view.events[1].event_type, EventType::ModerationBlockContentsTextRoot);

    let chain = services.db.read(tabgate::ledger::verify_chain).unwrap();
    assert!(chain.is_intact());
}

#[test]
fn test_undo_content_incident_restores_status() {
    let (services, clock) = setup();
    let reviewer = moderator(
        &services,
        "reviewer",
        &[Feature::ReadFirewall, Feature::ReviewFirewall],
    );
    let author = active_user(&services, "drafter", "10.3.3.3");

    let draft_input = CreateContentInput { status: ContentStatus::Draft, ..root("Draft") };
    let draft = services.contents.create(&author.id, draft_input).unwrap();
    for i in 0..4 {
        clock.advance_secs(5);
        services.contents.create(&author.id, root(&format!("Post {}", i))).unwrap();
    }
    assert!(services.contents.create(&author.id, root("Blocked")).is_err());
    assert_eq!(services.contents.get(&draft.id).unwrap().status, ContentStatus::Firewall);

    let block = &block_events(&services, EventType::FirewallBlockContentsTextRoot)[0];
    let view = expect_incident(services.moderation.review(&reviewer.id, &block.id, "undo").unwrap());

    assert_eq!(view.affected.contents[0].id, draft.id);
    assert_eq!(view.affected.contents[0].status, ContentStatus::Draft);
    assert!(view.affected.contents[1..]
        .iter()
        .all(|c| c.status == ContentStatus::Published));
    assert_eq!(services.users.get(&author.id).unwrap().tabcoins, 8);
}
