//! HTTP API tests over a real socket
//!
//! Requests are written as raw HTTP/1.1 with `Connection: close`, so the
//! tests need nothing beyond tokio.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tabgate::{Config, EngineDb, Feature, HttpServer, Services};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct Reply {
    status: u16,
    request_id: Option<String>,
    body: Value,
}

async fn start() -> (SocketAddr, Arc<Services>) {
    let db = Arc::new(EngineDb::open_in_memory().unwrap());
    let services = Arc::new(Services::new(db, Config::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Arc::new(HttpServer::new(services.clone(), addr));
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (addr, services)
}

async fn send(addr: SocketAddr, method: &str, path: &str, headers: &[(&str, &str)], body: Option<Value>) -> Reply {
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
        method,
        path,
        addr,
        body.len()
    );
    for (name, value) in headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    request.push_str("\r\n");
    request.push_str(&body);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8(raw).unwrap();

    let (head, payload) = raw.split_once("\r\n\r\n").unwrap();
    let status = head.split_whitespace().nth(1).unwrap().parse().unwrap();
    let request_id = head
        .lines()
        .find_map(|l| l.to_ascii_lowercase().strip_prefix("x-request-id: ").map(str::to_string));

    Reply {
        status,
        request_id,
        body: serde_json::from_str(payload).unwrap_or(Value::Null),
    }
}

async fn sign_up(addr: SocketAddr, name: &str, ip: &str) -> Reply {
    send(
        addr,
        "POST",
        "/users",
        &[("X-Forwarded-For", ip)],
        Some(json!({ "username": name, "email": format!("{}@example.com", name) })),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let (addr, _services) = start().await;
    let reply = send(addr, "GET", "/health", &[], None).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["status"], "ok");
    assert!(reply.request_id.is_some());
}

#[tokio::test]
async fn test_unknown_route() {
    let (addr, _services) = start().await;
    let reply = send(addr, "GET", "/nowhere", &[], None).await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body["name"], "NotFoundError");
}

#[tokio::test]
async fn test_firewall_flow_over_http() {
    let (addr, services) = start().await;

    let moderator = sign_up(addr, "moderator", "10.0.0.2").await;
    assert_eq!(moderator.status, 201);
    let moderator_id = moderator.body["id"].as_str().unwrap().to_string();
    services.users.activate(&moderator_id).unwrap();
    services
        .users
        .grant_features(&moderator_id, &[Feature::ReadFirewall, Feature::ReviewFirewall])
        .unwrap();

    let first = sign_up(addr, "spam1", "198.51.100.1").await;
    let second = sign_up(addr, "spam2", "198.51.100.1").await;
    assert_eq!(first.status, 201);
    assert_eq!(second.status, 201);
    assert_eq!(first.body["features"], json!(["read:activation_token"]));

    let blocked = sign_up(addr, "spam3", "198.51.100.1").await;
    assert_eq!(blocked.status, 429);
    assert_eq!(blocked.body["name"], "TooManyRequestsError");
    assert_eq!(blocked.body["status_code"], 429);
    assert_eq!(
        blocked.body["error_location_code"],
        "FIREWALL:CREATE_USER:TOO_MANY_REQUESTS"
    );
    assert_eq!(
        blocked.body["request_id"].as_str(),
        blocked.request_id.as_deref()
    );
    assert!(blocked.body["error_id"].is_string());

    let block_id = services
        .db
        .read(|conn| {
            let id: String = conn.query_row(
                "SELECT id FROM events WHERE type = 'firewall:block_users'",
                [],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .unwrap();

    let path = format!("/events/firewall/{}", block_id);
    let missing_actor = send(addr, "GET", &path, &[], None).await;
    assert_eq!(missing_actor.status, 403);

    let incident = send(addr, "GET", &path, &[("X-User-Id", moderator_id.as_str())], None).await;
    assert_eq!(incident.status, 200);
    let users = incident.body["affected"]["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0]["username"], "spam1");
    assert_eq!(users[0]["features"], json!([]));
    assert_eq!(incident.body["events"][0]["type"], "firewall:block_users");
    assert_eq!(
        incident.body["events"][0]["metadata"]["users"],
        json!([first.body["id"], second.body["id"]])
    );

    let review_path = format!("/moderations/review_firewall/{}", block_id);
    let bad_action = send(
        addr,
        "POST",
        &review_path,
        &[("X-User-Id", moderator_id.as_str())],
        Some(json!({ "action": "maybe" })),
    )
    .await;
    assert_eq!(bad_action.status, 400);
    assert_eq!(bad_action.body["key"], "action");

    let reviewed = send(
        addr,
        "POST",
        &review_path,
        &[("X-User-Id", moderator_id.as_str())],
        Some(json!({ "action": "undo" })),
    )
    .await;
    assert_eq!(reviewed.status, 200);
    assert_eq!(reviewed.body["events"][1]["type"], "moderation:unblock_users");
    assert_eq!(
        reviewed.body["affected"]["users"][0]["features"],
        json!(["read:activation_token"])
    );

    let again = send(
        addr,
        "POST",
        &review_path,
        &[("X-User-Id", moderator_id.as_str())],
        Some(json!({ "action": "confirm" })),
    )
    .await;
    assert_eq!(again.status, 400);
    assert_eq!(
        again.body["error_location_code"],
        "MODERATION:REVIEW_FIREWALL:EVENT_ALREADY_REVIEWED"
    );
}

#[tokio::test]
async fn test_content_routes() {
    let (addr, services) = start().await;

    let author = sign_up(addr, "author", "10.0.0.3").await;
    let author_id = author.body["id"].as_str().unwrap().to_string();

    // Inactive users cannot create content
    let denied = send(
        addr,
        "POST",
        "/contents",
        &[("X-User-Id", author_id.as_str())],
        Some(json!({ "title": "Hi", "body": "there", "status": "published" })),
    )
    .await;
    assert_eq!(denied.status, 403);

    services.users.activate(&author_id).unwrap();
    let created = send(
        addr,
        "POST",
        "/contents",
        &[("X-User-Id", author_id.as_str())],
        Some(json!({ "title": "Hi", "body": "there", "status": "published" })),
    )
    .await;
    assert_eq!(created.status, 201);
    assert_eq!(created.body["tabcoins"], 2);
    let content_id = created.body["id"].as_str().unwrap().to_string();

    let empty_patch = send(
        addr,
        "PATCH",
        &format!("/contents/{}", content_id),
        &[("X-User-Id", author_id.as_str())],
        None,
    )
    .await;
    // An empty patch is a no-op update
    assert_eq!(empty_patch.status, 200);

    let deleted = send(
        addr,
        "PATCH",
        &format!("/contents/{}", content_id),
        &[("X-User-Id", author_id.as_str())],
        Some(json!({ "status": "deleted" })),
    )
    .await;
    assert_eq!(deleted.status, 200);
    assert_eq!(deleted.body["status"], "deleted");
    assert!(deleted.body["deleted_at"].is_string());

    let rate_deleted = send(
        addr,
        "POST",
        &format!("/contents/{}/tabcoins", content_id),
        &[("X-User-Id", author_id.as_str())],
        Some(json!({ "transaction_type": "credit" })),
    )
    .await;
    assert_eq!(rate_deleted.status, 404);
}
