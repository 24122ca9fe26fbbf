//! HTTP API for the firewall, moderation and content engine
//!
//! ## Endpoints
//! - `GET /health` - liveness and table counts
//! - `POST /users` - sign up (`create:user` rule, scoped by source address)
//! - `POST /contents` - create content (`create:content:*` rules)
//! - `PATCH /contents/{id}` - edit, publish or delete content
//! - `POST /contents/{id}/tabcoins` - rate content (`{"transaction_type": "credit"|"debit"}`)
//! - `GET /events/firewall/{id}` - firewall incident containing an event
//! - `POST /moderations/review_firewall/{id}` - `{"action": "confirm"|"undo"}`
//!
//! Authentication happens upstream: the acting user arrives in `X-User-Id`.
//! The source address is the first `X-Forwarded-For` entry, else the peer.
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -H "Content-Type: application/json" \
//!      -d '{"username":"alice","email":"alice@example.com"}' \
//!      http://localhost:8095/users
//!
//! curl -H "X-User-Id: $MODERATOR" http://localhost:8095/events/firewall/$EVENT_ID
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::services::content_service::RateContentInput;
use crate::services::response::{error_response, from_create_result, from_result, ok, route_not_found};
use crate::services::{CreateContentInput, CreateUserInput, Services, UpdateContentInput};

pub const USER_ID_HEADER: &str = "x-user-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Debug, Deserialize)]
struct ReviewInput {
    action: String,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self { services, bind_addr }
    }

    /// Bind the configured address and serve forever
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(self
            .dispatch(parts.method, parts.uri.path(), &parts.headers, body, remote_addr)
            .await)
    }

    /// Route one request; separated from the connection loop for tests
    pub async fn dispatch(
        &self,
        method: Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let request_id = Uuid::new_v4();
        debug!(method = %method, path = %path, request_id = %request_id, "Incoming request");

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let actor = header_str(headers, USER_ID_HEADER).map(str::to_string);
        let services = self.services.clone();

        match (method, segments.as_slice()) {
            (Method::GET, ["health"]) => {
                let stats = blocking(move || services.db.stats()).await;
                match stats {
                    Ok(stats) => ok(&serde_json::json!({ "status": "ok", "stats": stats }), request_id),
                    Err(e) => error_response(e, request_id),
                }
            }

            (Method::POST, ["users"]) => {
                let source_ip = source_ip(headers, remote_addr);
                let result = match parse_body::<CreateUserInput>(&body) {
                    Ok(input) => blocking(move || services.users.create(input, &source_ip)).await,
                    Err(e) => Err(e),
                };
                from_create_result(result, request_id)
            }

            (Method::POST, ["contents"]) => {
                let result = match (require_actor(actor), parse_body::<CreateContentInput>(&body)) {
                    (Ok(actor), Ok(input)) => {
                        blocking(move || services.contents.create(&actor, input)).await
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                from_create_result(result, request_id)
            }

            (Method::PATCH, ["contents", id]) => {
                let id = id.to_string();
                let result = match (require_actor(actor), parse_body::<UpdateContentInput>(&body)) {
                    (Ok(actor), Ok(patch)) => {
                        blocking(move || services.contents.update(&actor, &id, patch)).await
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                from_result(result, request_id)
            }

            (Method::POST, ["contents", id, "tabcoins"]) => {
                let id = id.to_string();
                let result = match (require_actor(actor), parse_body::<RateContentInput>(&body)) {
                    (Ok(actor), Ok(input)) => {
                        blocking(move || services.contents.rate(&actor, &id, input.transaction_type))
                            .await
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                from_create_result(result, request_id)
            }

            (Method::GET, ["events", "firewall", id]) => {
                let id = id.to_string();
                let result = match require_actor(actor) {
                    Ok(actor) => {
                        blocking(move || services.moderation.get_incident(&actor, &id)).await
                    }
                    Err(e) => Err(e),
                };
                from_result(result, request_id)
            }

            (Method::POST, ["moderations", "review_firewall", id]) => {
                let id = id.to_string();
                let result = match (require_actor(actor), parse_body::<ReviewInput>(&body)) {
                    (Ok(actor), Ok(input)) => {
                        blocking(move || services.moderation.review(&actor, &id, &input.action)).await
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                from_result(result, request_id)
            }

            _ => route_not_found(request_id),
        }
    }
}

/// Run a synchronous service call off the async workers
async fn blocking<T, F>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Internal(format!("Worker task failed: {}", e)))?
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn source_ip(headers: &HeaderMap, remote_addr: SocketAddr) -> String {
    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| remote_addr.ip().to_string())
}

fn require_actor(actor: Option<String>) -> Result<String, EngineError> {
    actor.ok_or_else(|| {
        EngineError::forbidden(
            "This action requires a signed-in user.",
            "Sign in before retrying.",
            "AUTHORIZATION:ACTOR:MISSING",
        )
    })
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, EngineError> {
    let raw: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(raw).map_err(|e| {
        EngineError::validation(
            format!("The request body is invalid: {}.", e),
            "Send a JSON object with the documented fields.",
            "HTTP:BODY:INVALID",
        )
    })
}
