//! HTTP response building helpers
//!
//! Every response carries an `X-Request-Id`; errors use the shared
//! [`ErrorBody`](crate::error::ErrorBody) shape whatever their status.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::error::EngineError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
    request_id: Uuid,
) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T, request_id: Uuid) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body, request_id)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T, request_id: Uuid) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body, request_id)
}

/// Convert an EngineError to its HTTP response
pub fn error_response(err: EngineError, request_id: Uuid) -> Response<Full<Bytes>> {
    if let EngineError::Internal(detail) = &err {
        error!(request_id = %request_id, detail = %detail, "Internal error");
    }
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &err.to_body(request_id), request_id)
}

/// 404 for paths no route matches
pub fn route_not_found(request_id: Uuid) -> Response<Full<Bytes>> {
    error_response(
        EngineError::not_found(
            "The requested endpoint does not exist.",
            "Check the method and path of the request.",
            "HTTP:ROUTE:NOT_FOUND",
        ),
        request_id,
    )
}

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(
    result: Result<T, EngineError>,
    request_id: Uuid,
) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value, request_id),
        Err(e) => error_response(e, request_id),
    }
}

/// Wrap a create result into an HTTP response with 201 Created
pub fn from_create_result<T: Serialize>(
    result: Result<T, EngineError>,
    request_id: Uuid,
) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value, request_id),
        Err(e) => error_response(e, request_id),
    }
}
