//! HTTP response building helpers
//!
//! Every handler answers with JSON; errors carry `{ "error": message }`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::DispatchError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

fn error_body(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message }))
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::NOT_FOUND, message)
}

pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::BAD_REQUEST, message)
}

pub fn method_not_allowed() -> Response<Full<Bytes>> {
    error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub fn internal_error(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// Convert a DispatchError to an appropriate HTTP response
pub fn error_response(error: DispatchError) -> Response<Full<Bytes>> {
    let (status, message) = match &error {
        DispatchError::NotFound(msg) => (StatusCode::NOT_FOUND, format!("Not found: {}", msg)),
        DispatchError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        DispatchError::Json(e) => (StatusCode::BAD_REQUEST, format!("JSON error: {}", e)),
        DispatchError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        DispatchError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    error_body(status, &message)
}

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, DispatchError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}

/// Wrap a create result into an HTTP response with 201 Created
pub fn from_create_result<T: Serialize>(result: Result<T, DispatchError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value),
        Err(e) => error_response(e),
    }
}
