use reqwest::blocking::{RequestBuilder, Response};
use serde_json::Value;

use crate::error::{ExtractError, ExtractResult};

/// Sends a request, mapping connection failures to a transport error.
/// The status code is left for the caller to inspect.
pub fn send(request: RequestBuilder, operation: &str) -> ExtractResult<Response> {
    request
        .send()
        .map_err(|e| ExtractError::transport(operation, e))
}

/// Fails with a transport error unless the response is a 2xx.
pub fn ensure_success(response: Response, operation: &str) -> ExtractResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ExtractError::status(operation, status, body))
}

pub fn read_json(response: Response, operation: &str) -> ExtractResult<Value> {
    response
        .json::<Value>()
        .map_err(|e| ExtractError::transport(operation, e))
}

/// The common case: send, require success, parse the body as JSON.
pub fn send_json(request: RequestBuilder, operation: &str) -> ExtractResult<Value> {
    let response = ensure_success(send(request, operation)?, operation)?;
    read_json(response, operation)
}

pub fn send_bytes(request: RequestBuilder, operation: &str) -> ExtractResult<Vec<u8>> {
    let response = ensure_success(send(request, operation)?, operation)?;
    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| ExtractError::transport(operation, e))
}

/// Reads a JSON field that providers send either as a string or a number.
pub fn id_string(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pulls the array stored under `field`, treating a missing field as empty.
pub fn items_under(body: &Value, field: &str) -> Vec<Value> {
    match body.get(field) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Reads a continuation value; empty strings mean "no more pages".
pub fn next_marker(body: &Value, field: &str) -> Option<String> {
    match body.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
