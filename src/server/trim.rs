use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::header::{CONTENT_LENGTH, CONTENT_TYPE},
    middleware::Next,
    response::Response,
};
use serde_json::{Map, Value};

use crate::server::ApiError;

const MAX_JSON_BODY: usize = 2 * 1024 * 1024;
const UNTRIMMED_FIELDS: [&str; 2] = ["password", "newPassword"];

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::InternalError(format!(
            "Error deserializing/serializing JSON data: {}",
            error
        ))
    }
}

fn trim_fields(fields: &mut Map<String, Value>) {
    for (key, value) in fields.iter_mut() {
        if UNTRIMMED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if let Value::String(text) = value {
            let trimmed = text.trim();
            if trimmed.len() != text.len() {
                *text = trimmed.to_string();
            }
        }
    }
}

/// Trims the top-level string fields of JSON request bodies, passwords excepted.
pub async fn trim_json_body(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with("application/json"));

    if !is_json {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_JSON_BODY)
        .await
        .map_err(|error| ApiError::BadRequest(format!("Unreadable request body: {}", error)))?;

    let bytes = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(mut fields)) => {
            trim_fields(&mut fields);
            parts.headers.remove(CONTENT_LENGTH);
            serde_json::to_vec(&Value::Object(fields))?.into()
        }
        // anything else is left for the Json extractor to reject
        _ => bytes,
    };

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
