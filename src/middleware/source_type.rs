//! Rejects requests that don't say where they come from.

use axum::{body::Body, http::Request, middleware::Next, response::Response};

use crate::api::ApiError;

pub const SOURCE_TYPE_HEADER: &str = "Source-Type";

const SOURCE_TYPES: [&str; 3] = ["game", "server", "payment"];

pub fn is_supported_source_type(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    SOURCE_TYPES.contains(&value.as_str())
}

pub async fn require_source_type(request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let Some(value) = request
        .headers()
        .get(SOURCE_TYPE_HEADER)
        .filter(|v| !v.is_empty())
    else {
        return Err(ApiError::BadRequest(format!(
            "{} header required",
            SOURCE_TYPE_HEADER
        )));
    };
    let supported = value
        .to_str()
        .map(is_supported_source_type)
        .unwrap_or(false);
    if !supported {
        return Err(ApiError::BadRequest(format!(
            "Unsupported {} header",
            SOURCE_TYPE_HEADER
        )));
    }
    Ok(next.run(request).await)
}
