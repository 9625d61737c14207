//! Response envelope shared by every endpoint.
//!
//! Success: `{"success":true,"type":"item","data":{"item":...}}`
//! Failure: `{"success":false,"type":"request_error","data":{"errors":[...]}}`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::LedgerError;

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Value,
}

impl ApiResponse {
    pub fn item(item: Value) -> Self {
        Self {
            success: true,
            kind: "item",
            data: json!({ "item": item }),
        }
    }

    pub fn errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            kind: "request_error",
            data: json!({ "errors": errors }),
        }
    }
}

pub fn ok(item: Value) -> Response {
    (StatusCode::OK, Json(ApiResponse::item(item))).into_response()
}

pub fn created(item: Value) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::item(item))).into_response()
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// Field-level problems; reported as a list.
    Validation(Vec<String>),
    InsufficientBalance,
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => ApiError::Validation(vec![msg]),
            e if e.is_insufficient_balance() => ApiError::InsufficientBalance,
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, errors) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, vec![msg]),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, vec![msg]),
            ApiError::Validation(fields) => (StatusCode::UNPROCESSABLE_ENTITY, fields),
            ApiError::InsufficientBalance => (
                StatusCode::CONFLICT,
                vec!["Balance cannot be negative".to_string()],
            ),
            ApiError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    vec!["Server error".to_string()],
                )
            }
        };

        (status, Json(ApiResponse::errors(errors))).into_response()
    }
}
