//! `POST /event`: parse, validate and hand the event to the ledger.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{Json, Response},
};
use serde_json::{json, Value};

use super::response::{created, ApiError};
use super::routes::AppState;
use crate::amount::Amount;
use crate::models::{EventState, NewEvent};

#[derive(Debug, Default)]
pub struct CreateEventRequest {
    pub state: Option<String>,
    /// Decimal number encoded as a string.
    pub amount: Option<String>,
    pub transaction_id: Option<String>,
}

impl CreateEventRequest {
    /// Pull the string fields out of a JSON body. A field of the wrong JSON type
    /// is reported by name; absent and `null` fields are left for validation.
    pub fn from_json(body: &Value) -> Result<Self, ApiError> {
        let Some(object) = body.as_object() else {
            return Err(ApiError::Validation(vec![type_mismatch("body", body, "object")]));
        };

        let mut errors = Vec::new();
        let mut field = |name: &str| match object.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                errors.push(type_mismatch(name, other, "string"));
                None
            }
        };
        let request = Self {
            state: field("state"),
            amount: field("amount"),
            transaction_id: field("transactionId"),
        };

        if errors.is_empty() {
            Ok(request)
        } else {
            Err(ApiError::Validation(errors))
        }
    }

    /// Field presence, enum and number parsing. Sign/state agreement is checked
    /// again by the ledger itself.
    pub fn validate_to_model(&self) -> Result<NewEvent, ApiError> {
        let mut errors = Vec::new();

        let state = match self.state.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push("State is required".to_string());
                None
            }
            Some(raw) => {
                let parsed = EventState::parse(raw);
                if parsed.is_none() {
                    errors.push("State must be one of [win loss]".to_string());
                }
                parsed
            }
        };

        let amount = match self.amount.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push("Amount is required".to_string());
                None
            }
            Some(raw) => {
                let parsed = Amount::parse(raw);
                if parsed.is_none() {
                    errors.push("Amount is not valid".to_string());
                }
                parsed
            }
        };

        let transaction_id = match self.transaction_id.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push("Transaction ID is required".to_string());
                None
            }
            Some(raw) => Some(raw.to_string()),
        };

        match (state, amount, transaction_id) {
            (Some(state), Some(amount), Some(transaction_id)) if errors.is_empty() => {
                let event = NewEvent::new(state, amount, transaction_id);
                event.validate()?;
                Ok(event)
            }
            _ => Err(ApiError::Validation(errors)),
        }
    }
}

pub async fn process_new_event(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::Validation(vec![e.body_text()]))?;
    let event = CreateEventRequest::from_json(&body)?.validate_to_model()?;

    let stored = state.ledger.create_event(event).await?;

    Ok(created(json!({ "transactionId": stored.transaction_id })))
}

fn type_mismatch(field: &str, value: &Value, required: &str) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("{} has type '{}', but '{}' required", field, kind, required)
}
