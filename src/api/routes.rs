use axum::{
    http::{header, HeaderName, Method},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use super::events::process_new_event;
use super::response::{ok, ApiError};
use crate::ledger::Ledger;
use crate::middleware::{request_logging, require_source_type};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

/// Create the API router
pub fn create_router(ledger: Arc<Ledger>) -> Router {
    let state = AppState { ledger };

    let events = Router::new()
        .route("/event", post(process_new_event))
        .route_layer(middleware::from_fn(require_source_type));

    Router::new()
        .merge(events)
        .route("/health", get(health_check))
        .fallback(not_found)
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer())
        .with_state(state)
}

async fn health_check() -> Response {
    ok(Value::Null)
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Resource not found".to_string())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::ORIGIN,
            header::AUTHORIZATION,
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            HeaderName::from_static("source-type"),
        ])
        .max_age(Duration::from_secs(12 * 60 * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::storage::{Database, RetryPolicy};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn create_test_app() -> (Router, Arc<Ledger>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::open(temp_file.path().to_str().unwrap(), Duration::from_secs(5)).unwrap();
        let ledger = Arc::new(Ledger::new(db, RetryPolicy::fixed(5, Duration::from_millis(5))));
        (create_router(ledger.clone()), ledger, temp_file)
    }

    fn post_event(body: Value, source_type: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/event")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(st) = source_type {
            builder = builder.header("Source-Type", st);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _ledger, _temp) = create_test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"success": true, "type": "item", "data": {"item": null}})
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (app, _ledger, _temp) = create_test_app();
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["data"]["errors"][0], "Resource not found");
    }

    #[tokio::test]
    async fn test_create_event() {
        let (app, ledger, _temp) = create_test_app();
        let response = app
            .oneshot(post_event(
                json!({"state": "win", "amount": "10.15", "transactionId": "tx-1"}),
                Some("game"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["data"]["item"]["transactionId"], "tx-1");
        assert_eq!(ledger.balance().await.unwrap(), Amount::parse("10.15").unwrap());
    }

    #[tokio::test]
    async fn test_source_type_header_required() {
        let (app, ledger, _temp) = create_test_app();
        let payload = json!({"state": "win", "amount": "1", "transactionId": "tx-1"});

        let response = app
            .clone()
            .oneshot(post_event(payload.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(post_event(payload, Some("casino"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["data"]["errors"][0], "Unsupported Source-Type header");

        assert!(ledger.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_errors_are_422() {
        let (app, _ledger, _temp) = create_test_app();

        let response = app
            .clone()
            .oneshot(post_event(
                json!({"state": "loss", "amount": "5", "transactionId": "tx-1"}),
                Some("server"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .oneshot(post_event(json!({"state": "win"}), Some("server")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["data"]["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_409() {
        let (app, ledger, _temp) = create_test_app();
        let response = app
            .oneshot(post_event(
                json!({"state": "loss", "amount": "-1", "transactionId": "tx-1"}),
                Some("payment"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["data"]["errors"][0], "Balance cannot be negative");
        assert_eq!(ledger.balance().await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_wrong_json_type_names_the_field() {
        let (app, ledger, _temp) = create_test_app();
        let response = app
            .oneshot(post_event(
                json!({"state": "win", "amount": 10, "transactionId": "tx-1"}),
                Some("game"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(
            body["data"]["errors"],
            json!(["amount has type 'number', but 'string' required"])
        );
        assert!(ledger.events().await.unwrap().is_empty());
    }
}
