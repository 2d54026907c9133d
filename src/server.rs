//! HTTP API
//!
//! JSON in, JSON out. Validation problems are 400 with `{error, field?}`,
//! unknown users are 404, storage faults are 500 with a generic body.

use crate::advisor::Advisor;
use crate::error::AdvisorError;
use crate::types::{ChatRequest, RegisterRequest};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub type AppState = Arc<Advisor>;

pub fn router(advisor: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/predict", post(predict))
        .route("/register", post(register))
        .route("/stats", post(stats_post))
        .route("/stats/:id", get(stats_get))
        .route("/prescription", post(prescription_post))
        .route("/prescription/:id", get(prescription_get))
        .layer(CorsLayer::permissive())
        .with_state(advisor)
}

/// Bind and serve until the process is stopped
pub async fn serve(advisor: AppState, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("sleepwise HTTP server listening on http://{}", addr);
    axum::serve(listener, router(advisor)).await?;
    Ok(())
}

fn error_response(err: AdvisorError) -> Response {
    let status = if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %err, "request failed on storage");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(err.to_body())).into_response()
}

fn bad_json(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("invalid JSON body: {}", rejection.body_text()) })),
    )
        .into_response()
}

fn unknown_user() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "unknown user", "has_data": false })),
    )
        .into_response()
}

/// `user_identifier`, or the legacy `username`
fn identifier_of(body: &Value) -> Option<String> {
    ["user_identifier", "username"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn health(State(advisor): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "config_version": advisor.config().version,
        "model": advisor.predictor().has_model(),
        "topics": advisor.topics(),
    }))
}

async fn chat(State(advisor): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    let Some(message) = body.get("message").and_then(Value::as_str) else {
        return error_response(AdvisorError::MissingMessage);
    };
    let request = ChatRequest {
        message: message.to_string(),
        user_identifier: identifier_of(&body),
    };
    match advisor.chat(request) {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

async fn predict(State(advisor): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    match advisor.predict(&body).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

async fn register(State(advisor): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    let request: RegisterRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(_) => return error_response(AdvisorError::missing("user_identifier")),
    };
    match advisor.register(request) {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

fn stats_for(advisor: &Advisor, identifier: &str) -> Response {
    match advisor.stats(identifier) {
        Ok(Some(outcome)) => Json(outcome).into_response(),
        Ok(None) => unknown_user(),
        Err(e) => error_response(e),
    }
}

async fn stats_post(State(advisor): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    match identifier_of(&body) {
        Some(id) => stats_for(&advisor, &id),
        None => error_response(AdvisorError::missing("user_identifier")),
    }
}

async fn stats_get(State(advisor): State<AppState>, Path(id): Path<String>) -> Response {
    stats_for(&advisor, &id)
}

fn prescription_for(advisor: &Advisor, identifier: &str) -> Response {
    match advisor.prescription(identifier) {
        Ok(Some(outcome)) => Json(outcome).into_response(),
        Ok(None) => unknown_user(),
        Err(e) => error_response(e),
    }
}

async fn prescription_post(State(advisor): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    match identifier_of(&body) {
        Some(id) => prescription_for(&advisor, &id),
        None => error_response(AdvisorError::missing("user_identifier")),
    }
}

async fn prescription_get(State(advisor): State<AppState>, Path(id): Path<String>) -> Response {
    prescription_for(&advisor, &id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvisorConfig;
    use crate::store::MemoryStore;

    fn state() -> AppState {
        Arc::new(
            Advisor::new(AdvisorConfig::default(), Arc::new(MemoryStore::new()))
                .unwrap()
                .with_seed(1),
        )
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_handler() {
        let response = chat(State(state()), Ok(Json(json!({"message": "hi"})))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["topic"], "greeting");
        assert!(body["response"].as_str().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn test_chat_without_message_is_400() {
        let response = chat(State(state()), Ok(Json(json!({"username": "ada"})))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "missing message");
    }

    #[tokio::test]
    async fn test_predict_status_mapping() {
        let state = state();
        let ok = predict(
            State(state.clone()),
            Ok(Json(json!({"features": {
                "sleep_duration": 8, "stress_level": 0.1, "physical_activity": 0.5,
                "screen_time": 0.2, "caffeine_intake": 0.1
            }}))),
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);
        let body = body_json(ok).await;
        assert_eq!(body["sleep_quality"], "good");
        assert_eq!(body["source"], "fallback");
        assert_eq!(body["saved"], false);

        let bad = predict(State(state), Ok(Json(json!({"features": {"sleep_duration": 8}})))).await;
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let body = body_json(bad).await;
        assert_eq!(body["field"], "stress_level");
    }

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let state = state();
        let first = register(
            State(state.clone()),
            Ok(Json(json!({"username": "ada", "email": "ada@example.com"}))),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_json(first).await["created"], true);

        let second = register(State(state), Ok(Json(json!({"user_identifier": "ada"})))).await;
        assert_eq!(second.status(), StatusCode::OK);
        let body = body_json(second).await;
        assert_eq!(body["created"], false);
        assert_eq!(body["message"], "User already exists");
    }

    #[tokio::test]
    async fn test_stats_unknown_and_empty() {
        let state = state();
        let unknown = stats_get(State(state.clone()), Path("ghost".to_string())).await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(unknown).await, json!({"error": "unknown user", "has_data": false}));

        register(State(state.clone()), Ok(Json(json!({"user_identifier": "ada"})))).await;
        let empty = stats_post(State(state.clone()), Ok(Json(json!({"user_identifier": "ada"})))).await;
        assert_eq!(empty.status(), StatusCode::OK);
        assert_eq!(body_json(empty).await, json!({"has_data": false}));

        let missing = stats_post(State(state), Ok(Json(json!({})))).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_prescription_routes() {
        let state = state();
        let unknown = prescription_post(State(state.clone()), Ok(Json(json!({"username": "ghost"})))).await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        register(State(state.clone()), Ok(Json(json!({"user_identifier": "ada"})))).await;
        predict(
            State(state.clone()),
            Ok(Json(json!({"user_identifier": "ada", "features": {
                "sleep_duration": 5, "stress_level": 0.8, "physical_activity": 0.2,
                "screen_time": 0.9, "caffeine_intake": 0.6
            }}))),
        )
        .await;
        let plan = prescription_get(State(state), Path("ada".to_string())).await;
        assert_eq!(plan.status(), StatusCode::OK);
        let body = body_json(plan).await;
        assert_eq!(body["has_data"], true);
        assert_eq!(body["sleep_quality"], "bad");
        assert_eq!(body["follow_up"], "Schedule a follow-up in 2 weeks");
    }

    #[tokio::test]
    async fn test_router_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state())).await.unwrap();
        });
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["topics"].as_array().unwrap().len(), 10);

        let malformed = client
            .post(format!("http://{}/chat", addr))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status().as_u16(), 400);
        let body: Value = malformed.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("invalid JSON body"));
    }
}
