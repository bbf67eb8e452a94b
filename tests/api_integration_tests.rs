//! Integration Tests for API Endpoints
//!
//! Drives the full request/response cycle through the router.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use localcache::{api::create_router, AppState, CacheBuilder, LocalCache};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

// == Helper Functions ==

fn test_cache(expire_delay: Duration) -> LocalCache<String> {
    CacheBuilder::new()
        .capacity(100)
        .expire_delay(expire_delay)
        .sync_set_timeout(Some(Duration::from_secs(1)))
        .sync_delete(true)
        .timer_tick(Duration::from_millis(50))
        .build()
        .unwrap()
}

fn create_test_app() -> Router {
    create_router(AppState::new(test_cache(Duration::ZERO), Duration::from_secs(300)))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri("/set")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// == SET / GET ==

#[tokio::test]
async fn test_set_then_get_roundtrip() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(set_request(r#"{"key":"user:1","value":"alice"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert!(json["message"].as_str().unwrap().contains("user:1"));

    let response = app.oneshot(get_request("/get/user:1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["key"], "user:1");
    assert_eq!(json["value"], "alice");
    assert_eq!(json["status"], "exist");
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let response = create_test_app()
        .oneshot(get_request("/get/missing"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_expired_value_served_with_status() {
    let app = create_router(AppState::new(
        test_cache(Duration::from_secs(5)),
        Duration::from_secs(300),
    ));

    app.clone()
        .oneshot(set_request(r#"{"key":"k","value":"old","ttl":1}"#))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let response = app.oneshot(get_request("/get/k")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["value"], "old");
    assert_eq!(json["status"], "expired");
}

#[tokio::test]
async fn test_ttl_expiration_via_api() {
    let app = create_test_app();

    app.clone()
        .oneshot(set_request(r#"{"key":"short","value":"v","ttl":1}"#))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let response = app.oneshot(get_request("/get/short")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// == DELETE / CLEAR ==

#[tokio::test]
async fn test_delete_endpoint() {
    let app = create_test_app();
    app.clone()
        .oneshot(set_request(r#"{"key":"gone","value":"v"}"#))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/del/gone")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get_request("/get/gone")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clear_endpoint_empties_cache() {
    let app = create_test_app();
    for i in 0..3 {
        let body = format!(r#"{{"key":"k{}","value":"v"}}"#, i);
        app.clone().oneshot(set_request(&body)).await.unwrap();
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/clear")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get_request("/stats")).await.unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["total_entries"], 0);
}

// == STATS / HEALTH ==

#[tokio::test]
async fn test_stats_endpoint() {
    let app = create_test_app();
    app.clone()
        .oneshot(set_request(r#"{"key":"a","value":"1"}"#))
        .await
        .unwrap();
    app.clone().oneshot(get_request("/get/a")).await.unwrap();
    app.clone().oneshot(get_request("/get/b")).await.unwrap();

    let response = app.oneshot(get_request("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["total_entries"], 1);
    assert!((json["hit_rate"].as_f64().unwrap() - 0.5).abs() < 0.001);
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = create_test_app()
        .oneshot(get_request("/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}

// == Validation ==

#[tokio::test]
async fn test_invalid_json_request() {
    let response = create_test_app()
        .oneshot(set_request(r#"{"key":"k""#))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_empty_key_request() {
    let response = create_test_app()
        .oneshot(set_request(r#"{"key":"","value":"v"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_oversized_key_request() {
    let body = format!(r#"{{"key":"{}","value":"v"}}"#, "k".repeat(257));
    let response = create_test_app().oneshot(set_request(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
