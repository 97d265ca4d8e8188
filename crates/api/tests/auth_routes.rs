//! Integration tests for the HTTP surface: authentication and authorization
//! behavior of the real router with the full middleware stack.
//!
//! Uses a lazy pool, so no database is required -- every request here is
//! rejected before a query runs.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use shopline_api::auth::jwt::{generate_access_token, JwtConfig};
use shopline_api::config::ServerConfig;
use shopline_api::router::build_app_router;
use shopline_api::state::AppState;
use shopline_api::ws::PresenceRouter;
use shopline_notify::calendar::{BusinessCalendar, CalendarConfig};
use shopline_notify::dispatch::{DispatchContext, Dispatcher};
use shopline_notify::holidays::StaticHolidayProvider;
use shopline_notify::presence::NoRealtime;
use shopline_notify::registry::EventRegistry;
use shopline_notify::{Aggregator, EventBus};

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".into()],
        request_timeout_secs: 5,
        replay_limit: 20,
        jwt: JwtConfig {
            secret: "integration-test-secret-long-enough".into(),
            access_token_expiry_mins: 60,
        },
    }
}

fn test_app(config: &ServerConfig) -> axum::Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/shopline_test")
        .expect("lazy pool");

    let aggregator = Arc::new(Aggregator::default());
    let calendar = Arc::new(BusinessCalendar::new(
        CalendarConfig::default(),
        Arc::new(StaticHolidayProvider::empty()),
    ));
    let dispatcher = Arc::new(Dispatcher::new(DispatchContext {
        pool: pool.clone(),
        registry: EventRegistry::defaults(),
        calendar,
        aggregator: Arc::clone(&aggregator),
        realtime: Arc::new(NoRealtime),
    }));
    let presence = Arc::new(PresenceRouter::new(pool.clone(), config.replay_limit));

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        presence,
        event_bus: Arc::new(EventBus::default()),
        dispatcher,
        aggregator,
    };
    build_app_router(state, config)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let config = test_config();
    let app = test_app(&config);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/notifications")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_authorization_header_is_unauthorized() {
    let config = test_config();
    let app = test_app(&config);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/notifications/unread-count")
                .header("authorization", "Token abc123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_signed_with_other_secret_is_rejected() {
    let config = test_config();
    let app = test_app(&config);

    let other = JwtConfig {
        secret: "a-completely-different-secret".into(),
        access_token_expiry_mins: 60,
    };
    let token = generate_access_token(1, "operator", &other).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/notifications/unread-count")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_reject_non_admin_roles() {
    let config = test_config();
    let app = test_app(&config);

    let token = generate_access_token(5, "operator", &config.jwt).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/aggregations/flush")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn admin_presence_snapshot_works_without_db() {
    let config = test_config();
    let app = test_app(&config);

    let token = generate_access_token(1, "admin", &config.jwt).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/presence")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["devices"], 0);
    assert_eq!(body["pending_aggregations"], 0);
    assert_eq!(body["online_users"], serde_json::json!([]));
}

#[tokio::test]
async fn websocket_upgrade_without_token_is_unauthorized() {
    let config = test_config();
    let app = test_app(&config);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/ws")
                .header("connection", "upgrade")
                .header("upgrade", "websocket")
                .header("sec-websocket-version", "13")
                .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn preference_update_rejects_unknown_channel() {
    let config = test_config();
    let app = test_app(&config);

    let token = generate_access_token(5, "operator", &config.jwt).unwrap();

    // The channel vocabulary check runs before any query, so the lazy pool
    // never connects.
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/notifications/preferences/task/task.created")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"channels": ["in_app", "fax"]}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["error"].as_str().unwrap().contains("fax"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let config = test_config();
    let app = test_app(&config);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/invoices")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
