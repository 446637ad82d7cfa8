//! API route definitions.

pub mod health;
pub mod image;
pub mod listeners;
pub mod ws;

use axum::Router;
use axum::middleware;

use crate::api::middleware::require_token;
use crate::api::server::AppState;

/// Control API: listener management behind the optional bearer token, plus `/health`.
pub fn create_control_router(state: AppState) -> Router {
    let api = listeners::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));
    Router::new()
        .merge(api)
        .nest("/health", health::router())
        .with_state(state)
}

/// Real-time WebSocket subscriptions.
pub fn create_realtime_router(state: AppState) -> Router {
    ws::router().with_state(state)
}

pub fn create_image_router(state: AppState) -> Router {
    image::router().with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::hub::BroadcastHub;
    use crate::listener::{ListenRequest, ListenerManager, ListenerManagerConfig, RoomListener, StartSignal};
    use crate::proxy::{ImageProxy, ImageProxyConfig};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use danmu_platforms::Platform;
    use danmu_platforms::danmaku::{ConnectionStats, DanmakuError};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct FakeListener;

    #[async_trait]
    impl RoomListener for FakeListener {
        fn check(&self, platform: Platform) -> Result<()> {
            if platform == Platform::Huya {
                return Err(Error::config("huya requires --huya-helper"));
            }
            Ok(())
        }

        async fn listen(&self, request: ListenRequest, started: StartSignal, cancel: CancellationToken) {
            if request.room_id == "404" {
                started.failed(DanmakuError::room_not_found("404"));
                return;
            }
            started.ready(Arc::new(ConnectionStats::default()));
            cancel.cancelled().await;
        }
    }

    fn state() -> AppState {
        let client = danmu_platforms::http::default_client().unwrap();
        let listeners = ListenerManager::new(
            ListenerManagerConfig {
                start_timeout: Duration::from_millis(200),
                stop_timeout: Duration::from_millis(200),
            },
            Arc::new(FakeListener),
        );
        AppState::new(
            Arc::new(listeners),
            Arc::new(BroadcastHub::new()),
            Arc::new(ImageProxy::new(ImageProxyConfig::default(), client)),
        )
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::delete(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_greeting() {
        let router = create_control_router(state());
        for uri in ["/api/v1", "/api/v1/"] {
            let (status, body) = send(&router, get(uri)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["code"], 200);
            assert_eq!(body["data"], "Hello, danmu-hub!");
        }
    }

    #[tokio::test]
    async fn test_listener_lifecycle() {
        let state = state();
        let router = create_control_router(state.clone());

        let (status, body) = send(&router, post("/api/v1/douyu", r#"{"rid": 9999}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["platform"], "douyu");
        assert_eq!(body["data"]["rid"], "9999");
        assert_eq!(body["data"]["state"], "running");

        let (status, _) = send(&router, post("/api/v1/douyu", r#"{"rid": "9999"}"#)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&router, get("/api/v1/douyu/9999")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rid"], "9999");

        let (_, body) = send(&router, get("/api/v1/all")).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        let (_, body) = send(&router, get("/api/v1/bilibili")).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let (status, body) = send(&router, delete("/api/v1/douyu/9999")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "stopped");
        assert!(state.listeners.is_empty());

        let (status, body) = send(&router, delete("/api/v1/douyu/9999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["data"], Value::Null);
        let (status, _) = send(&router, get("/api/v1/douyu/9999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_rejections() {
        let router = create_control_router(state());
        let cases = [
            ("/api/v1/twitch", r#"{"rid": "1"}"#),
            ("/api/v1/douyu", "not json"),
            ("/api/v1/douyu", r#"{"rid": ""}"#),
            ("/api/v1/douyu", r#"{"rid": "abc"}"#),
            ("/api/v1/douyu", r#"{"rid": "404"}"#),
            ("/api/v1/huya", r#"{"rid": "kaerlol"}"#),
        ];
        for (uri, body) in cases {
            let (status, envelope) = send(&router, post(uri, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} {body}");
            assert_eq!(envelope["code"], 400);
        }
    }

    #[tokio::test]
    async fn test_auth_token() {
        let router = create_control_router(state().with_auth_token(Some("secret".to_string())));

        let (status, body) = send(&router, get("/api/v1/all")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);

        let request = Request::get("/api/v1/all")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.0, StatusCode::UNAUTHORIZED);

        let request = Request::get("/api/v1/all")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.0, StatusCode::OK);

        // Health stays open.
        assert_eq!(send(&router, get("/health")).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health() {
        let state = state();
        state.listeners.start(Platform::Bilibili, "1000", None).await.unwrap();
        let router = create_control_router(state);
        let response = router.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["listeners"], 1);
        assert_eq!(value["subscribers"], 0);
    }

    #[tokio::test]
    async fn test_realtime_rejects_unknown_platform() {
        let router = create_realtime_router(state());
        let (status, body) = send(&router, get("/twitch")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
        let (status, _) = send(&router, get("/twitch/1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_image_requires_url() {
        let router = create_image_router(state());
        let (status, body) = send(&router, get("/image")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "missing url parameter");

        let (status, _) = send(&router, get("/image?url=ftp%3A%2F%2Fx%2Fa.png")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
