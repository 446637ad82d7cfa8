//! HTTP server setup.
//!
//! The process runs up to three listeners sharing one [`AppState`]: the control
//! API, the real-time WebSocket endpoint and the optional image proxy.

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, warn};

use crate::api::routes;
use crate::error::{Error, Result};
use crate::hub::BroadcastHub;
use crate::listener::ListenerManager;
use crate::proxy::ImageProxy;

/// Bind address of one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address {}:{}: {e}", self.bind_address, self.port)))
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub listeners: Arc<ListenerManager>,
    pub hub: Arc<BroadcastHub>,
    pub proxy: Arc<ImageProxy>,
    /// Bearer token required on `/api/v1` when set
    pub auth_token: Option<Arc<str>>,
    /// CORS allow-list, `*` allows any origin
    pub allowed_origins: Arc<[String]>,
}

impl AppState {
    pub fn new(
        listeners: Arc<ListenerManager>,
        hub: Arc<BroadcastHub>,
        proxy: Arc<ImageProxy>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            listeners,
            hub,
            proxy,
            auth_token: None,
            allowed_origins: Arc::from(vec!["*".to_string()]),
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.trim().is_empty()).map(Arc::from);
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Arc::from(origins);
        self
    }
}

/// Build the CORS layer for an origin allow-list.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<&str> = origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .collect();
    let allow_origin = if origins.is_empty() || origins.contains(&"*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

/// Request tracing, skipping health probes.
fn with_tracing(router: Router) -> Router {
    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path().starts_with("/health") {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                ),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// One HTTP listener.
pub struct ApiServer {
    name: &'static str,
    config: ServerConfig,
    router: Router,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// The control API.
    pub fn control(config: ServerConfig, state: AppState) -> Self {
        let cors = cors_layer(&state.allowed_origins);
        let router = with_tracing(routes::create_control_router(state).layer(cors));
        Self::new("API", config, router)
    }

    /// The real-time subscription endpoint.
    pub fn realtime(config: ServerConfig, state: AppState) -> Self {
        let router = with_tracing(routes::create_realtime_router(state));
        Self::new("WebSocket", config, router)
    }

    /// The image proxy.
    pub fn image_proxy(config: ServerConfig, state: AppState) -> Self {
        let cors = cors_layer(&state.allowed_origins);
        let router = with_tracing(routes::create_image_router(state).layer(cors));
        Self::new("Image proxy", config, router)
    }

    fn new(name: &'static str, config: ServerConfig, router: Router) -> Self {
        Self {
            name,
            config,
            router,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Stop the server when `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Start the server.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("{} server listening on http://{}", self.name, addr);

        let name = self.name;
        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("{} server shutting down...", name);
            })
            .await?;
        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr() {
        assert_eq!(
            ServerConfig::new("127.0.0.1", 7777).socket_addr().unwrap(),
            "127.0.0.1:7777".parse::<SocketAddr>().unwrap()
        );
        assert!(matches!(
            ServerConfig::new("not an ip", 1).socket_addr(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_cors_layer_accepts_lists() {
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&[]);
        let _ = cors_layer(&["https://a.example".to_string(), "bad\nvalue".to_string()]);
    }
}
