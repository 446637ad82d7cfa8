//! HTTP surface: control API, real-time WebSocket endpoint and image proxy.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResponse, ApiResult};
pub use server::{ApiServer, AppState, ServerConfig};
