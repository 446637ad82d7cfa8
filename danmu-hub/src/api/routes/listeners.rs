//! Listener control routes.
//!
//! | Method | Path | Action |
//! |--------|------|--------|
//! | GET | `/api/v1/` | greeting |
//! | GET | `/api/v1/all` | every listener |
//! | GET | `/api/v1/{platform}` | listeners of one platform |
//! | GET | `/api/v1/{platform}/{room_id}` | one listener |
//! | POST | `/api/v1/{platform}` | start a listener |
//! | DELETE | `/api/v1/{platform}/{room_id}` | stop a listener |

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::get,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::api::error::{ApiError, ApiResponse, ApiResult};
use crate::api::server::AppState;
use crate::error::parse_platform;
use crate::listener::ListenerStatus;

/// Body of a start request. `rid` may be sent as a string or a number.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default, deserialize_with = "string_or_number")]
    pub rid: String,
    #[serde(default)]
    pub cookie: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StoppedListener {
    pub platform: String,
    pub rid: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Rid {
        Text(String),
        Number(u64),
    }
    Ok(match Rid::deserialize(deserializer)? {
        Rid::Text(s) => s,
        Rid::Number(n) => n.to_string(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1", get(greeting))
        .route("/api/v1/", get(greeting))
        .route("/api/v1/all", get(list_all))
        .route(
            "/api/v1/{platform}",
            get(list_platform).post(start_listener),
        )
        .route(
            "/api/v1/{platform}/{room_id}",
            get(get_listener).delete(stop_listener),
        )
}

async fn greeting() -> ApiResponse<&'static str> {
    ApiResponse::ok("Hello, danmu-hub!")
}

async fn list_all(State(state): State<AppState>) -> ApiResponse<Vec<ListenerStatus>> {
    ApiResponse::ok(state.listeners.list())
}

async fn list_platform(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> ApiResult<ApiResponse<Vec<ListenerStatus>>> {
    let platform = parse_platform(&platform)?;
    Ok(ApiResponse::ok(state.listeners.list_platform(platform)))
}

async fn get_listener(
    State(state): State<AppState>,
    Path((platform, room_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<ListenerStatus>> {
    let platform = parse_platform(&platform)?;
    state
        .listeners
        .get(platform, &room_id)
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError::not_found("not found"))
}

async fn start_listener(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<ListenerStatus>> {
    let platform = parse_platform(&platform)?;
    let Json(request) =
        body.map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e.body_text())))?;
    if request.rid.trim().is_empty() {
        return Err(ApiError::bad_request("rid must not be empty"));
    }

    let status = state
        .listeners
        .start(platform, &request.rid, request.cookie)
        .await?;
    Ok(ApiResponse::created(status))
}

async fn stop_listener(
    State(state): State<AppState>,
    Path((platform, room_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<StoppedListener>> {
    let platform = parse_platform(&platform)?;
    if !state.listeners.stop(platform, &room_id).await {
        return Err(ApiError::not_found("not found"));
    }
    Ok(ApiResponse::with_status(
        axum::http::StatusCode::OK,
        "stopped",
        StoppedListener {
            platform: platform.to_string(),
            rid: room_id.trim().to_string(),
        },
    ))
}
