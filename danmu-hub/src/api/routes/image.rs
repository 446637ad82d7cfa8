//! Image proxy route.

use axum::{
    Router,
    extract::{Query, State},
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/image", get(proxy_image))
}

async fn proxy_image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> ApiResult<Response> {
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing url parameter"))?;
    let image = state.proxy.get(&url).await?;
    Ok((
        [
            (CONTENT_TYPE, image.content_type),
            (CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        image.data,
    )
        .into_response())
}
