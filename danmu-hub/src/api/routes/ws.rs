//! Real-time subscription endpoint.
//!
//! `/` receives every message, `/{platform}` one platform and
//! `/{platform}/{room_id}` one room. A text `ping` is answered with `pong`.

use axum::{
    Router,
    extract::{
        Path, State,
        ws::rejection::WebSocketUpgradeRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::error::parse_platform;
use crate::hub::{BroadcastHub, SubscriberFilter};

type Upgrade = Result<WebSocketUpgrade, WebSocketUpgradeRejection>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(subscribe_all))
        .route("/{platform}", get(subscribe_platform))
        .route("/{platform}/{room_id}", get(subscribe_room))
}

async fn subscribe_all(State(state): State<AppState>, ws: Upgrade) -> Response {
    upgrade(state, ws, SubscriberFilter::all())
}

async fn subscribe_platform(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    ws: Upgrade,
) -> ApiResult<Response> {
    let filter = SubscriberFilter::platform(parse_platform(&platform)?);
    Ok(upgrade(state, ws, filter))
}

async fn subscribe_room(
    State(state): State<AppState>,
    Path((platform, room_id)): Path<(String, String)>,
    ws: Upgrade,
) -> ApiResult<Response> {
    let filter = SubscriberFilter::room(parse_platform(&platform)?, room_id.trim());
    Ok(upgrade(state, ws, filter))
}

fn upgrade(state: AppState, ws: Upgrade, filter: SubscriberFilter) -> Response {
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| serve_subscriber(socket, state.hub, filter)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve_subscriber(socket: WebSocket, hub: Arc<BroadcastHub>, filter: SubscriberFilter) {
    let (id, mut messages) = hub.register(filter);
    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<Message>();

    let mut writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(payload) = messages.recv() => Message::Text(payload),
                Some(reply) = replies.recv() => reply,
                else => break,
            };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let reader = async {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) if text.as_str() == "ping" => {
                    let _ = reply_tx.send(Message::Text("pong".into()));
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = &mut writer => {}
        _ = reader => {}
    }
    writer.abort();
    hub.deregister(id);
    debug!(?id, "Subscriber disconnected");
}
