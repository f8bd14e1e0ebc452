use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    counsel::channel::{FeedEvent, SessionFeed},
    error::{AppError, AppResult, CoreError},
    models::{
        identity::Identity,
        sessions::SessionBlock,
        websocket::{IncomingMessage, WebSocketMessage},
    },
};

#[derive(Deserialize)]
pub struct WsQuery {
    /// Last seq the client has seen; everything after it is replayed.
    pub after: Option<i64>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
) -> AppResult<Response> {
    // Subscribe before upgrading so outsiders get a plain 403.
    let feed = state
        .engine
        .channel
        .subscribe(session_id, identity.user_id, query.after)
        .await
        .map_err(AppError::from)?;

    Ok(ws.on_upgrade(move |socket| handle_websocket(socket, state, identity, session_id, feed)))
}

async fn handle_websocket(
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    session_id: Uuid,
    mut feed: SessionFeed,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WebSocketMessage>();

    let outgoing_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode websocket frame"),
            }
        }
    });

    let feed_tx = tx.clone();
    let feed_task = tokio::spawn(async move {
        while let Some(event) = feed.next().await {
            let frame = match event {
                Ok(FeedEvent::Message(message)) => WebSocketMessage::Message { message },
                Ok(FeedEvent::Read { reader }) => WebSocketMessage::Read { session_id, reader },
                Ok(FeedEvent::State { status }) => WebSocketMessage::SessionState {
                    session_id,
                    status,
                    blocked_reason: SessionBlock::for_status(status),
                },
                Err(e) => error_frame(e),
            };
            if feed_tx.send(frame).is_err() {
                break;
            }
        }
    });

    tracing::debug!(session_id = %session_id, user_id = %identity.user_id, "websocket connected");

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_text_message(&state, &identity, session_id, text.as_str(), &tx).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "websocket receive failed");
                break;
            }
            _ => {}
        }
    }

    // Dropping the feed releases the hub subscription.
    feed_task.abort();
    outgoing_task.abort();
    tracing::debug!(session_id = %session_id, user_id = %identity.user_id, "websocket closed");
}

async fn handle_text_message(
    state: &AppState,
    identity: &Identity,
    session_id: Uuid,
    text: &str,
    tx: &UnboundedSender<WebSocketMessage>,
) {
    let incoming: IncomingMessage = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            let _ = tx.send(WebSocketMessage::Error {
                message: format!("Invalid message format: {}", e),
                code: Some("bad_frame".into()),
            });
            return;
        }
    };

    let result = match incoming {
        IncomingMessage::SendMessage { body, message_type } => state
            .engine
            .channel
            .send(session_id, identity.user_id, identity.role, &body, message_type)
            .await
            .map(|_| ()),
        IncomingMessage::MarkRead => state
            .engine
            .channel
            .mark_read(session_id, identity.user_id)
            .await
            .map(|_| ()),
        IncomingMessage::Ping => {
            let _ = tx.send(WebSocketMessage::Pong);
            Ok(())
        }
    };

    // Successful sends come back through the feed like everyone else's.
    if let Err(e) = result {
        let _ = tx.send(error_frame(e));
    }
}

fn error_frame(e: CoreError) -> WebSocketMessage {
    let message = match &e {
        CoreError::Storage(_) => "Internal error, please retry".to_string(),
        other => other.to_string(),
    };
    let code = AppError::from(e).code().map(str::to_string);
    WebSocketMessage::Error { message, code }
}
