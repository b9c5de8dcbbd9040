//! Observer WebSocket handler.
//!
//! Protocol: the client authenticates with `auth(userId)`, then manages its
//! subscription set with `subscribe(agentId|*)` / `unsubscribe(agentId)`.
//! The server pushes `step-change`, `status`, `call-update`, and `log`
//! events matching the subscription.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Incoming observer messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingObserverMessage {
    #[serde(rename = "auth")]
    Auth {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
}

/// Control acknowledgements sent back to the observer. Hub events are
/// serialized separately and share the same tagged envelope shape.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ControlMessage {
    #[serde(rename = "authed")]
    Authed {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

fn send_control(tx: &mpsc::Sender<String>, message: ControlMessage) {
    match serde_json::to_string(&message) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to send control message to observer: {e}");
            }
        }
        Err(e) => tracing::error!("failed to serialize control message: {e}"),
    }
}

/// WebSocket handler: `GET /ws/events`.
pub async fn events_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded per-observer queue: a slow consumer loses events rather than
    // backing up the publisher.
    let (tx, mut rx) = mpsc::channel::<String>(256);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Identity is established by the auth message; until then the socket
    // receives nothing.
    let mut observer: Option<(String, uuid::Uuid)> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                let incoming = match serde_json::from_str::<IncomingObserverMessage>(&text) {
                    Ok(incoming) => incoming,
                    Err(_) => {
                        tracing::warn!("failed to parse incoming observer message");
                        send_control(
                            &tx,
                            ControlMessage::Error {
                                message: "invalid message format".to_string(),
                            },
                        );
                        continue;
                    }
                };

                match incoming {
                    IncomingObserverMessage::Auth { user_id } => {
                        let session_id =
                            state.hub.add_session(user_id.clone(), tx.clone()).await;
                        tracing::info!(observer_id = %user_id, "observer authenticated");
                        observer = Some((user_id.clone(), session_id));
                        send_control(&tx, ControlMessage::Authed { user_id });
                    }
                    IncomingObserverMessage::Subscribe { agent_id } => {
                        match &observer {
                            Some((observer_id, _)) => {
                                state.hub.subscribe(observer_id, &agent_id).await;
                                send_control(&tx, ControlMessage::Subscribed { agent_id });
                            }
                            None => send_control(
                                &tx,
                                ControlMessage::Error {
                                    message: "auth required before subscribe".to_string(),
                                },
                            ),
                        }
                    }
                    IncomingObserverMessage::Unsubscribe { agent_id } => {
                        match &observer {
                            Some((observer_id, _)) => {
                                state.hub.unsubscribe(observer_id, &agent_id).await;
                                send_control(&tx, ControlMessage::Unsubscribed { agent_id });
                            }
                            None => send_control(
                                &tx,
                                ControlMessage::Error {
                                    message: "auth required before unsubscribe".to_string(),
                                },
                            ),
                        }
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    if let Some((observer_id, session_id)) = observer {
        state.hub.remove_session(&observer_id, session_id).await;
        tracing::debug!(observer_id = %observer_id, "observer disconnected");
    }
    send_task.abort();
}
