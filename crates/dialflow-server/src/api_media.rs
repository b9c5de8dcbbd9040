//! Real-time audio transport WebSocket handler.
//!
//! Bridges the telephony provider's bidirectional media stream to a
//! [`ConversationEngine`]: `start` resolves call context and boots an
//! engine, each `media` frame is forwarded to the engine, and engine output
//! flows back to the carrier leg as `media` / `clear` messages. On `stop`
//! (or socket close) the engine's end-of-call analysis is persisted to the
//! call row.

use crate::{audit_event, AppState};
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::Engine as _;
use dialflow_audit::AuditPayload;
use dialflow_engine::{ConversationEngine, EngineEvent};
use dialflow_types::{CallStatus, HubEvent};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;

/// Inbound media-stream protocol messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaInbound {
    Start {
        #[serde(rename = "streamId")]
        stream_id: String,
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "customParameters", default)]
        custom_parameters: Option<MediaCustomParameters>,
    },
    Media {
        /// Base64-encoded audio frame.
        payload: String,
    },
    Stop {},
}

/// Optional per-call customization carried on `start`. Any missing field
/// falls back to the engine defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCustomParameters {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
}

/// Outbound media-stream protocol messages.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum MediaOutbound {
    Media { payload: String },
    Clear {},
}

struct MediaSession {
    engine: Arc<ConversationEngine>,
    started_at: Instant,
}

/// Live media sessions keyed by call id.
///
/// Uses `std::sync::RwLock` intentionally: all lock acquisitions are brief
/// HashMap operations that never span `.await` points.
#[derive(Clone, Default)]
pub struct MediaSessionRegistry {
    inner: Arc<RwLock<HashMap<String, MediaSession>>>,
}

impl MediaSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, call_id: &str, session: MediaSession) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.insert(call_id.to_string(), session).is_some() {
            tracing::warn!(call_id, "replacing a live media session");
        }
    }

    fn take(&self, call_id: &str) -> Option<MediaSession> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(call_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// WebSocket handler: `GET /ws/media`.
pub async fn media_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state))
}

/// Resolves the system prompt, greeting, and voice for a call. Customization
/// wins when present; otherwise the call's lead row enriches the default
/// prompt; a missing call row falls all the way back to the defaults.
async fn resolve_call_context(
    state: &Arc<AppState>,
    call_id: &str,
    custom: Option<MediaCustomParameters>,
) -> (String, String, String) {
    let defaults = &state.engine_defaults;
    let custom = custom.unwrap_or_default();

    let lead_line = {
        let pool = state.pool.clone();
        let id = call_id.to_string();
        tokio::task::spawn_blocking(move || -> Option<String> {
            let conn = pool.get().ok()?;
            let call = dialflow_db::get_call(&conn, &id).ok()?;
            let lead = dialflow_db::get_lead(&conn, call.lead_id.as_deref()?).ok()?;
            match lead.company {
                Some(company) => Some(format!(
                    "You are speaking with {} from {company}.",
                    lead.name
                )),
                None => Some(format!("You are speaking with {}.", lead.name)),
            }
        })
        .await
        .ok()
        .flatten()
    };

    let system_prompt = custom.system_prompt.unwrap_or_else(|| match lead_line {
        Some(line) => format!("{} {line}", defaults.system_prompt),
        None => defaults.system_prompt.clone(),
    });
    let greeting = custom.greeting.unwrap_or_else(|| defaults.greeting.clone());
    let voice_id = custom.voice_id.unwrap_or_else(|| defaults.voice_id.clone());

    (system_prompt, greeting, voice_id)
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(256);

    let mut ws_sender = Some(sender);
    let mut engine_events = Some(engine_rx);
    let mut session: Option<(String, Arc<ConversationEngine>)> = None;
    let mut forward_task: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => match serde_json::from_str::<MediaInbound>(&text) {
                Ok(MediaInbound::Start {
                    stream_id,
                    call_id,
                    custom_parameters,
                }) => {
                    if session.is_some() {
                        tracing::warn!(call_id, "duplicate start on media stream, ignoring");
                        continue;
                    }
                    let (system_prompt, greeting, voice_id) =
                        resolve_call_context(&state, &call_id, custom_parameters).await;

                    let mut config = state.engine_defaults.clone();
                    config.system_prompt = system_prompt;
                    config.greeting = greeting;
                    config.voice_id = voice_id;

                    let engine = ConversationEngine::new(
                        config,
                        state.stt.clone(),
                        state.tts.clone(),
                        state.llm.clone(),
                        engine_tx.clone(),
                    );
                    state.media_sessions.insert(
                        &call_id,
                        MediaSession {
                            engine: engine.clone(),
                            started_at: Instant::now(),
                        },
                    );

                    // Engine output flows back to the carrier leg until the
                    // engine itself ends the call.
                    if let (Some(rx), Some(tx)) = (engine_events.take(), ws_sender.take()) {
                        forward_task = Some(spawn_forwarder(
                            state.clone(),
                            call_id.clone(),
                            rx,
                            tx,
                        ));
                    }

                    tracing::info!(call_id, stream_id, "media stream started");
                    if let Err(e) = engine.start().await {
                        tracing::error!(call_id, "engine failed to start: {e}");
                    }
                    session = Some((call_id, engine));
                }
                Ok(MediaInbound::Media { payload }) => match &session {
                    Some((call_id, engine)) => {
                        match base64::engine::general_purpose::STANDARD.decode(&payload) {
                            Ok(frame) => {
                                if let Err(e) = engine.process_audio(&frame).await {
                                    tracing::warn!(call_id, "frame processing failed: {e}");
                                }
                            }
                            Err(_) => {
                                tracing::warn!(call_id, "media frame is not valid base64");
                            }
                        }
                    }
                    None => {
                        tracing::debug!("media frame before start, ignoring");
                    }
                },
                Ok(MediaInbound::Stop {}) => break,
                Err(_) => {
                    tracing::warn!("failed to parse media stream message");
                }
            },
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    if let Some((call_id, _)) = session {
        finalize_media_session(&state, &call_id).await;
    }
    if let Some(task) = forward_task {
        task.abort();
    }
}

/// Forwards engine events to the carrier leg. An engine-initiated end
/// finalizes the session proactively rather than waiting for the carrier to
/// hang up.
fn spawn_forwarder(
    state: Arc<AppState>,
    call_id: String,
    mut rx: mpsc::Receiver<EngineEvent>,
    mut sender: futures_util::stream::SplitSink<WebSocket, AxumMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let outbound = match event {
                EngineEvent::Media(frame) => MediaOutbound::Media {
                    payload: base64::engine::general_purpose::STANDARD.encode(frame),
                },
                EngineEvent::Clear => MediaOutbound::Clear {},
                EngineEvent::Ended(outcome) => {
                    tracing::info!(call_id, outcome = outcome.as_str(), "engine ended the call");
                    finalize_media_session(&state, &call_id).await;
                    let _ = sender.send(AxumMessage::Close(None)).await;
                    break;
                }
            };
            match serde_json::to_string(&outbound) {
                Ok(json) => {
                    if sender.send(AxumMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(call_id, "failed to serialize media message: {e}");
                }
            }
        }
    })
}

/// Stops the engine and persists its end-of-call analysis. Idempotent: the
/// first caller takes the session out of the registry, later calls no-op.
async fn finalize_media_session(state: &Arc<AppState>, call_id: &str) {
    let Some(session) = state.media_sessions.take(call_id) else {
        return;
    };

    let report = session.engine.stop().await;
    let duration_secs = session.started_at.elapsed().as_secs() as u32;
    tracing::info!(
        call_id,
        outcome = report.outcome.as_str(),
        turns = report.user_turns,
        "media session finished"
    );

    let pool = state.pool.clone();
    let id = call_id.to_string();
    let outcome = report.outcome;
    let transcript = (!report.transcript.is_empty()).then(|| report.transcript.clone());
    let summary = report.summary.clone();
    let persisted = tokio::task::spawn_blocking(move || -> Result<bool, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        match dialflow_db::record_call_result(
            &conn,
            &id,
            CallStatus::Completed,
            outcome,
            Some(duration_secs),
            transcript.as_deref(),
            Some(&summary),
            None,
            None,
        ) {
            Ok(()) => Ok(true),
            // A stream for a call this process never created still gets a
            // clean engine teardown.
            Err(dialflow_db::StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.to_string()),
        }
    })
    .await;

    match persisted {
        Ok(Ok(true)) => {
            audit_event(
                state,
                call_id.to_string(),
                AuditPayload::OutcomeRecorded {
                    call_id: call_id.to_string(),
                    lead_id: None,
                    outcome: report.outcome,
                    duration_secs: Some(duration_secs),
                },
            )
            .await;
            let _ = state.events_tx.send(HubEvent::CallUpdate {
                call_id: call_id.to_string(),
                status: CallStatus::Completed,
                duration_secs: Some(duration_secs),
            });
        }
        Ok(Ok(false)) => {
            tracing::warn!(call_id, "media session for unknown call; analysis dropped");
        }
        Ok(Err(e)) => tracing::error!(call_id, "failed to persist call analysis: {e}"),
        Err(e) => tracing::error!(call_id, "persist task failed: {e}"),
    }
}
