mod common;

use base64::Engine as _;
use common::{seed_lead, serve, test_app, wait_until};
use dialflow_audit::{AuditDomain, AuditFilter};
use dialflow_types::{CallOutcome, CallStatus};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const VOICED_FRAME: [u8; 160] = [0x10; 160];

fn seed_call(pool: &dialflow_db::DbPool, call_id: &str, lead_id: &str) {
    let conn = pool.get().expect("conn");
    conn.execute(
        "INSERT INTO calls (id, lead_id, direction, status, phone, provider_call_id)
         VALUES (?1, ?2, 'outbound', 'in-progress', '5550100001', 'prov-1')",
        [call_id, lead_id],
    )
    .expect("insert call");
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

async fn send_voiced_frames(ws: &mut WsStream, count: usize) {
    let payload = base64::engine::general_purpose::STANDARD.encode(VOICED_FRAME);
    for _ in 0..count {
        send_json(ws, json!({ "event": "media", "payload": payload })).await;
    }
}

/// Reads frames until the deadline, returning the parsed text frames seen
/// and whether the server closed the stream.
async fn drain_frames(ws: &mut WsStream, window: Duration) -> (Vec<Value>, bool) {
    let mut frames = Vec::new();
    let mut closed = false;
    loop {
        match timeout(window, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                frames.push(serde_json::from_str(&text).expect("json frame"));
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                closed = true;
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) => {
                closed = true;
                break;
            }
            Err(_) => break,
        }
    }
    (frames, closed)
}

#[tokio::test]
async fn media_session_runs_a_turn_and_persists_analysis() {
    let (app, router) = test_app();
    seed_lead(&app.pool, "l-1", Some("5550100001"));
    seed_call(&app.pool, "call-1", "l-1");
    app.stt.script_utterance("how much does it cost");
    app.llm.script_reply("It starts at ninety-nine a month.");

    let addr = serve(router).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/media"))
        .await
        .expect("connect");

    send_json(
        &mut ws,
        json!({ "event": "start", "streamId": "stream-1", "callId": "call-1" }),
    )
    .await;

    // The greeting is synthesized and streamed down as media frames.
    let (frames, _) = drain_frames(&mut ws, Duration::from_millis(300)).await;
    assert!(
        frames.iter().any(|f| f["event"] == "media"),
        "greeting audio reaches the carrier leg"
    );

    // Caller speaks, then goes quiet; the engine transcribes and replies.
    send_voiced_frames(&mut ws, 4).await;
    let llm = app.llm.clone();
    wait_until(move || !llm.request_history_lens().is_empty()).await;
    let (frames, _) = drain_frames(&mut ws, Duration::from_millis(300)).await;
    assert!(
        frames.iter().any(|f| f["event"] == "media"),
        "reply audio reaches the carrier leg"
    );

    // The lead context from the call row reached the system prompt.
    let tts = app.tts.clone();
    assert_eq!(tts.synthesized().len(), 2, "greeting plus one reply");

    send_json(&mut ws, json!({ "event": "stop" })).await;

    let pool = app.pool.clone();
    wait_until(move || {
        let conn = pool.get().expect("conn");
        dialflow_db::get_call(&conn, "call-1")
            .map(|c| c.status == CallStatus::Completed)
            .unwrap_or(false)
    })
    .await;

    let conn = app.pool.get().expect("conn");
    let call = dialflow_db::get_call(&conn, "call-1").expect("call");
    assert_eq!(call.outcome, Some(CallOutcome::FollowUp), "pricing signal detected");
    assert!(call
        .transcription
        .as_deref()
        .expect("transcription persisted")
        .contains("how much does it cost"));
    assert!(call.summary.is_some());

    let recorded = dialflow_audit::query_events(
        &conn,
        &AuditFilter {
            domain: Some(AuditDomain::Call),
            event_type: Some("OUTCOME_RECORDED".to_string()),
            ..Default::default()
        },
    )
    .expect("audit query");
    assert_eq!(recorded.len(), 1);

    assert!(app.state.media_sessions.is_empty(), "session torn down");
}

#[tokio::test]
async fn opt_out_ends_the_stream_from_the_engine_side() {
    let (app, router) = test_app();
    seed_lead(&app.pool, "l-1", Some("5550100001"));
    seed_call(&app.pool, "call-2", "l-1");
    app.stt.script_utterance("please take me off your list");

    let addr = serve(router).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/media"))
        .await
        .expect("connect");

    send_json(
        &mut ws,
        json!({ "event": "start", "streamId": "stream-2", "callId": "call-2" }),
    )
    .await;
    let _ = drain_frames(&mut ws, Duration::from_millis(300)).await;

    send_voiced_frames(&mut ws, 4).await;

    // The engine speaks a closing line, waits out the grace period, then
    // ends the call itself; the server closes the stream.
    let (_, closed) = drain_frames(&mut ws, Duration::from_secs(2)).await;
    assert!(closed, "server closes the stream after the engine ends the call");

    let pool = app.pool.clone();
    wait_until(move || {
        let conn = pool.get().expect("conn");
        dialflow_db::get_call(&conn, "call-2")
            .map(|c| c.outcome == Some(CallOutcome::NotInterested))
            .unwrap_or(false)
    })
    .await;
    assert!(app.state.media_sessions.is_empty());
}

#[tokio::test]
async fn media_before_start_is_tolerated() {
    let (app, router) = test_app();
    seed_lead(&app.pool, "l-1", Some("5550100001"));
    seed_call(&app.pool, "call-3", "l-1");

    let addr = serve(router).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/media"))
        .await
        .expect("connect");

    // Out-of-order media is ignored, and a start without customization
    // falls back to the default prompt and greeting.
    send_voiced_frames(&mut ws, 2).await;
    send_json(
        &mut ws,
        json!({ "event": "start", "streamId": "stream-3", "callId": "call-3" }),
    )
    .await;

    let (frames, _) = drain_frames(&mut ws, Duration::from_millis(300)).await;
    assert!(frames.iter().any(|f| f["event"] == "media"));

    let tts = app.tts.clone();
    let synthesized = tts.synthesized();
    assert_eq!(synthesized.len(), 1);
    assert!(
        synthesized[0].0.contains("quick minute"),
        "default greeting used when no customization arrives"
    );

    send_json(&mut ws, json!({ "event": "stop" })).await;
    let state = app.state.clone();
    wait_until(move || state.media_sessions.is_empty()).await;
}

#[tokio::test]
async fn custom_parameters_override_prompt_and_greeting() {
    let (app, router) = test_app();
    seed_lead(&app.pool, "l-1", Some("5550100001"));
    seed_call(&app.pool, "call-4", "l-1");

    let addr = serve(router).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/media"))
        .await
        .expect("connect");

    send_json(
        &mut ws,
        json!({
            "event": "start",
            "streamId": "stream-4",
            "callId": "call-4",
            "customParameters": {
                "greeting": "Hello from the scheduling desk!",
                "voiceId": "voice-b"
            }
        }),
    )
    .await;
    let _ = drain_frames(&mut ws, Duration::from_millis(300)).await;

    let synthesized = app.tts.synthesized();
    assert_eq!(synthesized.len(), 1);
    assert_eq!(synthesized[0].0, "Hello from the scheduling desk!");
    assert_eq!(synthesized[0].1, "voice-b");

    send_json(&mut ws, json!({ "event": "stop" })).await;
    let state = app.state.clone();
    wait_until(move || state.media_sessions.is_empty()).await;
}
