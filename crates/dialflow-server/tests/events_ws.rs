mod common;

use common::{seed_lead, serve, test_app};
use dialflow_adapters::ProviderCallStatus;
use dialflow_types::{AgentStats, AgentStatus, CallStatus, HubEvent};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("message in time")
            .expect("stream open")
            .expect("frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

#[tokio::test]
async fn observer_receives_subscribed_agent_events() {
    let (app, router) = test_app();
    seed_lead(&app.pool, "l-1", Some("5550100001"));
    app.telephony.script_statuses(
        "5550100001",
        vec![
            ProviderCallStatus {
                status: CallStatus::InProgress,
                duration_secs: None,
                recording_url: None,
                transcript: None,
            },
            dialflow_adapters::mock::completed_status(30),
        ],
    );
    let addr = serve(router).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/events"))
        .await
        .expect("connect");

    send_json(&mut ws, json!({ "type": "auth", "userId": "observer-1" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "authed");

    send_json(&mut ws, json!({ "type": "subscribe", "agentId": "*" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "subscribed");

    let agent = app
        .orchestrator
        .spawn_agent(
            vec!["l-1".to_string()],
            dialflow_types::AgentConfig {
                delay_between_calls_ms: 20,
                ..Default::default()
            },
        )
        .await
        .expect("spawn");
    app.orchestrator.start_agent(&agent.id).await.expect("start");

    // Collect until the agent reports completed.
    let mut saw_step_change = false;
    let mut saw_call_update = false;
    let mut saw_log = false;
    loop {
        let event = recv_json(&mut ws).await;
        match event["type"].as_str() {
            Some("step-change") => {
                assert_eq!(event["agentId"], agent.id.as_str());
                assert!(event["fromStep"].is_string());
                assert!(event["toStep"].is_string());
                saw_step_change = true;
            }
            Some("call-update") => {
                assert!(event["callId"].is_string());
                saw_call_update = true;
            }
            Some("log") => {
                assert!(event["message"].is_string());
                saw_log = true;
            }
            Some("status") => {
                if event["status"] == "completed" {
                    assert_eq!(event["agentId"], agent.id.as_str());
                    break;
                }
            }
            _ => {}
        }
    }
    assert!(saw_step_change, "step transitions reach observers");
    assert!(saw_call_update, "call updates reach observers");
    assert!(saw_log, "log lines reach observers");
}

#[tokio::test]
async fn subscription_filter_drops_other_agents() {
    let (app, router) = test_app();
    let addr = serve(router).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/events"))
        .await
        .expect("connect");
    send_json(&mut ws, json!({ "type": "auth", "userId": "observer-2" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "authed");
    send_json(&mut ws, json!({ "type": "subscribe", "agentId": "agent-a" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "subscribed");

    // An event for another agent is filtered; an agentless call update and a
    // matching agent event are delivered, in publish order.
    let _ = app.state.events_tx.send(HubEvent::Status {
        agent_id: "agent-b".to_string(),
        status: AgentStatus::Running,
        stats: AgentStats::default(),
    });
    let _ = app.state.events_tx.send(HubEvent::CallUpdate {
        call_id: "call-9".to_string(),
        status: CallStatus::Ringing,
        duration_secs: None,
    });
    let _ = app.state.events_tx.send(HubEvent::Status {
        agent_id: "agent-a".to_string(),
        status: AgentStatus::Running,
        stats: AgentStats::default(),
    });

    let first = recv_json(&mut ws).await;
    assert_eq!(first["type"], "call-update");
    assert_eq!(first["callId"], "call-9");

    let second = recv_json(&mut ws).await;
    assert_eq!(second["type"], "status");
    assert_eq!(second["agentId"], "agent-a");
}

#[tokio::test]
async fn subscribe_requires_auth_first() {
    let (_app, router) = test_app();
    let addr = serve(router).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/events"))
        .await
        .expect("connect");
    send_json(&mut ws, json!({ "type": "subscribe", "agentId": "*" })).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().expect("message").contains("auth"));
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (app, router) = test_app();
    let addr = serve(router).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/events"))
        .await
        .expect("connect");
    send_json(&mut ws, json!({ "type": "auth", "userId": "observer-3" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "authed");
    send_json(&mut ws, json!({ "type": "subscribe", "agentId": "agent-a" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "subscribed");
    send_json(&mut ws, json!({ "type": "unsubscribe", "agentId": "agent-a" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "unsubscribed");

    let _ = app.state.events_tx.send(HubEvent::Status {
        agent_id: "agent-a".to_string(),
        status: AgentStatus::Running,
        stats: AgentStats::default(),
    });
    // A later agentless event arrives first only if the filtered one was
    // actually dropped.
    let _ = app.state.events_tx.send(HubEvent::CallUpdate {
        call_id: "call-after".to_string(),
        status: CallStatus::Ringing,
        duration_secs: None,
    });

    let next = recv_json(&mut ws).await;
    assert_eq!(next["type"], "call-update");
    assert_eq!(next["callId"], "call-after");
}
