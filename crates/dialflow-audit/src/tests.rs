use crate::*;
use dialflow_types::{CallOutcome, Step};
use rusqlite::Connection;

fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    dialflow_db::run_migrations(&conn).expect("migrations");
    conn
}

#[test]
fn emit_assigns_monotonic_seq_per_domain() {
    let conn = test_conn();

    let first = emit_event(
        &conn,
        "agent-1",
        &AuditPayload::StepChanged {
            agent_id: "agent-1".to_string(),
            from_step: Step::Idle,
            to_step: Step::LeadSelected,
        },
    )
    .expect("emit");
    let second = emit_event(
        &conn,
        "agent-1",
        &AuditPayload::StepChanged {
            agent_id: "agent-1".to_string(),
            from_step: Step::LeadSelected,
            to_step: Step::Dialing,
        },
    )
    .expect("emit");

    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);

    // Sequence numbers are per domain: the first CALL event starts at 1.
    let call_event = emit_event(
        &conn,
        "call-1",
        &AuditPayload::CallFailed {
            call_id: "call-1".to_string(),
            reason: "dial rejected".to_string(),
        },
    )
    .expect("emit");
    assert_eq!(call_event.seq, 1);
    assert_eq!(call_event.domain, "CALL");
}

#[test]
fn payload_round_trips_through_json_column() {
    let conn = test_conn();
    let event = emit_event(
        &conn,
        "call-7",
        &AuditPayload::OutcomeRecorded {
            call_id: "call-7".to_string(),
            lead_id: Some("lead-3".to_string()),
            outcome: CallOutcome::Booked,
            duration_secs: Some(95),
        },
    )
    .expect("emit");

    let parsed: AuditPayload = serde_json::from_str(&event.payload_json).expect("parse payload");
    match parsed {
        AuditPayload::OutcomeRecorded {
            call_id, outcome, ..
        } => {
            assert_eq!(call_id, "call-7");
            assert_eq!(outcome, CallOutcome::Booked);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn query_filters_by_domain_and_entity() {
    let conn = test_conn();
    emit_event(
        &conn,
        "agent-1",
        &AuditPayload::AgentSpawned {
            agent_id: "agent-1".to_string(),
            queued_leads: 4,
        },
    )
    .expect("emit");
    emit_event(
        &conn,
        "call-1",
        &AuditPayload::CallReconciled {
            call_id: "call-1".to_string(),
            reason: "stuck in queued past deadline".to_string(),
        },
    )
    .expect("emit");
    emit_event(
        &conn,
        "5550100001",
        &AuditPayload::DncAdded {
            phone: "5550100001".to_string(),
        },
    )
    .expect("emit");

    let agent_events = query_events(
        &conn,
        &AuditFilter {
            domain: Some(AuditDomain::Agent),
            ..Default::default()
        },
    )
    .expect("query");
    assert_eq!(agent_events.len(), 1);
    assert_eq!(agent_events[0].event_type, "AGENT_SPAWNED");

    let by_entity = query_events(
        &conn,
        &AuditFilter {
            entity_id: Some("call-1".to_string()),
            ..Default::default()
        },
    )
    .expect("query");
    assert_eq!(by_entity.len(), 1);
    assert_eq!(by_entity[0].event_type, "CALL_RECONCILED");

    let all = query_events(&conn, &AuditFilter::default()).expect("query all");
    assert_eq!(all.len(), 3);
}

#[test]
fn domain_labels_round_trip() {
    for domain in [
        AuditDomain::Agent,
        AuditDomain::Call,
        AuditDomain::Scheduler,
        AuditDomain::Compliance,
    ] {
        let parsed: AuditDomain = domain.as_str().parse().expect("parse domain");
        assert_eq!(parsed, domain);
    }
    assert!("BOGUS".parse::<AuditDomain>().is_err());
}
