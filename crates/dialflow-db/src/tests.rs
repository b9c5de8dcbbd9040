use crate::*;
use dialflow_types::{AgentConfig, AgentStatus, CallDirection, CallOutcome, CallStatus, Step};
use rusqlite::Connection;

fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    run_migrations(&conn).expect("migrations should succeed");
    conn
}

fn seed_lead(conn: &Connection, id: &str, phone: Option<&str>) {
    create_lead(
        conn,
        &Lead {
            id: id.to_string(),
            name: format!("Lead {id}"),
            company: None,
            phone: phone.map(str::to_string),
            status: "new".to_string(),
            created_at: String::new(),
        },
    )
    .expect("create lead");
}

#[test]
fn lead_round_trip_and_batch_order() {
    let conn = test_conn();
    seed_lead(&conn, "l-1", Some("+1 (555) 010-0001"));
    seed_lead(&conn, "l-2", None);
    seed_lead(&conn, "l-3", Some("5550100003"));

    let lead = get_lead(&conn, "l-1").expect("lead exists");
    assert_eq!(lead.phone.as_deref(), Some("+1 (555) 010-0001"));

    // Batch fetch preserves the requested order and skips unknown ids.
    let leads = get_leads(
        &conn,
        &[
            "l-3".to_string(),
            "missing".to_string(),
            "l-1".to_string(),
        ],
    )
    .expect("batch fetch");
    let ids: Vec<_> = leads.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["l-3", "l-1"]);

    assert!(matches!(
        get_lead(&conn, "missing"),
        Err(StoreError::NotFound { entity: "lead", .. })
    ));
}

#[test]
fn call_lifecycle_updates() {
    let conn = test_conn();
    create_call(
        &conn,
        &CreateCallParams {
            id: "call-1".to_string(),
            lead_id: Some("l-1".to_string()),
            agent_id: Some("agent-1".to_string()),
            direction: CallDirection::Outbound,
            status: CallStatus::Queued,
            phone: "5550100001".to_string(),
            scheduled_at: None,
        },
    )
    .expect("create call");

    set_provider_call(&conn, "call-1", "prov-abc", CallStatus::Ringing).expect("set provider");
    let call = get_call(&conn, "call-1").expect("get call");
    assert_eq!(call.provider_call_id.as_deref(), Some("prov-abc"));
    assert_eq!(call.status, CallStatus::Ringing);

    record_call_result(
        &conn,
        "call-1",
        CallStatus::Completed,
        CallOutcome::FollowUp,
        Some(83),
        Some("hello there"),
        Some("warm lead"),
        Some("positive"),
        None,
    )
    .expect("record result");

    let call = get_call(&conn, "call-1").expect("get call");
    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(call.outcome, Some(CallOutcome::FollowUp));
    assert_eq!(call.duration_secs, Some(83));
    assert_eq!(call.transcription.as_deref(), Some("hello there"));

    assert_eq!(
        count_calls_for_agent(&conn, "agent-1").expect("count"),
        1
    );
}

#[test]
fn stuck_queued_query_respects_cutoff() {
    let conn = test_conn();
    // A call created 10 minutes ago, still queued.
    conn.execute(
        "INSERT INTO calls (id, direction, status, phone, created_at, updated_at)
         VALUES ('stale', 'outbound', 'queued', '5550100001',
                 datetime('now', '-10 minutes'), datetime('now', '-10 minutes'))",
        [],
    )
    .expect("insert stale");
    // A fresh queued call.
    create_call(
        &conn,
        &CreateCallParams {
            id: "fresh".to_string(),
            lead_id: None,
            agent_id: None,
            direction: CallDirection::Outbound,
            status: CallStatus::Queued,
            phone: "5550100002".to_string(),
            scheduled_at: None,
        },
    )
    .expect("create fresh");

    let stuck = list_stuck_queued(&conn, 120, 20).expect("stuck query");
    let ids: Vec<_> = stuck.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["stale"], "only the stale call is a candidate");
}

#[test]
fn due_scheduled_query_ignores_future_calls() {
    let conn = test_conn();
    conn.execute(
        "INSERT INTO calls (id, direction, status, phone, scheduled_at)
         VALUES ('due', 'outbound', 'scheduled', '5550100001', datetime('now', '-1 minute')),
                ('future', 'outbound', 'scheduled', '5550100002', datetime('now', '+1 hour'))",
        [],
    )
    .expect("insert scheduled");

    let due = list_due_scheduled(&conn, 20).expect("due query");
    let ids: Vec<_> = due.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["due"]);
}

#[test]
fn agent_snapshot_round_trip() {
    let conn = test_conn();
    let mut record = AgentRecord::new(
        "agent-1".to_string(),
        vec!["l-1".to_string(), "l-2".to_string()],
        AgentConfig::default(),
    );
    save_agent(&conn, &record).expect("save");

    let loaded = get_agent(&conn, "agent-1").expect("load");
    assert_eq!(loaded.status, AgentStatus::Idle);
    assert_eq!(loaded.lead_queue, vec!["l-1", "l-2"]);
    assert!(loaded.completed_leads.is_empty());

    // Simulate one processed lead and re-save.
    record.status = AgentStatus::Running;
    record.current_step = Step::NextLead;
    record.lead_queue.remove(0);
    record.completed_leads.push(dialflow_types::CompletedLead {
        lead_id: "l-1".to_string(),
        outcome: CallOutcome::Booked,
        rate: None,
        timestamp: "2026-01-01 00:00:00".to_string(),
    });
    record.stats.record(CallOutcome::Booked, 120);
    save_agent(&conn, &record).expect("re-save");

    let loaded = get_agent(&conn, "agent-1").expect("reload");
    assert_eq!(loaded.status, AgentStatus::Running);
    assert_eq!(loaded.current_step, Step::NextLead);
    assert_eq!(loaded.lead_queue, vec!["l-2"]);
    assert_eq!(loaded.completed_leads.len(), 1);
    assert_eq!(loaded.stats.total_calls, 1);

    // Queue/log disjointness invariant holds after the update.
    for done in &loaded.completed_leads {
        assert!(!loaded.lead_queue.contains(&done.lead_id));
    }
}

#[test]
fn progress_save_leaves_status_untouched() {
    let conn = test_conn();
    let mut record = AgentRecord::new(
        "agent-2".to_string(),
        vec!["l-1".to_string()],
        AgentConfig::default(),
    );
    save_agent(&conn, &record).expect("save");

    // A pause lands while the loop still holds a running in-memory copy.
    record.status = AgentStatus::Paused;
    save_agent(&conn, &record).expect("pause save");

    let mut loop_copy = record.clone();
    loop_copy.status = AgentStatus::Running;
    loop_copy.current_step = Step::NextLead;
    loop_copy.lead_queue.clear();
    save_agent_progress(&conn, &loop_copy).expect("progress save");

    let loaded = get_agent(&conn, "agent-2").expect("load");
    assert_eq!(loaded.status, AgentStatus::Paused, "status column is owned by pause/stop");
    assert_eq!(loaded.current_step, Step::NextLead);
    assert!(loaded.lead_queue.is_empty());
}

#[test]
fn scheduled_actions_due_and_complete() {
    let conn = test_conn();
    conn.execute(
        "INSERT INTO scheduled_actions (id, kind, agent_id, due_at)
         VALUES ('a-1', 'process-next-lead', 'agent-1', datetime('now', '-5 seconds')),
                ('a-2', 'dial-call', NULL, datetime('now', '+1 hour'))",
        [],
    )
    .expect("insert actions");

    let pending = list_pending_actions(&conn).expect("pending");
    assert_eq!(pending.len(), 2);

    let due = list_due_actions(&conn, 20).expect("due");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, "a-1");

    complete_scheduled_action(&conn, "a-1").expect("complete");
    let due = list_due_actions(&conn, 20).expect("due after complete");
    assert!(due.is_empty());

    // Completing again is a no-op, not an error.
    complete_scheduled_action(&conn, "a-1").expect("idempotent complete");
}

#[test]
fn dnc_membership_and_removal() {
    let conn = test_conn();
    add_dnc_number(&conn, "5550100001", Some("opted out")).expect("add");
    add_dnc_number(&conn, "5550100001", Some("opted out again")).expect("re-add updates");

    assert!(is_dnc_listed(&conn, "5550100001").expect("listed"));
    assert!(!is_dnc_listed(&conn, "5550100002").expect("not listed"));

    let entries = list_dnc_numbers(&conn).expect("list");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason.as_deref(), Some("opted out again"));

    remove_dnc_number(&conn, "5550100001").expect("remove");
    assert!(!is_dnc_listed(&conn, "5550100001").expect("removed"));
}
