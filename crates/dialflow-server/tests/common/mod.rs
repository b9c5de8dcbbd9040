#![allow(dead_code)]

use axum::Router;
use dialflow_adapters::mock::{
    MockLanguageModel, MockSpeechToText, MockTelephony, MockTextToSpeech,
};
use dialflow_compliance::DncCache;
use dialflow_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings, Lead};
use dialflow_engine::EngineConfig;
use dialflow_orchestrator::{AgentRegistry, Orchestrator, OrchestratorConfig};
use dialflow_server::{api_media::MediaSessionRegistry, app, hub::ObserverHub, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

pub struct TestApp {
    pub state: AppState,
    pub pool: DbPool,
    pub telephony: Arc<MockTelephony>,
    pub stt: Arc<MockSpeechToText>,
    pub tts: Arc<MockTextToSpeech>,
    pub llm: Arc<MockLanguageModel>,
    pub orchestrator: Arc<Orchestrator>,
    _db: tempfile::NamedTempFile,
}

/// Builds a full application over a scratch database with scripted
/// providers and test-grade pipeline timings.
pub fn test_app() -> (TestApp, Router) {
    let db = tempfile::NamedTempFile::new().expect("temp db");
    let path = db.path().to_str().expect("utf-8 path").to_string();
    let pool = create_pool(
        &path,
        DbRuntimeSettings {
            busy_timeout_ms: 2_000,
            pool_max_size: 4,
        },
    )
    .expect("pool");
    {
        let conn = pool.get().expect("conn");
        run_migrations(&conn).expect("migrations");
    }

    let telephony = Arc::new(MockTelephony::new());
    let stt = Arc::new(MockSpeechToText::new());
    let tts = Arc::new(MockTextToSpeech::new());
    let llm = Arc::new(MockLanguageModel::new());

    let (events_tx, _) = broadcast::channel(1024);
    let dnc = Arc::new(DncCache::new(pool.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        telephony.clone(),
        dnc.clone(),
        events_tx.clone(),
        Arc::new(AgentRegistry::new()),
        OrchestratorConfig {
            poll_interval: Duration::from_millis(10),
            max_poll_wait: Duration::from_millis(500),
            stuck_timeout_secs: 120,
            scheduler_batch: 20,
            reconciler_batch: 20,
        },
    ));

    let hub = ObserverHub::new();
    hub.spawn_bridge(events_tx.subscribe());

    let state = AppState {
        pool: pool.clone(),
        orchestrator: orchestrator.clone(),
        dnc,
        hub,
        events_tx,
        media_sessions: MediaSessionRegistry::new(),
        stt: stt.clone(),
        tts: tts.clone(),
        llm: llm.clone(),
        engine_defaults: EngineConfig {
            silence_threshold_ms: 40,
            min_buffer_bytes: 160,
            end_grace_ms: 20,
            ..EngineConfig::default()
        },
    };

    let router = app(state.clone());
    (
        TestApp {
            state,
            pool,
            telephony,
            stt,
            tts,
            llm,
            orchestrator,
            _db: db,
        },
        router,
    )
}

/// Serves the router on an ephemeral local port for WebSocket tests.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

pub fn seed_lead(pool: &DbPool, id: &str, phone: Option<&str>) {
    let conn = pool.get().expect("conn");
    dialflow_db::create_lead(
        &conn,
        &Lead {
            id: id.to_string(),
            name: format!("Lead {id}"),
            company: Some("Acme Roofing".to_string()),
            phone: phone.map(str::to_string),
            status: "new".to_string(),
            created_at: String::new(),
        },
    )
    .expect("create lead");
}

pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    timeout(Duration::from_secs(10), async {
        while !cond() {
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
