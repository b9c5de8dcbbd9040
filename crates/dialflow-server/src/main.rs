//! Dialflow server binary — the main entry point for the platform.
//!
//! Starts an axum HTTP/WebSocket server with structured logging, database
//! initialization, startup recovery of durable pending work, the background
//! scheduler, and graceful shutdown on SIGTERM/SIGINT.

use dialflow_adapters::{
    mock, HttpLanguageModel, HttpSpeechToText, HttpTelephony, HttpTextToSpeech, LanguageModel,
    SpeechToText, TelephonyProvider, TextToSpeech,
};
use dialflow_compliance::DncCache;
use dialflow_orchestrator::{
    recover_pending_work, run_scheduler_loop, AgentRegistry, Orchestrator, OrchestratorConfig,
};
use dialflow_server::config::{self, Config, ProviderMode};
use dialflow_server::{api_media::MediaSessionRegistry, app, hub::ObserverHub, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Interval between scheduler ticks.
const SCHEDULER_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the hub event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("DIALFLOW_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

struct Adapters {
    telephony: Arc<dyn TelephonyProvider>,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    llm: Arc<dyn LanguageModel>,
}

fn build_adapters(config: &Config) -> Adapters {
    match config.providers.mode {
        ProviderMode::Mock => {
            tracing::warn!("running with scripted mock providers; no real calls will be placed");
            Adapters {
                telephony: Arc::new(mock::MockTelephony::new()),
                stt: Arc::new(mock::MockSpeechToText::new()),
                tts: Arc::new(mock::MockTextToSpeech::new()),
                llm: Arc::new(mock::MockLanguageModel::new()),
            }
        }
        ProviderMode::Http => {
            let p = &config.providers;
            Adapters {
                telephony: Arc::new(HttpTelephony::new(
                    p.telephony.base_url.clone(),
                    p.telephony.api_key.clone(),
                )),
                stt: Arc::new(HttpSpeechToText::new(
                    p.stt.base_url.clone(),
                    p.stt.api_key.clone(),
                )),
                tts: Arc::new(HttpTextToSpeech::new(
                    p.tts.base_url.clone(),
                    p.tts.api_key.clone(),
                )),
                llm: Arc::new(HttpLanguageModel::new(
                    p.llm.base_url.clone(),
                    p.llm.api_key.clone(),
                )),
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = dialflow_db::create_pool(
        &config.database.path,
        dialflow_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            dialflow_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Build shared components
    let adapters = build_adapters(&config);
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let dnc = Arc::new(DncCache::new(pool.clone()));
    let registry = Arc::new(AgentRegistry::new());
    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        adapters.telephony.clone(),
        dnc.clone(),
        events_tx.clone(),
        registry.clone(),
        OrchestratorConfig::default(),
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
        stt: adapters.stt,
        tts: adapters.tts,
        llm: adapters.llm,
        engine_defaults: dialflow_engine::EngineConfig::default(),
    };

    // Re-arm durable pending work from before a restart, then start the
    // scheduler (its first tick also fires any calls that came due while
    // the process was down).
    match recover_pending_work(&orchestrator).await {
        Ok(resumed) if resumed > 0 => {
            tracing::info!(resumed, "resumed agents from durable state");
        }
        Ok(_) => {}
        Err(e) => tracing::error!("startup recovery failed: {e}"),
    }
    tokio::spawn(run_scheduler_loop(orchestrator.clone(), SCHEDULER_INTERVAL));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting dialflow server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop every agent loop before exiting; durable state lets a restart
    // resume them.
    registry.cancel_all();
    tracing::info!("dialflow server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
