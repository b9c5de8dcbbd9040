//! Observer session management and event fan-out.

use dialflow_types::HubEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

/// Subscription target meaning "every agent".
pub const SUBSCRIBE_ALL: &str = "*";

/// Type alias for the session map to keep signatures readable.
type SessionMap = HashMap<String, (Uuid, mpsc::Sender<String>)>;

/// Manages connected observers and their subscription sets.
///
/// Delivery is best-effort and non-blocking per observer: a slow or
/// disconnected observer is skipped with a warning, never blocking the
/// publisher.
#[derive(Clone, Default)]
pub struct ObserverHub {
    /// Active sessions: observer id -> (session_id, sender).
    sessions: Arc<RwLock<SessionMap>>,
    /// Subscriptions: observer id -> set of agent ids (or `*`).
    subscriptions: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for an observer.
    ///
    /// If the observer already has a session, the old session's
    /// subscriptions are cleaned up before replacement to prevent orphaned
    /// entries.
    pub async fn add_session(&self, observer_id: String, sender: mpsc::Sender<String>) -> Uuid {
        let session_id = Uuid::new_v4();

        let had_previous = {
            let sessions = self.sessions.read().await;
            sessions.contains_key(&observer_id)
        };
        if had_previous {
            self.subscriptions.write().await.remove(&observer_id);
            tracing::info!(
                observer_id = %observer_id,
                "replaced existing observer session; cleaned up old subscriptions"
            );
        }

        self.sessions
            .write()
            .await
            .insert(observer_id, (session_id, sender));
        session_id
    }

    /// Removes a session if the session id matches (stale removals from a
    /// superseded socket are ignored).
    pub async fn remove_session(&self, observer_id: &str, session_id: Uuid) {
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get(observer_id) {
                Some((current_id, _)) if *current_id == session_id => {
                    sessions.remove(observer_id);
                }
                _ => return,
            }
        }
        self.subscriptions.write().await.remove(observer_id);
    }

    /// Subscribes an observer to an agent id, or to `*` for everything.
    pub async fn subscribe(&self, observer_id: &str, target: &str) {
        self.subscriptions
            .write()
            .await
            .entry(observer_id.to_string())
            .or_default()
            .insert(target.to_string());
    }

    /// Unsubscribes an observer from an agent id (or from `*`).
    pub async fn unsubscribe(&self, observer_id: &str, target: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(targets) = subscriptions.get_mut(observer_id) {
            targets.remove(target);
            if targets.is_empty() {
                subscriptions.remove(observer_id);
            }
        }
    }

    /// Number of connected observers.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Fans one event out to every observer whose subscription matches the
    /// event's agent id; events without an agent id go to all observers.
    pub async fn broadcast_event(&self, event: &HubEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("failed to serialize hub event: {e}");
                return;
            }
        };

        let subscriptions = self.subscriptions.read().await;
        let sessions = self.sessions.read().await;
        for (observer_id, (_, sender)) in sessions.iter() {
            let matches = match event.agent_id() {
                None => true,
                Some(agent_id) => subscriptions
                    .get(observer_id)
                    .map(|targets| {
                        targets.contains(SUBSCRIBE_ALL) || targets.contains(agent_id)
                    })
                    .unwrap_or(false),
            };
            if !matches {
                continue;
            }
            if let Err(e) = sender.try_send(json.clone()) {
                tracing::warn!(
                    observer_id = %observer_id,
                    "dropping event for slow observer: {e}"
                );
            }
        }
    }

    /// Bridges the orchestrator's broadcast channel into per-observer
    /// delivery. Lagged events are dropped for this bridge, never blocking
    /// the publisher.
    pub fn spawn_bridge(&self, mut rx: broadcast::Receiver<HubEvent>) {
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => hub.broadcast_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "observer bridge lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
