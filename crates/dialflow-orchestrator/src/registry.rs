//! Process-owned registry of running agent loops.
//!
//! The registry replaces hidden global timer state: it is constructed once,
//! injected into the [`Orchestrator`](crate::Orchestrator), and holds at
//! most one live loop handle per agent. Cancellation is a `watch` flag the
//! loop re-checks after every await.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct AgentHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Registry of live agent loops, keyed by agent id.
#[derive(Default)]
pub struct AgentRegistry {
    inner: Mutex<HashMap<String, AgentHandle>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AgentHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a loop handle. A stale handle for the same agent is
    /// cancelled and replaced; at most one active loop per agent.
    pub fn insert(&self, agent_id: &str, cancel: watch::Sender<bool>, task: JoinHandle<()>) {
        let mut inner = self.lock();
        if let Some(old) = inner.insert(agent_id.to_string(), AgentHandle { cancel, task }) {
            tracing::warn!(agent_id, "replacing a live agent loop handle");
            let _ = old.cancel.send(true);
            old.task.abort();
        }
    }

    /// True when the agent has a live loop.
    pub fn contains(&self, agent_id: &str) -> bool {
        self.lock().contains_key(agent_id)
    }

    /// Signals the agent's loop to cancel. Returns false when no loop is
    /// registered.
    pub fn cancel(&self, agent_id: &str) -> bool {
        match self.lock().get(agent_id) {
            Some(handle) => handle.cancel.send(true).is_ok(),
            None => false,
        }
    }

    /// Drops the agent's handle. Called by the loop itself on exit.
    pub fn remove(&self, agent_id: &str) {
        self.lock().remove(agent_id);
    }

    /// Cancels every live loop. Used on shutdown.
    pub fn cancel_all(&self) {
        for handle in self.lock().values() {
            let _ = handle.cancel.send(true);
        }
    }

    /// Number of live loops.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
