//! Do-not-call compliance for the Dialflow platform.
//!
//! The durable `dnc_numbers` table is the source of truth; this crate keeps
//! a TTL'd in-memory projection of it and consults the projection before
//! every dial. Writes go to durable storage first and only then update the
//! cache, so the cache never holds an entry with no backing record. A stale
//! read during a refresh is acceptable; a torn write is not, so refreshes are
//! single-writer behind the cache's write lock.

use dialflow_db::{DbPool, Lead, StoreError};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// How long a cached snapshot stays fresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Errors produced by compliance operations.
#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Normalizes a phone number for comparison: strips every non-digit and a
/// leading `1` country code on 11-digit numbers.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 {
        if let Some(rest) = digits.strip_prefix('1') {
            return rest.to_string();
        }
    }
    digits
}

struct CacheState {
    blocked: HashSet<String>,
    refreshed_at: Option<Instant>,
}

/// The in-memory DNC projection.
pub struct DncCache {
    pool: DbPool,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl DncCache {
    pub fn new(pool: DbPool) -> Self {
        Self::with_ttl(pool, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(pool: DbPool, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            state: RwLock::new(CacheState {
                blocked: HashSet::new(),
                refreshed_at: None,
            }),
        }
    }

    async fn load_blocked_set(&self) -> Result<HashSet<String>, ComplianceError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| ComplianceError::Pool(e.to_string()))?;
            let entries = dialflow_db::list_dnc_numbers(&conn)?;
            Ok(entries.into_iter().map(|e| e.phone).collect())
        })
        .await
        .map_err(|e| ComplianceError::Join(e.to_string()))?
    }

    /// Refreshes the projection when it is empty or older than the TTL.
    async fn ensure_fresh(&self) -> Result<(), ComplianceError> {
        {
            let state = self.state.read().await;
            if let Some(at) = state.refreshed_at {
                if at.elapsed() < self.ttl {
                    return Ok(());
                }
            }
        }

        let mut state = self.state.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(at) = state.refreshed_at {
            if at.elapsed() < self.ttl {
                return Ok(());
            }
        }

        let blocked = self.load_blocked_set().await?;
        tracing::debug!(count = blocked.len(), "refreshed DNC cache");
        state.blocked = blocked;
        state.refreshed_at = Some(Instant::now());
        Ok(())
    }

    /// True when the normalized number is on the do-not-call list.
    pub async fn is_blocked(&self, phone: &str) -> Result<bool, ComplianceError> {
        self.ensure_fresh().await?;
        let normalized = normalize_phone(phone);
        Ok(self.state.read().await.blocked.contains(&normalized))
    }

    /// Removes every lead whose normalized phone is blocked. Leads without
    /// a phone pass through; eligibility is the caller's concern.
    pub async fn filter_leads(&self, leads: Vec<Lead>) -> Result<Vec<Lead>, ComplianceError> {
        self.ensure_fresh().await?;
        let state = self.state.read().await;
        Ok(leads
            .into_iter()
            .filter(|lead| match &lead.phone {
                Some(phone) => !state.blocked.contains(&normalize_phone(phone)),
                None => true,
            })
            .collect())
    }

    /// Adds a number to the DNC list: durable storage first, then the cache.
    pub async fn add_to_dnc(
        &self,
        phone: &str,
        reason: Option<&str>,
    ) -> Result<String, ComplianceError> {
        let normalized = normalize_phone(phone);
        let pool = self.pool.clone();
        let for_write = normalized.clone();
        let reason = reason.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| ComplianceError::Pool(e.to_string()))?;
            dialflow_db::add_dnc_number(&conn, &for_write, reason.as_deref())?;
            Ok::<(), ComplianceError>(())
        })
        .await
        .map_err(|e| ComplianceError::Join(e.to_string()))??;

        self.state.write().await.blocked.insert(normalized.clone());
        Ok(normalized)
    }

    /// Removes a number from the DNC list: durable storage first, then the
    /// cache.
    pub async fn remove_from_dnc(&self, phone: &str) -> Result<String, ComplianceError> {
        let normalized = normalize_phone(phone);
        let pool = self.pool.clone();
        let for_write = normalized.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| ComplianceError::Pool(e.to_string()))?;
            dialflow_db::remove_dnc_number(&conn, &for_write)?;
            Ok::<(), ComplianceError>(())
        })
        .await
        .map_err(|e| ComplianceError::Join(e.to_string()))??;

        self.state.write().await.blocked.remove(&normalized);
        Ok(normalized)
    }
}
