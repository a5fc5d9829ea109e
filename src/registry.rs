//! # Pending Request Registry
//!
//! Bridges the two independent HTTP calls that open a live session: the POST
//! parks the caller's query and retrieval context under a session id, and the
//! GET that opens the event stream claims it.
//!
//! ## Semantics:
//! - `put` overwrites any entry for the same id (last write wins)
//! - `take` waits up to a deadline for the entry, then removes and returns it;
//!   an entry is never handed out twice
//! - entries nobody claims are evicted once older than the configured TTL

use crate::models::PendingRequest;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

struct Entry {
    request: PendingRequest,
    stored_at: Instant,
}

pub struct RequestRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    /// Woken on every `put` so waiting `take` calls re-check their id.
    stored: Notify,
    ttl: Duration,
}

impl RequestRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stored: Notify::new(),
            ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put(&self, request: PendingRequest) {
        let session_id = request.session_id.clone();
        let replaced = self
            .entries()
            .insert(
                session_id.clone(),
                Entry {
                    request,
                    stored_at: Instant::now(),
                },
            )
            .is_some();

        if replaced {
            debug!(session_id = %session_id, "Pending request overwritten");
        } else {
            debug!(session_id = %session_id, "Pending request stored");
        }

        self.stored.notify_waiters();
    }

    /// Claim the entry for `session_id`, waiting up to `timeout` for it to appear.
    ///
    /// Returns `None` once the deadline passes without a matching `put`.
    pub async fn take(&self, session_id: &str, timeout: Duration) -> Option<PendingRequest> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a put between the check and
            // the await still wakes us.
            let stored = self.stored.notified();
            tokio::pin!(stored);
            stored.as_mut().enable();

            if let Some(request) = self.remove_live(session_id) {
                debug!(session_id = %session_id, "Pending request claimed");
                return Some(request);
            }

            if tokio::time::timeout_at(deadline, stored).await.is_err() {
                let last_chance = self.remove_live(session_id);
                if last_chance.is_none() {
                    debug!(session_id = %session_id, "Pending request wait timed out");
                }
                return last_chance;
            }
        }
    }

    fn remove_live(&self, session_id: &str) -> Option<PendingRequest> {
        let mut entries = self.entries();
        match entries.get(session_id) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                entries.remove(session_id).map(|e| e.request)
            }
            Some(_) => {
                entries.remove(session_id);
                debug!(session_id = %session_id, "Discarded expired pending request");
                None
            }
            None => None,
        }
    }

    /// Drop any residual entry for `session_id`.
    pub fn remove(&self, session_id: &str) -> bool {
        self.entries().remove(session_id).is_some()
    }

    /// Remove every entry older than the TTL, returning how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() <= self.ttl);
        let evicted = before - entries.len();

        if evicted > 0 {
            info!(evicted, remaining = entries.len(), "Evicted expired pending requests");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries().contains_key(session_id)
    }
}
