//! Session registry
//!
//! Process-wide map of authenticated sessions, shared by the websocket
//! accept path, the HTTP API and the periodic cleanup sweep. Expiring a
//! session removes it from the map and signals its coordinator through a
//! `watch` channel; the coordinator tears down its bridges on its own task.
//! Lookups fail closed: a session that is closing or already past its idle
//! timeout is reported as not found even before the sweep removes it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use voice_session_config::SessionConfig;

use crate::metrics;
use crate::ServerError;

/// Registry entry for one authenticated session
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    pub started_at: DateTime<Utc>,
    last_activity: RwLock<Instant>,
    closing: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Session {
    fn new(id: String) -> Self {
        let (shutdown, _) = watch::channel(false);
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            started_at: Utc::now(),
            last_activity: RwLock::new(now),
            closing: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Mark closing and wake the coordinator. Idempotent.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            self.shutdown.send_replace(true);
        }
    }

    /// Receiver that flips to `true` once the session is closed
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            started_at: self.started_at,
            idle_secs: self.idle_for().as_secs(),
        }
    }
}

/// Public view of a session for the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// Session registry
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    idle_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_limits(
            config.max_sessions,
            config.idle_timeout(),
            config.cleanup_interval(),
        )
    }

    pub fn with_limits(
        max_sessions: usize,
        idle_timeout: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            idle_timeout,
            cleanup_interval,
        }
    }

    /// Start a background task that periodically expires idle sessions.
    ///
    /// Send `true` on the returned channel to stop it.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let period = registry.cleanup_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = registry.cleanup_expired();
                        if removed > 0 {
                            tracing::info!(
                                removed,
                                remaining = registry.count(),
                                "Session cleanup removed idle sessions"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!("Session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Register a new session, evicting idle ones first when at capacity
    pub fn create(&self) -> Result<Arc<Session>, ServerError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_sessions {
            self.cleanup_expired_internal(&mut sessions);
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::SessionLimit(self.max_sessions));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone()));
        sessions.insert(id.clone(), session.clone());

        metrics::record_session_created();
        metrics::record_active_sessions(sessions.len());
        tracing::info!(session_id = %id, active = sessions.len(), "Created session");

        Ok(session)
    }

    /// Look up a live session
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read();
        sessions
            .get(id)
            .filter(|s| !s.is_closing() && !s.is_expired(self.idle_timeout))
            .cloned()
    }

    /// Record activity. Returns false if the session is not live.
    pub fn touch(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Remove and close a session. Returns whether it was registered.
    pub fn expire(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => {
                session.close();
                metrics::record_active_sessions(self.count());
                tracing::info!(session_id = %id, "Expired session");
                true
            }
            None => false,
        }
    }

    /// Drop a session the coordinator has already torn down. Idempotent.
    pub fn remove(&self, id: &str) {
        let removed = self.sessions.write().remove(id);
        if let Some(session) = removed {
            session.close();
            metrics::record_active_sessions(self.count());
            tracing::debug!(session_id = %id, "Removed session");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Expire sessions idle past the timeout. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write();
        let removed = self.cleanup_expired_internal(&mut sessions);
        if removed > 0 {
            metrics::record_active_sessions(sessions.len());
        }
        removed
    }

    fn cleanup_expired_internal(&self, sessions: &mut HashMap<String, Arc<Session>>) -> usize {
        let timeout = self.idle_timeout;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(timeout) || s.is_closing())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                session.close();
                tracing::info!(session_id = %id, idle_secs = session.idle_for().as_secs(), "Session idle timeout");
            }
        }
        expired.len()
    }

    /// Close every session, used on shutdown
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().drain().collect();
        for (_, session) in &drained {
            session.close();
        }
        metrics::record_active_sessions(0);
        drained.len()
    }
}
