//! Process-wide session registry: creates, looks up, expires, and tears
//! down sessions; enforces the configured cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::assets::{resolve_notebook_source, AssetFetcher};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::Session;

/// Guards a `HashMap<session_id, Arc<Mutex<Session>>>` behind a single
/// short-critical-section lock: the registry lock covers only the lookup,
/// insert, remove, or sweep itself. Once a caller has its session's `Arc`,
/// it locks that session's own mutex for the actual operation, so two
/// requests against different sessions never wait on each other past the
/// map access, and a long-running cell execution in one session doesn't
/// stall any other session.
pub struct SessionManager<F: AssetFetcher> {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    fetcher: F,
    config: Arc<Config>,
}

impl<F: AssetFetcher> SessionManager<F> {
    pub fn new(fetcher: F, config: Arc<Config>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            fetcher,
            config,
        }
    }

    /// Create a session under `session_id`. Rejects a duplicate id, a
    /// registry already at the configured cap, or a notebook source that
    /// cannot be resolved in either canonical location.
    pub async fn start(&self, session_id: String, notebook_path: &str, component_id: Option<String>) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        self.sweep_locked(&mut sessions).await;

        if sessions.contains_key(&session_id) {
            return Err(Error::SessionExists(session_id));
        }
        if sessions.len() >= self.config.max_sessions {
            return Err(Error::SessionCapReached(self.config.max_sessions));
        }

        let source_bytes = resolve_notebook_source(&self.fetcher, notebook_path).await?;
        let source = String::from_utf8_lossy(&source_bytes).to_string();

        let session = Session::create(session_id.clone(), component_id, &source, &self.fetcher, &self.config).await?;
        info!(session_id = %session_id, "session created");
        sessions.insert(session_id, Arc::new(Mutex::new(session)));
        Ok(())
    }

    /// Run `f` against the session named `session_id`, touching it first.
    /// Returns `None` if the session is unknown or has just expired.
    ///
    /// Only the registry lookup happens under the registry lock; `f` runs
    /// with just the target session's own mutex held, so other sessions
    /// stay reachable for the duration of `f`.
    pub async fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            self.expire_if_stale_locked(&mut sessions, session_id).await;
            sessions.get(session_id).cloned()
        }?;

        let mut session = handle.lock().await;
        session.touch();
        Some(f(&mut session))
    }

    /// Run a read-only `f` against the session without touching it.
    pub async fn peek_session<R>(&self, session_id: &str, f: impl FnOnce(&Session) -> R) -> Option<R> {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            self.expire_if_stale_locked(&mut sessions, session_id).await;
            sessions.get(session_id).cloned()
        }?;

        let session = handle.lock().await;
        Some(f(&session))
    }

    pub async fn end(&self, session_id: &str) -> bool {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(session_id)
        };
        match handle {
            Some(handle) => {
                handle.lock().await.close();
                info!(session_id, "session ended");
                true
            }
            None => false,
        }
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    /// Enumerate sessions and end any whose idle time exceeds the
    /// configured timeout. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.sweep_locked(&mut sessions).await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn sweep_locked(&self, sessions: &mut HashMap<String, Arc<Mutex<Session>>>) -> usize {
        let timeout = self.timeout();
        let mut expired = Vec::new();
        for (id, handle) in sessions.iter() {
            if handle.lock().await.idle_for() > timeout {
                expired.push(id.clone());
            }
        }

        let removed = expired.len();
        for id in &expired {
            if let Some(handle) = sessions.remove(id) {
                handle.lock().await.close();
            }
        }
        if removed > 0 {
            info!(removed, "sweep removed expired sessions");
        }
        removed
    }

    async fn expire_if_stale_locked(&self, sessions: &mut HashMap<String, Arc<Mutex<Session>>>, session_id: &str) {
        let timeout = self.timeout();
        let is_stale = match sessions.get(session_id) {
            Some(handle) => handle.lock().await.idle_for() > timeout,
            None => false,
        };
        if is_stale {
            if let Some(handle) = sessions.remove(session_id) {
                handle.lock().await.close();
            }
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.session_timeout_minutes * 60)
    }
}
