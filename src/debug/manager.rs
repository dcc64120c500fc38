//! Session multiplexing. The manager's catalogue is the only process-wide
//! mutable structure; sessions themselves share nothing.

use super::session::{DebugSession, SessionTarget};
use super::state::SessionState;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<DebugSession>>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Construct and start a session. A session that fails to start is not
    /// retained: the catalogue only ever holds sessions that came up.
    pub async fn create_session(&self, target: SessionTarget) -> Result<String> {
        let session = Arc::new(DebugSession::new(target));
        let session_id = session.id.clone();

        // Crashed sessions remove themselves from the catalogue.
        let sessions = self.sessions.clone();
        let crashed_id = session_id.clone();
        session.on_crash(move |crash| {
            warn!(
                "Session {} crashed ({}), removing from catalogue",
                crashed_id, crash.message
            );
            let sessions = sessions.clone();
            let id = crashed_id.clone();
            tokio::spawn(async move {
                sessions.write().await.remove(&id);
            });
        });

        session.clone().start().await?;

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);
        info!("Session {} registered", session_id);
        Ok(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Arc<DebugSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Tear the session down and drop it from the catalogue.
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?
        };
        session.cleanup().await?;
        info!("Session {} removed", session_id);
        Ok(())
    }

    /// Tear down every session. Per-session cleanup failures are logged; the
    /// sweep always finishes.
    pub async fn cleanup_all(&self) {
        let drained: Vec<(String, Arc<DebugSession>)> =
            self.sessions.write().await.drain().collect();
        for (id, session) in drained {
            if let Err(e) = session.cleanup().await {
                warn!("Cleanup of session {} failed: {}", id, e);
            }
        }
    }

    /// Drop sessions that already reached `Terminated`, returning their ids.
    pub async fn prune_terminated_sessions(&self) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let dead: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.get_state() == SessionState::Terminated)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            sessions.remove(id);
        }
        if !dead.is_empty() {
            info!("Pruned {} terminated session(s)", dead.len());
        }
        dead
    }
}
