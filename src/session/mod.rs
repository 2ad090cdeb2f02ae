//! Session registry: maps opaque session ids to live protocol channels.
//!
//! A session is created by an `initialize` request that carries no id and is inserted
//! only after the handshake succeeds. The registry is the only writer of the map; each
//! entry is removed exactly once.

mod channel;

pub use channel::{MessageHandler, SessionChannel};

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, WardenError};

/// Default time allowed for one session to close.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Default number of sessions open at once.
pub const DEFAULT_MAX_SESSIONS: usize = 100;

/// Result of a successful `initialize` request.
#[derive(Debug, Clone)]
pub struct InitializedSession {
    /// `None` when the handshake was refused.
    pub session_id: Option<String>,
    pub response: Option<Value>,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionChannel>>>,
    handler: Arc<dyn MessageHandler>,
    shutdown: CancellationToken,
    close_grace: Duration,
    max_sessions: usize,
    idle_timeout: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            handler,
            shutdown: CancellationToken::new(),
            close_grace: DEFAULT_CLOSE_GRACE,
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_timeout: None,
        }
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Sessions that receive nothing for `timeout` close themselves. `None` keeps them
    /// open until removed.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<SessionChannel>>>> {
        self.sessions
            .lock()
            .map_err(|_| WardenError::internal("Session registry lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.sessions().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions()
            .map(|s| s.get(session_id).is_some_and(|c| !c.is_closed()))
            .unwrap_or(false)
    }

    /// Forgets sessions whose actor has stopped on its own. Returns how many were dropped.
    pub fn reap_closed(&self) -> usize {
        let Ok(mut sessions) = self.sessions() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|session_id, channel| {
            let open = !channel.is_closed();
            if !open {
                info!("MCP session expired: {}", session_id);
            }
            open
        });
        before - sessions.len()
    }

    fn ensure_capacity(sessions: &HashMap<String, Arc<SessionChannel>>, max: usize) -> Result<()> {
        if sessions.len() >= max {
            return Err(WardenError::protocol(format!(
                "Too many active sessions (limit {max})"
            )));
        }
        Ok(())
    }

    /// Opens a new session for an `initialize` request.
    ///
    /// The session is registered only when the handshake produced a result; a failed
    /// handshake closes the channel and registers nothing. Expired sessions are reaped
    /// first; a registry still at its limit refuses with a protocol error.
    pub async fn initialize(&self, message: Value) -> Result<InitializedSession> {
        if self.shutdown.is_cancelled() {
            return Err(WardenError::protocol("Server is shutting down"));
        }
        self.reap_closed();
        Self::ensure_capacity(&*self.sessions()?, self.max_sessions)?;

        let session_id = Uuid::new_v4().to_string();
        let channel = Arc::new(SessionChannel::spawn_with_idle_timeout(
            session_id.clone(),
            self.handler.clone(),
            &self.shutdown,
            self.idle_timeout,
        ));

        let response = channel.send(message).await?;
        let handshake_ok = response
            .as_ref()
            .map(|r| r.get("result").is_some())
            .unwrap_or(false);

        if !handshake_ok {
            if let Err(e) = channel.close(self.close_grace).await {
                warn!(session_id = %session_id, error = %e, "Failed to close rejected session");
            }
            return Ok(InitializedSession {
                session_id: None,
                response,
            });
        }

        // Concurrent handshakes may have filled the registry meanwhile.
        let admitted = {
            let mut sessions = self.sessions()?;
            let admitted = Self::ensure_capacity(&sessions, self.max_sessions);
            if admitted.is_ok() {
                sessions.insert(session_id.clone(), channel.clone());
            }
            admitted
        };
        if let Err(e) = admitted {
            if let Err(close) = channel.close(self.close_grace).await {
                warn!(session_id = %session_id, error = %close, "Failed to close refused session");
            }
            return Err(e);
        }
        info!("MCP session initialized: {}", session_id);

        Ok(InitializedSession {
            session_id: Some(session_id),
            response,
        })
    }

    /// Routes a message to an existing session.
    ///
    /// An unknown id is a protocol error. A channel found closed is removed first.
    pub async fn route(&self, session_id: &str, message: Value) -> Result<Option<Value>> {
        let channel = self
            .sessions()?
            .get(session_id)
            .cloned()
            .ok_or_else(|| WardenError::protocol(format!("Unknown session: {session_id}")))?;

        match channel.send(message).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.remove(session_id).await;
                Err(e)
            }
        }
    }

    /// Closes and forgets a session. Returns `false` when it was not registered.
    pub async fn remove(&self, session_id: &str) -> bool {
        let channel = match self.sessions() {
            Ok(mut sessions) => sessions.remove(session_id),
            Err(e) => {
                warn!(error = %e, "Cannot remove session");
                None
            }
        };
        let Some(channel) = channel else {
            return false;
        };

        if let Err(e) = channel.close(self.close_grace).await {
            warn!(session_id = %session_id, error = %e, "Failed to close transport for session {}", session_id);
        }
        info!("MCP session closed: {}", session_id);
        true
    }

    /// Closes every session, each bounded by the close grace. Failures are logged only.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let drained: Vec<(String, Arc<SessionChannel>)> = match self.sessions() {
            Ok(mut sessions) => sessions.drain().collect(),
            Err(e) => {
                warn!(error = %e, "Cannot drain sessions on shutdown");
                Vec::new()
            }
        };

        let count = drained.len();
        let grace = self.close_grace;
        join_all(drained.into_iter().map(|(session_id, channel)| async move {
            if let Err(e) = channel.close(grace).await {
                warn!(error = %e, "Failed to close transport for session {}", session_id);
            }
        }))
        .await;

        info!(sessions = count, "All sessions closed");
    }
}
