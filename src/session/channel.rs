//! Per-session protocol channel.
//!
//! Each session owns one actor task. Requests reach it through an mpsc queue and replies
//! come back on a oneshot, so messages on one session are handled in arrival order while
//! sessions never wait on each other.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, WardenError};

const CHANNEL_CAPACITY: usize = 32;

/// Handles one decoded protocol message for a session.
///
/// Returns `None` for messages that take no reply (notifications).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, session_id: &str, message: Value) -> Option<Value>;
}

struct Envelope {
    message: Value,
    reply: oneshot::Sender<Option<Value>>,
}

/// Actor side: drains the queue until cancelled, idle for too long, or every sender is
/// gone.
struct SessionActor {
    session_id: String,
    receiver: mpsc::Receiver<Envelope>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
    idle_timeout: Option<Duration>,
}

/// Resolves after `timeout`, or never when there is none.
async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(mut self) {
        let idle_timeout = self.idle_timeout;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = idle(idle_timeout) => {
                    debug!(session_id = %self.session_id, "Session idle, closing");
                    self.cancel.cancel();
                    break;
                }
                envelope = self.receiver.recv() => {
                    let Some(envelope) = envelope else { break };
                    let reply = tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        reply = self.handler.handle(&self.session_id, envelope.message) => reply,
                    };
                    // The caller may have gone away; nothing to do then.
                    let _ = envelope.reply.send(reply);
                }
            }
        }
        debug!(session_id = %self.session_id, "Session actor stopped");
    }
}

/// Caller side of a session.
pub struct SessionChannel {
    id: String,
    sender: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionChannel {
    /// Starts the actor task. `parent` cancellation also stops this session.
    pub fn spawn(
        id: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        parent: &CancellationToken,
    ) -> Self {
        Self::spawn_with_idle_timeout(id, handler, parent, None)
    }

    /// Like [`SessionChannel::spawn`], but the session closes itself once no message has
    /// arrived for `idle_timeout`.
    pub fn spawn_with_idle_timeout(
        id: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        parent: &CancellationToken,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let id = id.into();
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = parent.child_token();

        let actor = SessionActor {
            session_id: id.clone(),
            receiver,
            handler,
            cancel: cancel.clone(),
            idle_timeout,
        };
        let task = tokio::spawn(actor.run());

        Self {
            id,
            sender,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Delivers one message and waits for the reply.
    ///
    /// Fails with a protocol error when the session has closed.
    pub async fn send(&self, message: Value) -> Result<Option<Value>> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Envelope { message, reply })
            .await
            .map_err(|_| WardenError::protocol(format!("Session {} is closed", self.id)))?;
        response
            .await
            .map_err(|_| WardenError::protocol(format!("Session {} is closed", self.id)))
    }

    /// Stops the actor, waiting at most `grace` for it to finish. Closing twice is a no-op.
    pub async fn close(&self, grace: Duration) -> Result<()> {
        self.cancel.cancel();

        let task = self
            .task
            .lock()
            .map_err(|_| WardenError::internal("Session task lock poisoned"))?
            .take();
        let Some(mut task) = task else {
            return Ok(());
        };

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WardenError::internal(format!(
                "Session {} task failed: {e}",
                self.id
            ))),
            Err(_) => {
                task.abort();
                Err(WardenError::internal(format!(
                    "Session {} did not close within {}ms",
                    self.id,
                    grace.as_millis()
                )))
            }
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
