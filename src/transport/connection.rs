//! Host-side connection to a plugin over an arbitrary byte stream.
//!
//! After the `ready` handshake, a writer task owns the outgoing half and a
//! reader task routes replies to waiting callers by request id, so any
//! number of calls can be in flight at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{ExecuteReply, ExecuteRequest, ExecuteResponse, HostMessage, PluginMessage};
use super::{encode_frame, read_frame, write_loop, Transport};
use crate::error::PluginError;
use crate::handshake::HandshakeConfig;

/// Depth of the outgoing message queue.
const WRITE_QUEUE_DEPTH: usize = 64;

type Pending = HashMap<u64, oneshot::Sender<PluginMessage>>;

/// State shared between callers and the reader task.
struct Shared {
    pending: Mutex<Pending>,
    alive: AtomicBool,
}

impl Shared {
    /// Never held across an await.
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a reply to the caller waiting on its id.
    fn dispatch(&self, msg: PluginMessage) {
        let id = match &msg {
            PluginMessage::Result { id, .. } | PluginMessage::Pong { id } => *id,
            PluginMessage::Error { id: Some(id), message } => {
                debug!(id, error = %message, "Plugin reported protocol error");
                *id
            }
            PluginMessage::Error { id: None, message } => {
                warn!(error = %message, "Plugin reported protocol error");
                return;
            }
            PluginMessage::Ready { .. } => {
                warn!("Ignoring duplicate ready message");
                return;
            }
        };

        let waiter = self.pending().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            // The caller gave up (deadline or dropped future).
            None => debug!(id, "Reply for abandoned request dropped"),
        }
    }

    /// Mark the connection dead and fail every in-flight call.
    fn close(&self) {
        let mut pending = self.pending();
        self.alive.store(false, Ordering::Release);
        if !pending.is_empty() {
            debug!(in_flight = pending.len(), "Failing in-flight calls");
        }
        pending.clear();
    }
}

/// Removes a call's pending slot however the call ends, including when
/// the caller's future is dropped mid-flight.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

/// Multiplexed connection to a plugin that has completed the handshake.
pub struct Connection {
    shared: Arc<Shared>,
    writer_tx: mpsc::Sender<Vec<u8>>,
    next_id: AtomicU64,
    reader_handle: JoinHandle<()>,
}

impl Connection {
    /// Wait for the plugin's `ready` message, then start the I/O tasks.
    ///
    /// `reader` is the plugin's output, `writer` its input.
    pub async fn establish<R, W>(
        mut reader: R,
        writer: W,
        handshake: HandshakeConfig,
        ready_timeout: Duration,
    ) -> Result<Self, PluginError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let ready = tokio::time::timeout(ready_timeout, read_frame::<_, PluginMessage>(&mut reader))
            .await
            .map_err(|_| {
                PluginError::Handshake(format!("plugin did not send ready within {ready_timeout:?}"))
            })?
            .map_err(|e| PluginError::Handshake(format!("failed to read ready message: {e}")))?;

        match ready {
            Some(PluginMessage::Ready { protocol_version }) => {
                handshake.verify_version(protocol_version)?;
                debug!(protocol_version, "Plugin is ready");
            }
            Some(other) => {
                return Err(PluginError::Handshake(format!(
                    "expected ready message, got: {other:?}"
                )));
            }
            None => {
                return Err(PluginError::Handshake(
                    "plugin closed its output before sending ready".to_string(),
                ));
            }
        }

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
        });

        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        tokio::spawn(write_loop(writer, writer_rx));
        let reader_handle = tokio::spawn(reader_loop(reader, Arc::clone(&shared)));

        Ok(Self {
            shared,
            writer_tx,
            next_id: AtomicU64::new(1),
            reader_handle,
        })
    }

    /// Send a request built around a fresh id and wait for its reply.
    ///
    /// A message too large to frame fails here and leaves the connection
    /// untouched.
    async fn call(&self, build: impl FnOnce(u64) -> HostMessage) -> Result<PluginMessage, PluginError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(&build(id))?;
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.shared.pending();
            if !self.shared.alive.load(Ordering::Acquire) {
                return Err(PluginError::Closed);
            }
            pending.insert(id, tx);
        }
        let _slot = PendingGuard {
            shared: &self.shared,
            id,
        };

        if self.writer_tx.send(frame).await.is_err() {
            return Err(PluginError::Closed);
        }

        rx.await.map_err(|_| PluginError::Closed)
    }
}

#[async_trait]
impl Transport for Connection {
    async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteReply, PluginError> {
        match self.call(|id| HostMessage::Execute { id, raw: req.raw }).await? {
            PluginMessage::Result {
                outcome,
                success,
                error,
                ..
            } => Ok(ExecuteReply {
                response: ExecuteResponse { outcome, success },
                error,
            }),
            PluginMessage::Error { message, .. } => Err(PluginError::Remote(message)),
            other => Err(PluginError::Remote(format!(
                "unexpected reply to execute: {other:?}"
            ))),
        }
    }

    async fn ping(&self) -> Result<(), PluginError> {
        match self.call(|id| HostMessage::Ping { id }).await? {
            PluginMessage::Pong { .. } => Ok(()),
            PluginMessage::Error { message, .. } => Err(PluginError::Remote(message)),
            other => Err(PluginError::Remote(format!(
                "unexpected reply to ping: {other:?}"
            ))),
        }
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        if !self.is_alive() {
            return Ok(());
        }
        let frame = encode_frame(&HostMessage::Shutdown)?;
        self.writer_tx
            .send(frame)
            .await
            .map_err(|_| PluginError::Closed)
    }

    fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

async fn reader_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>) {
    loop {
        match read_frame::<_, PluginMessage>(&mut reader).await {
            Ok(Some(msg)) => shared.dispatch(msg),
            Ok(None) => {
                debug!("Plugin closed its output");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from plugin");
                break;
            }
        }
    }
    shared.close();
}
