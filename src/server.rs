//! Server stub: receives remote calls and hands them to a local [`Command`].
//!
//! A reply always carries the implementation's outcome and success values,
//! even when the implementation also reported an error.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::command::{Command, Execution};
use crate::error::PluginError;
use crate::handshake::HandshakeConfig;
use crate::transport::{
    encode_frame, recv_message, write_frame, write_loop, ExecuteReply, ExecuteRequest,
    ExecuteResponse, HostMessage, PluginMessage,
};

/// Depth of the outgoing reply queue.
const REPLY_QUEUE_DEPTH: usize = 64;

/// Wraps the real implementation of a command.
pub struct CommandServer<C> {
    command: Arc<C>,
}

impl<C> Clone for CommandServer<C> {
    fn clone(&self) -> Self {
        Self {
            command: Arc::clone(&self.command),
        }
    }
}

impl<C: Command + 'static> CommandServer<C> {
    pub fn new(command: C) -> Self {
        Self {
            command: Arc::new(command),
        }
    }

    /// Run the implementation and package whatever it returned.
    #[instrument(skip(self, req), fields(raw_len = req.raw.len()))]
    pub async fn execute(&self, req: ExecuteRequest) -> ExecuteReply {
        let Execution {
            outcome,
            success,
            error,
        } = self.command.execute(&req.raw).await;

        if let Some(e) = &error {
            debug!(error = %e, success, "Command returned an error");
        }

        ExecuteReply {
            response: ExecuteResponse { outcome, success },
            error: error.map(|e| e.to_string()),
        }
    }

    /// Announce readiness and serve host requests until the host shuts the
    /// connection down or closes it.
    ///
    /// `reader` carries host requests, `writer` plugin replies. Each
    /// `execute` runs in its own task; in-flight calls are allowed to finish
    /// before this returns.
    pub async fn serve_connection<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        handshake: HandshakeConfig,
    ) -> Result<(), PluginError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        write_frame(
            &mut writer,
            &PluginMessage::Ready {
                protocol_version: handshake.protocol_version,
            },
        )
        .await?;

        let (reply_tx, reply_rx) = mpsc::channel(REPLY_QUEUE_DEPTH);
        let writer_handle = tokio::spawn(write_loop(writer, reply_rx));

        let result = self.read_requests(&mut reader, &reply_tx).await;

        drop(reply_tx);
        if let Err(e) = writer_handle.await {
            warn!(error = %e, "Reply writer task failed");
        }
        result
    }

    async fn read_requests<R>(
        &self,
        reader: &mut R,
        reply_tx: &mpsc::Sender<Vec<u8>>,
    ) -> Result<(), PluginError>
    where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            let Some(bytes) = recv_message(reader).await? else {
                debug!("Host closed the connection");
                return Ok(());
            };

            let msg = match serde_json::from_slice::<HostMessage>(&bytes) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "Undecodable request from host");
                    let reply = undecodable(&bytes, &e);
                    send_reply(reply_tx, &reply).await;
                    continue;
                }
            };

            match msg {
                HostMessage::Execute { id, raw } => self.spawn_execute(id, raw, reply_tx.clone()),
                HostMessage::Ping { id } => {
                    send_reply(reply_tx, &PluginMessage::Pong { id }).await;
                }
                HostMessage::Shutdown => {
                    info!("Shutdown requested by host");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_execute(&self, id: u64, raw: String, reply_tx: mpsc::Sender<Vec<u8>>) {
        let server = self.clone();
        tokio::spawn(async move {
            // Run the command in its own task so a panic still gets a reply.
            let call = tokio::spawn(async move { server.execute(ExecuteRequest { raw }).await });
            let msg = match call.await {
                Ok(reply) => PluginMessage::result(id, reply),
                Err(e) => {
                    warn!(id, error = %e, "Command task failed");
                    PluginMessage::Error {
                        id: Some(id),
                        message: format!("command task failed: {e}"),
                    }
                }
            };
            send_reply(&reply_tx, &msg).await;
        });
    }
}

/// Frame a reply and queue it for the writer.
///
/// A reply too large to frame is replaced by an `error` reply carrying the
/// same id, so the caller is answered and the connection stays up.
async fn send_reply(reply_tx: &mpsc::Sender<Vec<u8>>, msg: &PluginMessage) {
    let frame = match encode_frame(msg) {
        Ok(frame) => frame,
        Err(e) => {
            let id = msg.id();
            warn!(?id, error = %e, "Reply cannot be framed");
            match encode_frame(&PluginMessage::Error {
                id,
                message: e.to_string(),
            }) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(?id, error = %e, "Dropping reply");
                    return;
                }
            }
        }
    };
    let _ = reply_tx.send(frame).await;
}

/// Error reply for a frame that is not a valid request, keeping the id if
/// one can be recovered.
fn undecodable(bytes: &[u8], err: &serde_json::Error) -> PluginMessage {
    let id = serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.get("id").and_then(serde_json::Value::as_u64));
    PluginMessage::Error {
        id,
        message: format!("invalid request: {err}"),
    }
}

/// Serve `command` as a plugin on this process's stdin/stdout.
///
/// Refuses to run unless the host set the magic cookie.
pub async fn serve<C: Command + 'static>(
    command: C,
    handshake: HandshakeConfig,
) -> Result<(), PluginError> {
    handshake.verify_env()?;

    info!(
        protocol_version = handshake.protocol_version,
        "Serving command plugin on stdio"
    );

    CommandServer::new(command)
        .serve_connection(tokio::io::stdin(), tokio::io::stdout(), handshake)
        .await
}
