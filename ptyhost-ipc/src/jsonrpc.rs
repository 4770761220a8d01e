//! Symmetric JSON-RPC 2.0 connection over a [`Transport`].
//!
//! Either side may issue requests and notifications. A background reader task
//! routes replies to the caller waiting on them and forwards everything else
//! on the incoming channel returned by [`Connection::new`].
//!
//! Once the socket hangs up the connection is closed for good: every pending
//! call resolves to [`IpcError::Closed`] and so does every later call.

use std::collections::HashMap;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{IpcError, RpcError};
use crate::fd_list::FdList;
use crate::transport::Transport;

const JSONRPC_VERSION: &str = "2.0";

/// Wire representation shared by requests, replies and notifications.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl Envelope {
    fn new() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

/// Successful reply to a call, with any descriptors the callee attached.
#[derive(Debug)]
pub struct Reply {
    pub result: Value,
    pub fds: FdList,
}

impl Reply {
    pub fn decode<R: DeserializeOwned>(&self) -> Result<R, IpcError> {
        Ok(serde_json::from_value(self.result.clone())?)
    }
}

/// A request or notification sent to us by the peer.
#[derive(Debug)]
pub struct IncomingMessage {
    /// Present for requests that expect a reply.
    pub id: Option<u64>,
    pub method: String,
    pub params: Value,
    pub fds: FdList,
}

impl IncomingMessage {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_rpc_call(&self) -> bool {
        self.id.is_some()
    }

    /// Decode the parameters, mapping failure to an "invalid params" error
    /// suitable for sending straight back.
    pub fn params<P: DeserializeOwned>(&self) -> Result<P, RpcError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| RpcError::invalid_params(format!("{}: {e}", self.method)))
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Reply, IpcError>>>;

struct Pending {
    closed: bool,
    calls: PendingMap,
}

struct Shared {
    transport: Transport,
    pending: Mutex<Pending>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    /// Close the connection and fail every pending call. Idempotent.
    fn mark_closed(&self) {
        let drained = {
            let mut pending = self.pending.lock();
            if pending.closed {
                return;
            }
            pending.closed = true;
            std::mem::take(&mut pending.calls)
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(IpcError::Closed));
        }
        self.closed_tx.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    async fn send(&self, envelope: &Envelope, fds: &FdList) -> Result<(), IpcError> {
        let payload = serde_json::to_vec(envelope)?;
        self.transport
            .send(&payload, fds)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::NotConnected => IpcError::Closed,
                _ => IpcError::Io(e),
            })
    }
}

/// One end of the helper channel.
pub struct Connection {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Take ownership of a connected seqpacket socket and start the reader task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(fd: OwnedFd) -> io::Result<(Self, mpsc::UnboundedReceiver<IncomingMessage>)> {
        let transport = Transport::new(fd)?;
        let (closed_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            transport,
            pending: Mutex::new(Pending {
                closed: false,
                calls: HashMap::new(),
            }),
            closed_tx,
        });
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), incoming_tx));
        Ok((
            Self {
                shared,
                next_id: AtomicU64::new(1),
                reader,
            },
            incoming_rx,
        ))
    }

    /// Issue a request and wait for its reply.
    pub async fn call<P: Serialize + ?Sized>(
        &self,
        method: &str,
        params: &P,
        fds: FdList,
    ) -> Result<Reply, IpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if pending.closed {
                return Err(IpcError::Closed);
            }
            pending.calls.insert(id, tx);
        }

        let mut envelope = Envelope::new();
        envelope.id = Some(id);
        envelope.method = Some(method.to_string());
        envelope.params = Some(serde_json::to_value(params)?);

        log::trace!("ipc: -> {method} id={id} fds={}", fds.len());
        if let Err(e) = self.shared.send(&envelope, &fds).await {
            self.shared.pending.lock().calls.remove(&id);
            return Err(e);
        }

        rx.await.unwrap_or(Err(IpcError::Closed))
    }

    /// Issue a request and decode its result.
    pub async fn call_as<P, R>(
        &self,
        method: &str,
        params: &P,
        fds: FdList,
    ) -> Result<(R, FdList), IpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let reply = self.call(method, params, fds).await?;
        let result = reply.decode()?;
        Ok((result, reply.fds))
    }

    /// Send a notification; no reply is expected.
    pub async fn notify<P: Serialize + ?Sized>(
        &self,
        method: &str,
        params: &P,
        fds: FdList,
    ) -> Result<(), IpcError> {
        if self.is_closed() {
            return Err(IpcError::Closed);
        }
        let mut envelope = Envelope::new();
        envelope.method = Some(method.to_string());
        envelope.params = Some(serde_json::to_value(params)?);
        log::trace!("ipc: -> {method} (notification)");
        self.shared.send(&envelope, &fds).await
    }

    /// Answer a request received on the incoming channel.
    pub async fn respond(
        &self,
        id: u64,
        outcome: Result<Value, RpcError>,
        fds: FdList,
    ) -> Result<(), IpcError> {
        if self.is_closed() {
            return Err(IpcError::Closed);
        }
        let mut envelope = Envelope::new();
        envelope.id = Some(id);
        match outcome {
            Ok(result) => envelope.result = Some(result),
            Err(error) => envelope.error = Some(error),
        }
        self.shared.send(&envelope, &fds).await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the connection has closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the channel. The peer observes end-of-file.
    pub fn close(&self) {
        if let Err(e) = self.shared.transport.shutdown() {
            log::debug!("ipc: shutdown failed: {e}");
        }
        self.shared.mark_closed();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.shared.transport.shutdown();
        self.reader.abort();
        self.shared.mark_closed();
    }
}

async fn read_loop(shared: Arc<Shared>, incoming_tx: mpsc::UnboundedSender<IncomingMessage>) {
    loop {
        let (bytes, fds) = match shared.transport.recv().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                log::debug!("ipc: peer hung up");
                break;
            }
            Err(e) => {
                log::warn!("ipc: receive failed: {e}");
                break;
            }
        };

        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("ipc: dropping malformed message: {e}");
                continue;
            }
        };

        match (envelope.method, envelope.id) {
            (Some(method), id) => {
                log::trace!("ipc: <- {method} id={id:?}");
                let message = IncomingMessage {
                    id,
                    method,
                    params: envelope.params.unwrap_or(Value::Null),
                    fds,
                };
                // Nobody listening is fine; requests then simply go unanswered.
                let _ = incoming_tx.send(message);
            }
            (None, Some(id)) => {
                let Some(tx) = shared.pending.lock().calls.remove(&id) else {
                    log::warn!("ipc: reply for unknown request id={id}");
                    continue;
                };
                let outcome = match envelope.error {
                    Some(error) => Err(IpcError::from(error)),
                    None => Ok(Reply {
                        result: envelope.result.unwrap_or(Value::Null),
                        fds,
                    }),
                };
                let _ = tx.send(outcome);
            }
            (None, None) => log::warn!("ipc: message with neither method nor id"),
        }
    }
    shared.mark_closed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::socket_pair;
    use serde_json::json;

    fn pair() -> (
        (Connection, mpsc::UnboundedReceiver<IncomingMessage>),
        (Connection, mpsc::UnboundedReceiver<IncomingMessage>),
    ) {
        let (a, b) = socket_pair().unwrap();
        (Connection::new(a).unwrap(), Connection::new(b).unwrap())
    }

    #[tokio::test]
    async fn test_call_and_respond() {
        let ((client, _client_rx), (server, mut server_rx)) = pair();

        let server_task = tokio::spawn(async move {
            let msg = server_rx.recv().await.unwrap();
            assert_eq!(msg.method, "echo");
            assert!(msg.is_rpc_call());
            server
                .respond(msg.id.unwrap(), Ok(msg.params.clone()), FdList::new())
                .await
                .unwrap();
            server
        });

        let reply = client
            .call("echo", &json!({"value": 7}), FdList::new())
            .await
            .unwrap();
        assert_eq!(reply.result, json!({"value": 7}));
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_error_is_reported() {
        let ((client, _client_rx), (server, mut server_rx)) = pair();

        tokio::spawn(async move {
            let msg = server_rx.recv().await.unwrap();
            server
                .respond(
                    msg.id.unwrap(),
                    Err(RpcError::failed("no such thing")),
                    FdList::new(),
                )
                .await
                .unwrap();
            // Keep the socket open until the client has read the reply.
            let _ = server_rx.recv().await;
        });

        let err = client.call("missing", &json!({}), FdList::new()).await.unwrap_err();
        match err {
            IpcError::Remote { code, message } => {
                assert_eq!(code, RpcError::FAILED);
                assert_eq!(message, "no such thing");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notifications_have_no_id() {
        let ((client, _client_rx), (_server, mut server_rx)) = pair();
        client
            .notify("ping", &json!({"n": 1}), FdList::new())
            .await
            .unwrap();
        let msg = server_rx.recv().await.unwrap();
        assert!(msg.is_notification());
        assert_eq!(msg.params["n"], 1);
    }

    #[tokio::test]
    async fn test_pending_and_future_calls_fail_after_hangup() {
        let ((client, _client_rx), (server, mut server_rx)) = pair();
        let client = Arc::new(client);

        let waiting = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("never", &json!({}), FdList::new()).await })
        };

        // Wait until the request has reached the server, then hang up without answering.
        let _ = server_rx.recv().await.unwrap();
        drop(server);

        let err = waiting.await.unwrap().unwrap_err();
        assert!(err.is_closed());

        client.closed().await;
        assert!(client.is_closed());
        let err = client.call("later", &json!({}), FdList::new()).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let ((client, _client_rx), (_server, _server_rx)) = pair();
        client.close();
        client.closed().await;
        assert!(client.is_closed());
    }
}
