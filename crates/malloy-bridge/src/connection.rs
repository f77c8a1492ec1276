//! Bidirectional JSON-RPC connection to a worker
//!
//! A connection owns two tasks: a reader that classifies incoming frames and
//! a writer that serialises everything queued for the peer. Outgoing requests
//! are correlated with their responses through a pending table keyed by
//! request id. Incoming requests go through the [`Dispatcher`] and are
//! handled concurrently; each is answered exactly once with its own id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::protocol::{JsonRpcHandler, JsonRpcMessage, JsonRpcResponse, RequestId};
use crate::transport::{MessageReader, MessageWriter};

/// Capacity of the notification broadcast channel
const NOTIFICATION_CAPACITY: usize = 100;

/// A request sent to the peer and awaiting its response
struct PendingRequest {
    method: String,
    sent_at: Instant,
    response_tx: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingState {
    requests: HashMap<RequestId, PendingRequest>,
    closed: bool,
}

struct Inner {
    name: String,
    handler: JsonRpcHandler,
    pending: Mutex<PendingState>,
    outgoing: mpsc::UnboundedSender<JsonRpcMessage>,
    notification_tx: broadcast::Sender<(String, Option<Value>)>,
    closed: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn complete(&self, response: JsonRpcResponse) {
        let pending = self.pending.lock().requests.remove(&response.id);
        match pending {
            Some(pending) => {
                trace!(
                    connection = %self.name,
                    method = %pending.method,
                    elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
                    "Response received"
                );
                let result = response.into_result().map_err(BridgeError::from);
                // The caller may have given up waiting
                let _ = pending.response_tx.send(result);
            }
            None => {
                warn!(
                    connection = %self.name,
                    id = %response.id,
                    "Received response for unknown request ID"
                );
            }
        }
    }

    /// Fail every in-flight request and refuse new ones
    fn close(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            if pending.closed {
                return;
            }
            pending.closed = true;
            pending.requests.drain().map(|(_, request)| request).collect()
        };

        if !drained.is_empty() {
            debug!(
                connection = %self.name,
                count = drained.len(),
                "Failing in-flight requests"
            );
        }
        for request in drained {
            let _ = request.response_tx.send(Err(BridgeError::TransportClosed));
        }
        self.closed.cancel();
    }
}

/// Closes the connection when an IO task ends, however it ends
struct CloseOnExit(Arc<Inner>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Handle to a live JSON-RPC connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Start serving a connection over `reader`/`writer`
    ///
    /// Incoming requests are answered from `dispatcher`. Must be called from
    /// within a tokio runtime.
    pub fn start<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        dispatcher: Dispatcher,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (notification_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let inner = Arc::new(Inner {
            name: name.into(),
            handler: JsonRpcHandler::new(),
            pending: Mutex::new(PendingState::default()),
            outgoing,
            notification_tx,
            closed: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let read_task = tokio::spawn(read_loop(
            inner.clone(),
            MessageReader::new(BufReader::new(reader)),
            dispatcher,
        ));
        let write_task = tokio::spawn(write_loop(
            inner.clone(),
            MessageWriter::new(writer),
            outgoing_rx,
        ));
        inner.tasks.lock().extend([read_task, write_task]);

        debug!(connection = %inner.name, "Connection started");
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Send a request and wait for the peer's response
    ///
    /// Fails with `TransportClosed` if the connection is closed before or
    /// while the request is in flight, and with `Remote` if the peer answers
    /// with an error.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = self.inner.handler.create_request(method, params);
        let id = request.id.clone();
        let (response_tx, response_rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                return Err(BridgeError::TransportClosed);
            }
            pending.requests.insert(
                id.clone(),
                PendingRequest {
                    method: method.to_string(),
                    sent_at: Instant::now(),
                    response_tx,
                },
            );
        }

        trace!(connection = %self.inner.name, method = %method, id = %id, "Sending request");
        if self
            .inner
            .outgoing
            .send(JsonRpcMessage::Request(request))
            .is_err()
        {
            self.inner.pending.lock().requests.remove(&id);
            return Err(BridgeError::TransportClosed);
        }

        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::TransportClosed),
        }
    }

    /// Send a notification; no response is expected
    pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::TransportClosed);
        }
        let notification = self.inner.handler.create_notification(method, params);
        trace!(connection = %self.inner.name, method = %method, "Sending notification");
        self.inner
            .outgoing
            .send(JsonRpcMessage::Notification(notification))
            .map_err(|_| BridgeError::TransportClosed)
    }

    /// Subscribe to notifications sent by the peer
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<(String, Option<Value>)> {
        self.inner.notification_tx.subscribe()
    }

    pub fn pending_request_count(&self) -> usize {
        self.inner.pending.lock().requests.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pending.lock().closed
    }

    /// Resolves once the connection has closed
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Close the connection and fail in-flight requests
    pub fn close(&self) {
        self.inner.close();
    }

    /// Close the connection and stop its tasks
    pub fn shutdown(&self) {
        self.inner.close();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_request_count())
            .finish()
    }
}

async fn read_loop<R>(inner: Arc<Inner>, mut reader: MessageReader<R>, dispatcher: Dispatcher)
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let _close = CloseOnExit(inner.clone());
    loop {
        let message = tokio::select! {
            _ = inner.closed.cancelled() => break,
            message = reader.read_message() => message,
        };

        match message {
            Ok(Some(JsonRpcMessage::Request(request))) => {
                let dispatcher = dispatcher.clone();
                let outgoing = inner.outgoing.clone();
                tokio::spawn(async move {
                    let response = dispatcher.dispatch(request).await;
                    // Nobody to answer once the writer is gone
                    let _ = outgoing.send(JsonRpcMessage::Response(response));
                });
            }
            Ok(Some(JsonRpcMessage::Response(response))) => inner.complete(response),
            Ok(Some(JsonRpcMessage::Notification(notification))) => {
                let _ = inner
                    .notification_tx
                    .send((notification.method, notification.params));
            }
            Ok(None) => {
                debug!(connection = %inner.name, "Peer closed the stream");
                break;
            }
            Err(BridgeError::Protocol(reason)) => {
                warn!(connection = %inner.name, reason = %reason, "Dropping malformed message");
            }
            Err(e) => {
                warn!(connection = %inner.name, error = %e, "Read failed");
                break;
            }
        }
    }
}

async fn write_loop<W>(
    inner: Arc<Inner>,
    mut writer: MessageWriter<W>,
    mut outgoing: mpsc::UnboundedReceiver<JsonRpcMessage>,
) where
    W: AsyncWrite + Unpin,
{
    let _close = CloseOnExit(inner.clone());
    loop {
        let message = tokio::select! {
            _ = inner.closed.cancelled() => break,
            message = outgoing.recv() => message,
        };

        let Some(message) = message else { break };
        if let Err(e) = writer.write_message(&message).await {
            warn!(connection = %inner.name, error = %e, "Write failed");
            break;
        }
    }
}
