use mcpd_core::DaemonError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::protocol::{Frame, JSONRPC_VERSION, Notification, Request, Response};

const WRITE_QUEUE_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Newline-delimited JSON-RPC transport over one child's stdio.
///
/// A single writer task owns stdin, so outbound frames are strictly
/// serialized in enqueue order. The reader task correlates responses
/// to callers by request id; stderr is drained line-by-line into the
/// daemon log at debug level.
#[derive(Debug)]
pub struct StdioTransport {
    server_name: String,
    writer_tx: Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl StdioTransport {
    pub fn attach<W, R, E>(server_name: &str, stdin: W, stdout: R, stderr: Option<E>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
    {
        let (writer_tx, writer_rx) = mpsc::channel::<String>(WRITE_QUEUE_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(server_name.to_string(), stdin, writer_rx));
        tokio::spawn(read_loop(
            server_name.to_string(),
            stdout,
            pending.clone(),
            closed.clone(),
            writer_tx.downgrade(),
        ));
        if let Some(stderr) = stderr {
            tokio::spawn(stderr_loop(server_name.to_string(), stderr));
        }

        Self {
            server_name: server_name.to_string(),
            writer_tx: Mutex::new(Some(writer_tx)),
            pending,
            closed,
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue a request and wait for its correlated response.
    ///
    /// The deadline always bounds the wait. Cancellation or timeout
    /// removes the pending entry and leaves the child running.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, DaemonError> {
        if cancel.is_cancelled() {
            return Err(DaemonError::cancelled(format!(
                "request '{method}' to '{}' cancelled before dispatch",
                self.server_name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(id, method, params);
        let line = serde_json::to_string(&request)?;

        let (response_tx, response_rx) = oneshot::channel();
        {
            if self.closed.load(Ordering::Acquire) {
                return Err(self.closed_error(method));
            }
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.insert(id, response_tx);
        }
        // The reader may have shut down between the check and the
        // insert; re-check so the entry cannot strand.
        if self.closed.load(Ordering::Acquire) {
            self.forget(id);
            return Err(self.closed_error(method));
        }

        if let Err(error) = self.send_line(line).await {
            self.forget(id);
            return Err(error);
        }

        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                self.forget(id);
                Err(DaemonError::timeout(format!(
                    "request '{method}' to '{}' timed out after {deadline:?}",
                    self.server_name
                )))
            }
            _ = cancel.cancelled() => {
                self.forget(id);
                Err(DaemonError::cancelled(format!(
                    "request '{method}' to '{}' cancelled",
                    self.server_name
                )))
            }
            response = response_rx => match response {
                Ok(Response { error: Some(error), .. }) => {
                    Err(DaemonError::protocol(format!(
                        "'{}' returned error {} for '{method}': {}",
                        self.server_name, error.code, error.message
                    )))
                }
                Ok(Response { result, .. }) => Ok(result.unwrap_or(Value::Null)),
                Err(_) => Err(self.closed_error(method)),
            },
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), DaemonError> {
        let notification = Notification::new(method, params);
        self.send_line(serde_json::to_string(&notification)?).await
    }

    /// Close the child's stdin by retiring the writer. Pending
    /// requests keep waiting for already-inflight responses.
    pub fn close_stdin(&self) {
        self.writer_tx.lock().expect("writer sender poisoned").take();
    }

    /// Wait until every pending request has been answered, up to the
    /// deadline. Lets a graceful stop finish in-flight calls before
    /// the child goes away.
    pub async fn drain_pending(&self, deadline: Duration) {
        let poll = Duration::from_millis(10);
        let give_up = tokio::time::Instant::now() + deadline;
        loop {
            if self.pending.lock().expect("pending map poisoned").is_empty() {
                return;
            }
            if self.closed.load(Ordering::Acquire) || tokio::time::Instant::now() >= give_up {
                return;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Whether the child's stdout has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn send_line(&self, line: String) -> Result<(), DaemonError> {
        let sender = {
            let guard = self.writer_tx.lock().expect("writer sender poisoned");
            guard.clone()
        };
        let Some(sender) = sender else {
            return Err(DaemonError::transport(format!(
                "stdin of '{}' is closed",
                self.server_name
            )));
        };
        sender.send(line).await.map_err(|_| {
            DaemonError::transport(format!("writer task of '{}' stopped", self.server_name))
        })
    }

    fn forget(&self, id: u64) {
        self.pending.lock().expect("pending map poisoned").remove(&id);
    }

    fn closed_error(&self, method: &str) -> DaemonError {
        DaemonError::transport(format!(
            "connection to '{}' closed during '{method}'",
            self.server_name
        ))
    }
}

async fn write_loop<W>(server_name: String, stdin: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut stdin = stdin;
    while let Some(line) = rx.recv().await {
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        if let Err(error) = write.await {
            tracing::debug!(server = %server_name, error = %error, "stdin write failed");
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn read_loop<R>(
    server_name: String,
    stdout: R,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    writer: mpsc::WeakSender<String>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match Frame::parse(trimmed) {
                    Ok(Frame::Response(response)) => {
                        let sender = pending
                            .lock()
                            .expect("pending map poisoned")
                            .remove(&response.id);
                        match sender {
                            Some(sender) => {
                                let _ = sender.send(response);
                            }
                            None => {
                                tracing::debug!(
                                    server = %server_name,
                                    id = response.id,
                                    "dropping response with no pending request"
                                );
                            }
                        }
                    }
                    Ok(Frame::Notification(notification)) => {
                        tracing::debug!(
                            server = %server_name,
                            method = %notification.method,
                            "notification from server"
                        );
                    }
                    Ok(Frame::Request(request)) if request.method == "ping" => {
                        let reply = Response {
                            jsonrpc: JSONRPC_VERSION.to_string(),
                            id: request.id,
                            result: Some(Value::Object(Default::default())),
                            error: None,
                        };
                        if let (Some(sender), Ok(line)) =
                            (writer.upgrade(), serde_json::to_string(&reply))
                        {
                            let _ = sender.send(line).await;
                        }
                    }
                    Ok(Frame::Request(request)) => {
                        tracing::debug!(
                            server = %server_name,
                            method = %request.method,
                            "ignoring unsupported server-to-client request"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(
                            server = %server_name,
                            error = %error,
                            "dropping malformed frame from server stdout"
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(server = %server_name, error = %error, "stdout read failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders completes every waiting request with a
    // transport error.
    pending.lock().expect("pending map poisoned").clear();
    tracing::debug!(server = %server_name, "stdout closed");
}

async fn stderr_loop<E>(server_name: String, stderr: E)
where
    E: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server_name, "stderr: {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpd_core::ErrorKind;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

    struct Harness {
        transport: StdioTransport,
        /// What the fake server reads (daemon's writes).
        server_rx: BufReader<DuplexStream>,
        /// What the fake server writes (daemon's reads).
        server_tx: DuplexStream,
    }

    fn harness() -> Harness {
        let (daemon_stdin, server_rx) = duplex(16 * 1024);
        let (server_tx, daemon_stdout) = duplex(16 * 1024);
        let transport = StdioTransport::attach(
            "mock",
            daemon_stdin,
            daemon_stdout,
            None::<DuplexStream>,
        );
        Harness {
            transport,
            server_rx: BufReader::new(server_rx),
            server_tx,
        }
    }

    async fn read_request(reader: &mut BufReader<DuplexStream>) -> Request {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }

    async fn write_line(writer: &mut DuplexStream, value: &serde_json::Value) {
        let mut line = serde_json::to_string(value).unwrap();
        line.push('\n');
        writer.write_all(line.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let mut h = harness();
        let cancel = CancellationToken::new();

        let server = tokio::spawn(async move {
            let request = read_request(&mut h.server_rx).await;
            assert_eq!(request.method, "tools/list");
            write_line(
                &mut h.server_tx,
                &json!({"jsonrpc": "2.0", "id": request.id, "result": {"tools": []}}),
            )
            .await;
            (h.server_rx, h.server_tx)
        });

        let result = h
            .transport
            .request("tools/list", None, Duration::from_secs(2), &cancel)
            .await
            .unwrap();
        assert_eq!(result["tools"], json!([]));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn writes_are_fifo_in_enqueue_order() {
        let mut h = harness();
        let cancel = CancellationToken::new();
        let transport = Arc::new(h.transport);

        let first = {
            let transport = transport.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                transport
                    .request("first", None, Duration::from_secs(2), &cancel)
                    .await
            })
        };
        // The writer task serializes; the second request must land
        // after the first even though both are in flight.
        let second = {
            let transport = transport.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                transport
                    .request("second", None, Duration::from_secs(2), &cancel)
                    .await
            })
        };

        let a = read_request(&mut h.server_rx).await;
        let b = read_request(&mut h.server_rx).await;
        assert_ne!(a.method, b.method);

        for request in [&a, &b] {
            write_line(
                &mut h.server_tx,
                &json!({"jsonrpc": "2.0", "id": request.id, "result": {}}),
            )
            .await;
        }
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let h = harness();
        let cancel = CancellationToken::new();

        let err = h
            .transport
            .request("tools/call", None, Duration::from_millis(50), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(h.transport.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_returns_cancelled_and_cleans_pending() {
        let h = harness();
        let cancel = CancellationToken::new();

        let pending_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pending_cancel.cancel();
        });

        let err = h
            .transport
            .request("tools/call", None, Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(h.transport.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_stdout_fails_with_transport() {
        let h = harness();
        let cancel = CancellationToken::new();

        drop(h.server_tx);
        // Give the reader task a moment to observe EOF.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.transport.is_closed());

        let err = h
            .transport
            .request("tools/list", None, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_and_later_response_lands() {
        let mut h = harness();
        let cancel = CancellationToken::new();

        let server = tokio::spawn(async move {
            let request = read_request(&mut h.server_rx).await;
            h.server_tx.write_all(b"{broken json\n").await.unwrap();
            write_line(
                &mut h.server_tx,
                &json!({"jsonrpc": "2.0", "id": request.id, "result": {"ok": true}}),
            )
            .await;
            (h.server_rx, h.server_tx)
        });

        let result = h
            .transport
            .request("ping", None, Duration::from_secs(2), &cancel)
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_ping_gets_auto_reply() {
        let mut h = harness();

        write_line(
            &mut h.server_tx,
            &json!({"jsonrpc": "2.0", "id": 42, "method": "ping"}),
        )
        .await;

        let mut line = String::new();
        h.server_rx.read_line(&mut line).await.unwrap();
        let reply: Response = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(reply.id, 42);
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn error_response_maps_to_protocol_error() {
        let mut h = harness();
        let cancel = CancellationToken::new();

        let server = tokio::spawn(async move {
            let request = read_request(&mut h.server_rx).await;
            write_line(
                &mut h.server_tx,
                &json!({
                    "jsonrpc": "2.0",
                    "id": request.id,
                    "error": {"code": -32602, "message": "bad arguments"},
                }),
            )
            .await;
            (h.server_rx, h.server_tx)
        });

        let err = h
            .transport
            .request("tools/call", None, Duration::from_secs(2), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolError);
        assert!(err.to_string().contains("bad arguments"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn close_stdin_retires_the_writer() {
        let mut h = harness();
        h.transport.close_stdin();

        let mut line = String::new();
        // Writer shut down: the fake server sees EOF.
        let bytes = h.server_rx.read_line(&mut line).await.unwrap();
        assert_eq!(bytes, 0);

        let cancel = CancellationToken::new();
        let err = h
            .transport
            .request("ping", None, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);
    }
}
