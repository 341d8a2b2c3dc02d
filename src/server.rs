//! Single-slot blocking HTTP transaction server.
//!
//! The listener accepts requests on its own tasks and offers each one into
//! a bounded FIFO hand-off channel; a single consumer pulls transactions
//! with [`BlockingHttpServer::receive`] and answers them later through the
//! [`PendingRequest`] handle. The channel is the only synchronization
//! primitive between the accepting side and the consuming side.

use crate::error::{Result, WsError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_PATH: &str = "/";
pub const DEFAULT_QUEUE_SIZE: usize = 3;
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(30);

/// One received HTTP transaction: the request data plus the open response
/// sink of its connection.
///
/// Exclusively owned by the hand-off channel until dequeued, then by the
/// consumer until it responds (which consumes the handle) or drops it
/// (which abandons the connection without a response).
#[derive(Debug)]
pub struct PendingRequest {
    client_addr: SocketAddr,
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Bytes,
    body_text: OnceLock<String>,
    respond_tx: oneshot::Sender<String>,
}

impl PendingRequest {
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flattened single-value headers, first value per name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body decoded to a string, lazily on first read and cached.
    pub fn body_text(&self) -> &str {
        self.body_text.get_or_init(|| String::from_utf8_lossy(&self.body).into_owned())
    }

    /// Answer the transaction: a fixed 200 status with the given body, then
    /// the connection closes. Fails when the client already went away.
    pub fn respond(self, body: impl Into<String>) -> Result<()> {
        self.respond_tx.send(body.into()).map_err(|_| {
            WsError::Transport("connection closed before the response could be sent".to_string())
        })
    }
}

/// Cancels a blocked [`BlockingHttpServer::receive`] from elsewhere (for
/// example a signal handler).
#[derive(Clone)]
pub struct CancelHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }
}

struct Running {
    requests: mpsc::Receiver<PendingRequest>,
    shutdown: Arc<watch::Sender<bool>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// HTTP listener with a bounded hand-off queue and a single consumer.
///
/// `receive` takes `&mut self`: the single-consumer contract is enforced by
/// ownership rather than a runtime lock.
pub struct BlockingHttpServer {
    host: String,
    port: u16,
    path: String,
    queue_size: usize,
    offer_timeout: Duration,
    running: Option<Running>,
}

impl BlockingHttpServer {
    /// Create a stopped server. Empty host/path fall back to the defaults;
    /// port 0 binds an ephemeral port (see [`local_addr`](Self::local_addr)).
    pub fn new(host: &str, port: u16, path: &str) -> Self {
        Self {
            host: if host.is_empty() { DEFAULT_HOST.to_string() } else { host.to_string() },
            port,
            path: if path.is_empty() { DEFAULT_PATH.to_string() } else { path.to_string() },
            queue_size: DEFAULT_QUEUE_SIZE,
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
            running: None,
        }
    }

    /// Hand-off queue capacity. Values below 1 keep the default.
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        if queue_size > 0 {
            self.queue_size = queue_size;
        }
        self
    }

    /// How long the network side waits for queue space before dropping a
    /// request.
    pub fn offer_timeout(mut self, offer_timeout: Duration) -> Self {
        if !offer_timeout.is_zero() {
            self.offer_timeout = offer_timeout;
        }
        self
    }

    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }

    /// The actually bound address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// A handle that cancels a blocked `receive`, while started.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.running
            .as_ref()
            .map(|running| CancelHandle { shutdown: running.shutdown.clone() })
    }

    /// Bind the listener and start accepting transactions.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(WsError::Configuration("HTTP server is already started".to_string()));
        }

        let address = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| WsError::Transport(format!("could not bind {address}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| WsError::Transport(e.to_string()))?;

        let (request_tx, request_rx) = mpsc::channel(self.queue_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            request_tx,
            shutdown_rx,
            self.path.clone(),
            self.offer_timeout,
        ));

        info!(address = %local_addr, path = %self.path, "HTTP server started");
        self.running = Some(Running {
            requests: request_rx,
            shutdown: Arc::new(shutdown_tx),
            local_addr,
            accept_task,
        });
        Ok(())
    }

    /// Wait up to `timeout` for the next transaction, in arrival order.
    ///
    /// Fails immediately with [`WsError::NotStarted`] when the server is
    /// stopped, with [`WsError::ReceiveTimeout`] when nothing arrives in
    /// time, and with [`WsError::Cancelled`] when cancelled while blocked.
    pub async fn receive(&mut self, timeout: Duration) -> Result<PendingRequest> {
        let running = self.running.as_mut().ok_or(WsError::NotStarted)?;

        let mut shutdown = running.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(WsError::Cancelled);
        }
        tokio::select! {
            _ = shutdown.changed() => Err(WsError::Cancelled),
            received = tokio::time::timeout(timeout, running.requests.recv()) => {
                match received {
                    Ok(Some(request)) => Ok(request),
                    Ok(None) => Err(WsError::Transport("listener task ended".to_string())),
                    Err(_) => Err(WsError::ReceiveTimeout(timeout.as_millis() as u64)),
                }
            }
        }
    }

    /// Stop the listener, discarding any queued transactions. Idempotent.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            running.accept_task.abort();
            info!("HTTP server stopped");
        }
    }
}

impl Drop for BlockingHttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    request_tx: mpsc::Sender<PendingRequest>,
    mut shutdown: watch::Receiver<bool>,
    context_path: String,
    offer_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("listener shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, client_addr)) => {
                        let request_tx = request_tx.clone();
                        let context_path = context_path.clone();
                        tokio::spawn(serve_connection(
                            stream,
                            client_addr,
                            request_tx,
                            context_path,
                            offer_timeout,
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    client_addr: SocketAddr,
    request_tx: mpsc::Sender<PendingRequest>,
    context_path: String,
    offer_timeout: Duration,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |request: Request<Incoming>| {
        let request_tx = request_tx.clone();
        let context_path = context_path.clone();
        async move {
            handle_request(request, client_addr, request_tx, &context_path, offer_timeout).await
        }
    });

    if let Err(e) =
        hyper::server::conn::http1::Builder::new().serve_connection(io, service).await
    {
        debug!(client = %client_addr, error = %e, "connection ended");
    }
}

/// Turn one parsed request into a [`PendingRequest`], offer it to the
/// consumer, then wait for the scripted response. Returning an error closes
/// the connection without any response on the wire.
async fn handle_request(
    request: Request<Incoming>,
    client_addr: SocketAddr,
    request_tx: mpsc::Sender<PendingRequest>,
    context_path: &str,
    offer_timeout: Duration,
) -> std::result::Result<Response<Full<Bytes>>, WsError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    if !path.starts_with(context_path) {
        debug!(client = %client_addr, path = %path, "request outside context path");
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Ok(response);
    }

    let body = body
        .collect()
        .await
        .map_err(|e| WsError::Transport(e.to_string()))?
        .to_bytes();

    let (respond_tx, respond_rx) = oneshot::channel();
    let pending = PendingRequest {
        client_addr,
        method: parts.method.to_string(),
        path,
        headers: flatten_headers(&parts.headers),
        body,
        body_text: OnceLock::new(),
        respond_tx,
    };

    match request_tx.send_timeout(pending, offer_timeout).await {
        Ok(()) => {}
        Err(mpsc::error::SendTimeoutError::Timeout(dropped)) => {
            warn!(client = %dropped.client_addr, "hand-off queue full, dropping request");
            return Err(WsError::RequestDropped);
        }
        Err(mpsc::error::SendTimeoutError::Closed(_)) => {
            debug!(client = %client_addr, "server stopped while offering request");
            return Err(WsError::RequestDropped);
        }
    }

    match respond_rx.await {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/xml; charset=utf-8")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| WsError::Transport(e.to_string())),
        Err(_) => Err(WsError::Transport("transaction abandoned without a response".to_string())),
    }
}

/// Flatten headers to a single value per name, first value wins.
fn flatten_headers(headers: &hyper::HeaderMap) -> HashMap<String, String> {
    let mut flattened = HashMap::new();
    for (name, value) in headers {
        flattened
            .entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    flattened
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn started(queue_size: usize, offer_timeout: Duration) -> BlockingHttpServer {
        let mut server = BlockingHttpServer::new("127.0.0.1", 0, "/")
            .queue_size(queue_size)
            .offer_timeout(offer_timeout);
        server.start().await.unwrap();
        server
    }

    /// Raw HTTP exchange over one connection; returns whatever came back.
    async fn send_request(addr: SocketAddr, body: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "POST / HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len(),
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let _ = stream.read_to_end(&mut response).await;
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_receive_before_start_fails_immediately() {
        let mut server = BlockingHttpServer::new("127.0.0.1", 0, "/");
        let started = Instant::now();
        let err = server.receive(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, WsError::NotStarted));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_receive_times_out_with_typed_error() {
        let mut server = started(3, DEFAULT_OFFER_TIMEOUT).await;
        let started_at = Instant::now();
        let err = server.receive(Duration::from_millis(1000)).await.unwrap_err();
        let elapsed = started_at.elapsed();

        assert!(matches!(err, WsError::ReceiveTimeout(1000)));
        assert!(err.is_transport());
        assert!(elapsed >= Duration::from_millis(900), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3000), "returned too late: {elapsed:?}");
        server.stop();
    }

    #[tokio::test]
    async fn test_transaction_round_trip() {
        let mut server = started(3, DEFAULT_OFFER_TIMEOUT).await;
        let addr = server.local_addr().unwrap();

        let client = tokio::spawn(async move { send_request(addr, "<ping/>").await });

        let request = server.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/");
        assert_eq!(request.body_text(), "<ping/>");
        assert!(request.headers().contains_key("host"));

        request.respond("<pong/>").unwrap();
        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("<pong/>"));
        server.stop();
    }

    #[tokio::test]
    async fn test_requests_are_delivered_in_arrival_order() {
        let mut server = started(3, DEFAULT_OFFER_TIMEOUT).await;
        let addr = server.local_addr().unwrap();

        let first = tokio::spawn(async move { send_request(addr, "<n>1</n>").await });
        let one = server.receive(Duration::from_secs(5)).await.unwrap();
        let second = tokio::spawn(async move { send_request(addr, "<n>2</n>").await });
        let two = server.receive(Duration::from_secs(5)).await.unwrap();

        assert_eq!(one.body_text(), "<n>1</n>");
        assert_eq!(two.body_text(), "<n>2</n>");

        one.respond("<ok>1</ok>").unwrap();
        two.respond("<ok>2</ok>").unwrap();
        assert!(first.await.unwrap().ends_with("<ok>1</ok>"));
        assert!(second.await.unwrap().ends_with("<ok>2</ok>"));
        server.stop();
    }

    #[tokio::test]
    async fn test_full_queue_drops_excess_request_without_response() {
        // Capacity 1 and a short backpressure window: the second request
        // must be dropped, its client seeing the connection close with no
        // status line at all.
        let mut server = started(1, Duration::from_millis(200)).await;
        let addr = server.local_addr().unwrap();

        let first = tokio::spawn(async move { send_request(addr, "<n>1</n>").await });
        // Let the first request occupy the queue before sending the second.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = tokio::spawn(async move { send_request(addr, "<n>2</n>").await });

        let dropped = second.await.unwrap();
        assert!(dropped.is_empty(), "dropped request still got a response: {dropped}");

        let held = server.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(held.body_text(), "<n>1</n>");
        held.respond("<ok/>").unwrap();
        assert!(first.await.unwrap().starts_with("HTTP/1.1 200"));

        // Nothing else may be queued.
        let err = server.receive(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, WsError::ReceiveTimeout(_)));
        server.stop();
    }

    #[tokio::test]
    async fn test_request_outside_context_path_is_rejected() {
        let mut server = BlockingHttpServer::new("127.0.0.1", 0, "/service");
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        let response = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /other HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut out = Vec::new();
            let _ = stream.read_to_end(&mut out).await;
            String::from_utf8_lossy(&out).into_owned()
        })
        .await
        .unwrap();

        assert!(response.starts_with("HTTP/1.1 404"));
        let err = server.receive(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, WsError::ReceiveTimeout(_)));
        server.stop();
    }

    #[tokio::test]
    async fn test_abandoned_request_closes_connection_without_response() {
        let mut server = started(3, DEFAULT_OFFER_TIMEOUT).await;
        let addr = server.local_addr().unwrap();

        let client = tokio::spawn(async move { send_request(addr, "<ping/>").await });
        let request = server.receive(Duration::from_secs(5)).await.unwrap();
        drop(request);

        let response = client.await.unwrap();
        assert!(response.is_empty());
        server.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_invalidates_receive() {
        let mut server = started(3, DEFAULT_OFFER_TIMEOUT).await;
        server.stop();
        server.stop();
        let err = server.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, WsError::NotStarted));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_receive() {
        let mut server = started(3, DEFAULT_OFFER_TIMEOUT).await;
        let cancel = server.cancel_handle().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started_at = Instant::now();
        let err = server.receive(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, WsError::Cancelled));
        assert!(started_at.elapsed() < Duration::from_secs(5));
        server.stop();
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let mut server = started(3, DEFAULT_OFFER_TIMEOUT).await;
        server.stop();
        server.start().await.unwrap();
        assert!(server.is_started());

        let addr = server.local_addr().unwrap();
        let client = tokio::spawn(async move { send_request(addr, "<again/>").await });
        let request = server.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(request.body_text(), "<again/>");
        request.respond("<ok/>").unwrap();
        client.await.unwrap();
        server.stop();
    }
}
