//! [`CockpitServer`] – HTTP + WebSocket server for the rover control page.
//!
//! Listens on `0.0.0.0:8000` (configurable via [`CockpitServer::with_addr`]).
//!
//! * `GET /` → 200 OK with the control page.
//! * WebSocket upgrade on `/ws` → one supervised rover session per connection.
//! * Anything else → 404.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lunar_middleware::{BusGateway, SessionSupervisor};
use lunar_types::{BridgeError, SessionConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

/// Default TCP port for the HTTP/WebSocket server.
pub const DEFAULT_PORT: u16 = 8000;

/// The compiled-in control page (HTML + CSS + JS).
const CONTROL_HTML: &str = include_str!("control.html");

/// How long a client may take to send its full request head.
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(5);
const PEEK_RETRY: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Lightweight HTTP + WebSocket server that serves the control page and runs
/// a [`SessionSupervisor`] for every WebSocket client.
pub struct CockpitServer {
    supervisor: SessionSupervisor,
    addr: SocketAddr,
    control_page: Option<PathBuf>,
}

impl CockpitServer {
    /// Create a server publishing through `gateway` on `0.0.0.0:`[`DEFAULT_PORT`].
    pub fn new(gateway: Arc<dyn BusGateway>, session: SessionConfig) -> Self {
        Self {
            supervisor: SessionSupervisor::new(gateway, session),
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            control_page: None,
        }
    }

    /// Override the listening address (builder-style).
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Override only the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Serve this HTML file instead of the embedded page.
    pub fn with_control_page(mut self, path: Option<PathBuf>) -> Self {
        self.control_page = path;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the configured address and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Server`] if the TCP listener cannot bind and
    /// [`BridgeError::Config`] if the control page file cannot be read.
    pub async fn run(self) -> Result<(), BridgeError> {
        let addr = self.addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Server(format!("bind error on {addr}: {e}")))?;

        info!(%addr, "control page listening on http://{addr}/");
        self.serve(listener).await
    }

    /// Serve connections from an already bound `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), BridgeError> {
        let page = load_control_page(self.control_page.as_deref()).await?;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let supervisor = self.supervisor.clone();
                    let page = Arc::clone(&page);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, supervisor, page).await {
                            error!(%peer, error = %e, "client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }
}

async fn load_control_page(path: Option<&Path>) -> Result<Arc<str>, BridgeError> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map(Arc::from)
            .map_err(|e| {
                BridgeError::Config(format!("cannot read control page {}: {e}", path.display()))
            }),
        None => Ok(Arc::from(CONTROL_HTML)),
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Route {
    ControlPage,
    Session,
    NotFound,
}

/// Pick a route from the head of an HTTP request.
fn route(request_head: &str) -> Route {
    let mut lines = request_head.lines();
    let target = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("");
    let path = target.split('?').next().unwrap_or(target);
    let is_ws_upgrade = lines.any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    match (path, is_ws_upgrade) {
        ("/ws", true) => Route::Session,
        ("/" | "/index.html", false) => Route::ControlPage,
        _ => Route::NotFound,
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    supervisor: SessionSupervisor,
    page: Arc<str>,
) -> Result<(), BridgeError> {
    // Peek so tungstenite's handshaker still sees the full request.
    let mut buf = [0u8; 4096];
    let n = peek_request_head(&stream, &mut buf)
        .await
        .map_err(|e| BridgeError::Server(format!("peek error from {peer}: {e}")))?;
    if n == 0 {
        return Ok(());
    }

    match route(&String::from_utf8_lossy(&buf[..n])) {
        Route::Session => handle_ws(stream, peer, supervisor).await,
        Route::ControlPage => {
            consume(&mut stream, n).await?;
            respond(&mut stream, "200 OK", "text/html; charset=utf-8", &page).await
        }
        Route::NotFound => {
            debug!(%peer, "no route");
            consume(&mut stream, n).await?;
            respond(&mut stream, "404 Not Found", "text/plain; charset=utf-8", "not found\n").await
        }
    }
}

/// Peek until the request head is complete, the buffer is full, the client
/// hangs up, or [`REQUEST_HEAD_TIMEOUT`] passes. Returns the bytes available.
async fn peek_request_head(stream: &TcpStream, buf: &mut [u8]) -> std::io::Result<usize> {
    let deadline = tokio::time::Instant::now() + REQUEST_HEAD_TIMEOUT;
    loop {
        let n = stream.peek(buf).await?;
        let complete = buf[..n].windows(4).any(|w| w == b"\r\n\r\n");
        if n == 0 || complete || n == buf.len() || tokio::time::Instant::now() >= deadline {
            return Ok(n);
        }
        tokio::time::sleep(PEEK_RETRY).await;
    }
}

// Drain the peeked request so closing the socket does not reset it.
async fn consume(stream: &mut TcpStream, n: usize) -> Result<(), BridgeError> {
    let mut buf = vec![0u8; n];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| BridgeError::Server(format!("HTTP read error: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Plain HTTP
// ---------------------------------------------------------------------------

async fn respond(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), BridgeError> {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| BridgeError::Server(format!("HTTP write error: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| BridgeError::Server(format!("HTTP shutdown error: {e}")))
}

// ---------------------------------------------------------------------------
// WebSocket: one rover session
// ---------------------------------------------------------------------------

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    supervisor: SessionSupervisor,
) -> Result<(), BridgeError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| BridgeError::Server(format!("WS handshake from {peer}: {e}")))?;
    info!(%peer, "client connected");

    let (ws_tx, ws_rx) = ws_stream.split();
    let end = supervisor.run(ws_tx, ws_rx).await?;

    match end.fault() {
        Some(fault) => warn!(%peer, cause = end.describe(), error = %fault, "client session closed"),
        None => info!(%peer, cause = end.describe(), "client session closed"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
