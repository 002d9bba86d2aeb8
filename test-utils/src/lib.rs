/// Test utilities for integration tests
/// Runs a stand-in dev server on an ephemeral port
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;

/// How the stub answers on `/ws`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StubWsMode {
    /// Replies `{"type":"pong"}` to every ping
    #[default]
    Pong,
    /// Sends unrelated messages before each pong
    ChattyPong,
    /// Accepts the connection but never replies
    Silent,
    /// No `/ws` route, so the handshake gets a 404
    Reject,
}

/// What the stub server does
#[derive(Debug, Clone)]
pub struct StubBehavior {
    pub ready_after: Duration,
    pub ready_status: u16,
    pub not_ready_status: u16,
    pub ws_mode: StubWsMode,
}

impl StubBehavior {
    /// Healthy from the first request
    pub fn ready() -> Self {
        Self::ready_after(Duration::ZERO)
    }

    /// `/health` answers 503 until `delay` has passed
    pub fn ready_after(delay: Duration) -> Self {
        Self {
            ready_after: delay,
            ready_status: 200,
            not_ready_status: 503,
            ws_mode: StubWsMode::default(),
        }
    }

    /// `/health` never reaches the ready status
    pub fn never_ready() -> Self {
        Self::ready_after(Duration::from_secs(24 * 60 * 60))
    }

    pub fn with_ready_status(mut self, status: u16) -> Self {
        self.ready_status = status;
        self
    }

    pub fn with_not_ready_status(mut self, status: u16) -> Self {
        self.not_ready_status = status;
        self
    }

    pub fn with_ws_mode(mut self, mode: StubWsMode) -> Self {
        self.ws_mode = mode;
        self
    }
}

struct StubState {
    behavior: StubBehavior,
    started: Instant,
    health_hits: AtomicUsize,
}

/// Axum server bound to 127.0.0.1 on a free port
///
/// Stopped by `shutdown`, or when the test runtime goes away.
pub struct StubServer {
    addr: SocketAddr,
    state: Arc<StubState>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(behavior: StubBehavior) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind stub server")?;
        let addr = listener.local_addr()?;

        let state = Arc::new(StubState {
            behavior,
            started: Instant::now(),
            health_hits: AtomicUsize::new(0),
        });

        let mut app = Router::new()
            .route("/health", get(health))
            .route("/", get(index))
            .route("/info", get(info));
        if state.behavior.ws_mode != StubWsMode::Reject {
            app = app.route("/ws", get(websocket));
        }
        let app = app
            .with_state(Arc::clone(&state))
            .layer(TraceLayer::new_for_http());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await;
            if let Err(e) = served {
                tracing::error!("Stub server failed: {}", e);
            }
        });

        tracing::debug!("Stub server listening on {}", addr);

        Ok(Self {
            addr,
            state,
            shutdown_tx,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of requests `/health` has served
    pub fn health_hits(&self) -> usize {
        self.state.health_hits.load(Ordering::SeqCst)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// A port nothing is listening on (at the time of the call)
pub fn free_port() -> Result<u16> {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").context("Failed to bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

async fn health(State(state): State<Arc<StubState>>) -> impl IntoResponse {
    state.health_hits.fetch_add(1, Ordering::SeqCst);

    let behavior = &state.behavior;
    let (code, body) = if state.started.elapsed() >= behavior.ready_after {
        (behavior.ready_status, json!({"status": "healthy"}))
    } else {
        (behavior.not_ready_status, json!({"status": "starting"}))
    };

    let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(body))
}

async fn index() -> Html<&'static str> {
    Html("<!doctype html><title>stub</title><p>stub dev server</p>")
}

async fn info() -> Json<serde_json::Value> {
    Json(json!({"name": "stub", "version": "0.1.0"}))
}

async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<StubState>>,
) -> impl IntoResponse {
    let mode = state.behavior.ws_mode;
    ws.on_upgrade(move |socket| handle_socket(socket, mode))
}

async fn handle_socket(mut socket: WebSocket, mode: StubWsMode) {
    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let is_ping = serde_json::from_str::<serde_json::Value>(&text)
            .map(|v| v["type"] == "ping")
            .unwrap_or(false);
        if !is_ping {
            continue;
        }

        let replies: Vec<String> = match mode {
            StubWsMode::Pong => vec![json!({"type": "pong"}).to_string()],
            StubWsMode::ChattyPong => vec![
                json!({"type": "status", "clients": 1}).to_string(),
                "not json".to_string(),
                json!({"type": "pong"}).to_string(),
            ],
            StubWsMode::Silent | StubWsMode::Reject => Vec::new(),
        };

        for reply in replies {
            if socket.send(Message::Text(reply)).await.is_err() {
                return;
            }
        }
    }
}
