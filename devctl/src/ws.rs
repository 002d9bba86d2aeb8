use crate::error::{DevctlError, DevctlResult};
use common::{ProbeTarget, WsCheckResult, WsMessage};
use futures_util::{SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::protocol::Message};

/// What counts as a healthy WebSocket endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsReadiness {
    /// Handshake completes and the ping is written
    #[default]
    Open,
    /// A `{"type":"pong"}` reply arrives within the message timeout
    Pong,
}

/// One-shot WebSocket handshake plus `ping`/`pong` exchange
#[derive(Debug, Clone, PartialEq)]
pub struct WsCheck {
    pub path: String,
    pub readiness: WsReadiness,
    pub connect_timeout: Duration,
    pub message_timeout: Duration,
}

impl WsCheck {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            readiness: WsReadiness::default(),
            connect_timeout: Duration::from_secs(5),
            message_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_readiness(mut self, readiness: WsReadiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Run the check and describe the outcome; never fails
    pub async fn run(&self, target: &ProbeTarget) -> WsCheckResult {
        let url = target.websocket_url(&self.path);

        match self.exchange(&url).await {
            Ok(round_trip) => {
                tracing::info!(url = %url, pong = round_trip.is_some(), "WebSocket check passed");
                WsCheckResult {
                    url,
                    passed: true,
                    pong_received: round_trip.is_some(),
                    round_trip_ms: round_trip.map(|d| d.as_millis() as u64),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "WebSocket check failed");
                WsCheckResult {
                    url,
                    passed: false,
                    pong_received: false,
                    round_trip_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Run the check, reporting failure as `ProtocolCheckFailed`
    pub async fn check(&self, target: &ProbeTarget) -> DevctlResult<WsCheckResult> {
        let result = self.run(target).await;
        if result.passed {
            Ok(result)
        } else {
            Err(DevctlError::ProtocolCheckFailed(format!(
                "{}: {}",
                result.url,
                result.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }

    /// Returns the ping round trip when a pong was required and received
    async fn exchange(&self, url: &str) -> DevctlResult<Option<Duration>> {
        let (mut ws, _) = time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                DevctlError::ProtocolCheckFailed(format!(
                    "handshake timed out after {:.1}s",
                    self.connect_timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| DevctlError::ProtocolCheckFailed(format!("handshake failed: {}", e)))?;

        tracing::debug!(url = %url, "WebSocket connected");

        let ping = serde_json::to_string(&WsMessage::Ping)
            .map_err(|e| DevctlError::ProtocolCheckFailed(e.to_string()))?;
        let sent_at = Instant::now();
        ws.send(Message::Text(ping))
            .await
            .map_err(|e| DevctlError::ProtocolCheckFailed(format!("failed to send ping: {}", e)))?;

        let outcome = match self.readiness {
            WsReadiness::Open => Ok(None),
            WsReadiness::Pong => match time::timeout(self.message_timeout, wait_for_pong(&mut ws)).await {
                Ok(Ok(())) => Ok(Some(sent_at.elapsed())),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(DevctlError::ProtocolCheckFailed(format!(
                    "no pong within {:.1}s",
                    self.message_timeout.as_secs_f64()
                ))),
            },
        };

        // Best effort, the verdict is already known
        if let Err(e) = ws.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }

        outcome
    }
}

/// Read until a pong arrives, skipping unrelated server messages
async fn wait_for_pong<S>(ws: &mut S) -> DevctlResult<()>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| {
            DevctlError::ProtocolCheckFailed(format!("error while waiting for pong: {}", e))
        })?;

        match msg {
            Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::Pong) => return Ok(()),
                Ok(_) => tracing::debug!(message = %text, "Skipping non-pong message"),
                Err(_) => tracing::debug!(message = %text, "Skipping non-JSON message"),
            },
            Message::Close(frame) => {
                return Err(DevctlError::ProtocolCheckFailed(format!(
                    "server closed the connection before pong ({:?})",
                    frame
                )));
            }
            _ => continue,
        }
    }

    Err(DevctlError::ProtocolCheckFailed(
        "connection ended before pong".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{free_port, StubBehavior, StubServer, StubWsMode};

    fn target_for(server: &StubServer) -> ProbeTarget {
        ProbeTarget::new(server.host(), server.port(), "/health")
    }

    fn pong_check() -> WsCheck {
        WsCheck::new("/ws")
            .with_readiness(WsReadiness::Pong)
            .with_message_timeout(Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_pong_received() {
        let server = StubServer::start(StubBehavior::ready()).await.unwrap();

        let result = pong_check().check(&target_for(&server)).await.unwrap();
        assert!(result.passed);
        assert!(result.pong_received);
        assert!(result.round_trip_ms.is_some());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_pong_after_unrelated_messages() {
        let behavior = StubBehavior::ready().with_ws_mode(StubWsMode::ChattyPong);
        let server = StubServer::start(behavior).await.unwrap();

        let result = pong_check().run(&target_for(&server)).await;
        assert!(result.passed);
        assert!(result.pong_received);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_silent_server_fails_pong_check() {
        let behavior = StubBehavior::ready().with_ws_mode(StubWsMode::Silent);
        let server = StubServer::start(behavior).await.unwrap();

        let err = pong_check().check(&target_for(&server)).await.unwrap_err();
        match err {
            DevctlError::ProtocolCheckFailed(msg) => assert!(msg.contains("no pong")),
            e => panic!("Expected ProtocolCheckFailed, got {:?}", e),
        }

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_silent_server_passes_open_check() {
        let behavior = StubBehavior::ready().with_ws_mode(StubWsMode::Silent);
        let server = StubServer::start(behavior).await.unwrap();

        let result = WsCheck::new("/ws").run(&target_for(&server)).await;
        assert!(result.passed);
        assert!(!result.pong_received);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let behavior = StubBehavior::ready().with_ws_mode(StubWsMode::Reject);
        let server = StubServer::start(behavior).await.unwrap();

        let result = WsCheck::new("/ws").run(&target_for(&server)).await;
        assert!(!result.passed);
        assert!(result.error.unwrap().contains("handshake failed"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_nothing_listening() {
        let port = free_port().unwrap();
        let target = ProbeTarget::new("127.0.0.1", port, "/health");

        let err = WsCheck::new("/ws").check(&target).await.unwrap_err();
        assert!(matches!(err, DevctlError::ProtocolCheckFailed(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
