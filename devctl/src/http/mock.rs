use crate::error::{DevctlError, DevctlResult};
use crate::http::traits::StatusSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// What a mocked endpoint answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockResponse {
    Status(u16),
    Refused,
}

/// Mock implementation of StatusSource for unit testing
///
/// Answers follow a timeline measured from construction on the tokio clock,
/// so tests running with a paused clock get exact timings.
#[derive(Clone)]
pub struct MockStatusSource {
    started: Instant,
    timeline: Vec<(Duration, MockResponse)>,
    latency: Duration,
    routes: Arc<Mutex<HashMap<String, MockResponse>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockStatusSource {
    /// Endpoint that refuses every connection
    pub fn refusing() -> Self {
        Self::with_timeline(vec![(Duration::ZERO, MockResponse::Refused)])
    }

    /// Endpoint that always answers with `status`
    pub fn always(status: u16) -> Self {
        Self::with_timeline(vec![(Duration::ZERO, MockResponse::Status(status))])
    }

    /// Endpoint that refuses connections until `delay` has passed, then answers `status`
    pub fn ready_after(delay: Duration, status: u16) -> Self {
        Self::refusing().then_at(delay, MockResponse::Status(status))
    }

    fn with_timeline(timeline: Vec<(Duration, MockResponse)>) -> Self {
        Self {
            started: Instant::now(),
            timeline,
            latency: Duration::ZERO,
            routes: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Switch to `response` once `at` has elapsed
    pub fn then_at(mut self, at: Duration, response: MockResponse) -> Self {
        self.timeline.push((at, response));
        self.timeline.sort_by_key(|(offset, _)| *offset);
        self
    }

    /// Delay every answer by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fixed answer for URLs starting or ending with `pattern`
    /// (e.g. `"/info"` or `"https://"`), regardless of the timeline
    pub fn set_route(&self, pattern: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(pattern.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn response_for(&self, url: &str) -> MockResponse {
        let routed = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| url.ends_with(pattern.as_str()) || url.starts_with(pattern.as_str()))
            .map(|(_, response)| *response);

        if let Some(response) = routed {
            return response;
        }

        let elapsed = self.started.elapsed();
        self.timeline
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= elapsed)
            .map(|(_, response)| *response)
            .unwrap_or(MockResponse::Refused)
    }
}

impl Default for MockStatusSource {
    fn default() -> Self {
        Self::always(200)
    }
}

#[async_trait]
impl StatusSource for MockStatusSource {
    async fn get_status(&self, url: &str) -> DevctlResult<u16> {
        self.calls.lock().unwrap().push(url.to_string());

        // Decide at request time, answer after the latency
        let response = self.response_for(url);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match response {
            MockResponse::Status(status) => Ok(status),
            MockResponse::Refused => Err(DevctlError::Request(format!(
                "connection refused: {}",
                url
            ))),
        }
    }
}
