use crate::error::{DevctlError, DevctlResult};
use crate::http::traits::StatusSource;
use async_trait::async_trait;
use std::time::Duration;

/// Real HTTP client implementation using reqwest
pub struct HttpStatusClient {
    client: reqwest::Client,
}

impl HttpStatusClient {
    /// Create a client with a per-request timeout.
    /// Redirects are not followed so 3xx statuses reach the status policy.
    pub fn new(request_timeout: Duration, insecure_tls: bool) -> DevctlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(insecure_tls)
            .user_agent(concat!("devctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DevctlError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Create from an explicit reqwest::Client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusSource for HttpStatusClient {
    async fn get_status(&self, url: &str) -> DevctlResult<u16> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }
}
