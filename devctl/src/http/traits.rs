use crate::error::DevctlResult;
use async_trait::async_trait;

/// Abstraction over "GET a URL and report its status" to enable testing with mocks
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Issue one GET and return the response status code.
    /// Connection and transport failures are errors, any HTTP status is `Ok`.
    async fn get_status(&self, url: &str) -> DevctlResult<u16>;
}
