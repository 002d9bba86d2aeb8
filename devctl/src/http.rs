// Module declarations for HTTP status probing
pub mod client;
pub mod mock;
pub mod prober;
pub mod traits;

// Re-exports for convenience
pub use client::HttpStatusClient;
pub use mock::MockStatusSource;
pub use prober::ReadinessProber;
pub use traits::StatusSource;
