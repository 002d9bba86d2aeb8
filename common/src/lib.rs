// Types shared between the devctl CLI and its test fixtures
pub mod error;
pub mod types;

// Convenience re-exports
pub use error::CommonError;
pub use types::{
    CheckReport, ProbeResult, ProbeTarget, ReadinessReport, RouteCheckResult, Scheme,
    StatusPolicy, WsCheckResult, WsMessage,
};
