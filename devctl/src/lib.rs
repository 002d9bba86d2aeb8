pub mod checks;
pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod pidfile;
pub mod process;
pub mod ws;

// Re-exports for convenience
pub use commands::{Output, Runner};
pub use config::Config;
pub use error::{DevctlError, DevctlResult};
