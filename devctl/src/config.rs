use crate::checks::{RouteCheck, SecondaryChecks};
use crate::ws::{WsCheck, WsReadiness};
use common::{ProbeTarget, Scheme, StatusPolicy};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded once and handed to each component
#[derive(Debug, Clone)]
pub struct Config {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub health_path: String,
    pub expected_status: StatusPolicy,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub routes: Vec<String>,
    pub ws_path: Option<String>,
    pub ws_readiness: WsReadiness,
    pub ws_message_timeout: Duration,
    pub pid_file: PathBuf,
    pub stop_grace: Duration,
    pub insecure_tls: bool,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let ws_path = env::var("DEVCTL_WS_PATH").unwrap_or_else(|_| "/ws".to_string());
        let require_pong: bool = env::var("DEVCTL_WS_REQUIRE_PONG")
            .unwrap_or_else(|_| "false".to_string())
            .parse()?;

        Ok(Self {
            scheme: env::var("DEVCTL_SCHEME")
                .unwrap_or_else(|_| "http".to_string())
                .parse()?,
            host: env::var("DEVCTL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("DEVCTL_PORT")
                .unwrap_or_else(|_| "8888".to_string())
                .parse()?,
            health_path: env::var("DEVCTL_HEALTH_PATH")
                .unwrap_or_else(|_| "/health".to_string()),
            expected_status: env::var("DEVCTL_EXPECT")
                .unwrap_or_else(|_| "200".to_string())
                .parse()?,
            timeout: secs_from_env("DEVCTL_TIMEOUT_SECS", "30")?,
            poll_interval: secs_from_env("DEVCTL_POLL_INTERVAL_SECS", "1")?,
            request_timeout: secs_from_env("DEVCTL_REQUEST_TIMEOUT_SECS", "5")?,
            routes: env::var("DEVCTL_ROUTES")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            ws_path: Some(ws_path).filter(|p| !p.trim().is_empty()),
            ws_readiness: if require_pong {
                WsReadiness::Pong
            } else {
                WsReadiness::Open
            },
            ws_message_timeout: secs_from_env("DEVCTL_WS_TIMEOUT_SECS", "5")?,
            pid_file: env::var("DEVCTL_PID_FILE")
                .unwrap_or_else(|_| ".devctl.pid".to_string())
                .into(),
            stop_grace: secs_from_env("DEVCTL_STOP_GRACE_SECS", "10")?,
            insecure_tls: env::var("DEVCTL_INSECURE_TLS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Readiness target for the health path
    pub fn target(&self) -> ProbeTarget {
        ProbeTarget::new(self.host.clone(), self.port, self.health_path.clone())
            .with_scheme(self.scheme)
            .with_expected(self.expected_status.clone())
            .with_timeout(self.timeout)
            .with_poll_interval(self.poll_interval)
    }

    pub fn ws_check(&self) -> Option<WsCheck> {
        self.ws_path.as_ref().map(|path| {
            WsCheck::new(path.clone())
                .with_readiness(self.ws_readiness)
                .with_message_timeout(self.ws_message_timeout)
                .with_connect_timeout(self.request_timeout)
        })
    }

    /// Extra routes use the same status policy as the health path
    pub fn secondary_checks(&self) -> SecondaryChecks {
        SecondaryChecks {
            routes: self
                .routes
                .iter()
                .map(|path| RouteCheck::new(path.clone(), self.expected_status.clone()))
                .collect(),
            websocket: self.ws_check(),
        }
    }
}

fn secs_from_env(key: &str, default: &str) -> anyhow::Result<Duration> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    let secs: f64 = raw.trim().parse()?;
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow::anyhow!("{}: {}", key, e))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DEVCTL_SCHEME",
        "DEVCTL_HOST",
        "DEVCTL_PORT",
        "DEVCTL_HEALTH_PATH",
        "DEVCTL_EXPECT",
        "DEVCTL_TIMEOUT_SECS",
        "DEVCTL_POLL_INTERVAL_SECS",
        "DEVCTL_REQUEST_TIMEOUT_SECS",
        "DEVCTL_ROUTES",
        "DEVCTL_WS_PATH",
        "DEVCTL_WS_REQUIRE_PONG",
        "DEVCTL_WS_TIMEOUT_SECS",
        "DEVCTL_PID_FILE",
        "DEVCTL_STOP_GRACE_SECS",
        "DEVCTL_INSECURE_TLS",
        "RUST_LOG",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env();

        let config = Config::from_env().unwrap();

        assert_eq!(config.scheme, Scheme::Http);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8888);
        assert_eq!(config.health_path, "/health");
        assert_eq!(config.expected_status, StatusPolicy::exact(200));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.routes.is_empty());
        assert_eq!(config.ws_path.as_deref(), Some("/ws"));
        assert_eq!(config.ws_readiness, WsReadiness::Open);
        assert_eq!(config.pid_file, PathBuf::from(".devctl.pid"));
        assert_eq!(config.stop_grace, Duration::from_secs(10));
        assert!(!config.insecure_tls);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom() {
        clear_env();
        env::set_var("DEVCTL_HOST", "localhost");
        env::set_var("DEVCTL_PORT", "8889");
        env::set_var("DEVCTL_EXPECT", "200,304");
        env::set_var("DEVCTL_TIMEOUT_SECS", "2.5");
        env::set_var("DEVCTL_POLL_INTERVAL_SECS", "0.25");
        env::set_var("DEVCTL_ROUTES", "/, /info ,");
        env::set_var("DEVCTL_WS_REQUIRE_PONG", "true");
        env::set_var("DEVCTL_SCHEME", "auto");
        env::set_var("RUST_LOG", "debug");

        let config = Config::from_env().unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8889);
        assert!(config.expected_status.accepts(304));
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.routes, vec!["/".to_string(), "/info".to_string()]);
        assert_eq!(config.ws_readiness, WsReadiness::Pong);
        assert_eq!(config.log_level, "debug");

        assert_eq!(config.scheme, Scheme::Auto);

        let target = config.target();
        assert_eq!(target.url(), "https://localhost:8889/health");
        assert_eq!(
            target.url_for(Scheme::Http),
            "http://localhost:8889/health"
        );
        assert_eq!(target.timeout, Duration::from_millis(2500));

        let checks = config.secondary_checks();
        assert_eq!(checks.routes.len(), 2);
        assert!(checks.websocket.is_some());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_empty_ws_path_disables_websocket() {
        clear_env();
        env::set_var("DEVCTL_WS_PATH", "");

        let config = Config::from_env().unwrap();
        assert!(config.ws_path.is_none());
        assert!(config.ws_check().is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_invalid_values() {
        clear_env();

        env::set_var("DEVCTL_PORT", "invalid");
        assert!(Config::from_env().is_err());
        env::remove_var("DEVCTL_PORT");

        env::set_var("DEVCTL_EXPECT", "ok");
        assert!(Config::from_env().is_err());
        env::remove_var("DEVCTL_EXPECT");

        env::set_var("DEVCTL_TIMEOUT_SECS", "-1");
        assert!(Config::from_env().is_err());
        env::remove_var("DEVCTL_TIMEOUT_SECS");

        env::set_var("DEVCTL_SCHEME", "ftp");
        assert!(Config::from_env().is_err());

        clear_env();
    }
}
