use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// URL scheme of the probed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
    /// Try https first, fall back to http, keep whichever answers
    Auto,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Auto => "auto",
        }
    }

    /// Concrete schemes to try on each attempt, in order
    pub fn candidates(&self) -> &'static [Scheme] {
        match self {
            Scheme::Http => &[Scheme::Http],
            Scheme::Https => &[Scheme::Https],
            Scheme::Auto => &[Scheme::Https, Scheme::Http],
        }
    }

    /// Scheme used for URLs before anything has answered
    pub fn preferred(&self) -> Scheme {
        self.candidates()[0]
    }

    /// Matching WebSocket scheme (`ws` or `wss`)
    pub fn websocket(&self) -> &'static str {
        match self.preferred() {
            Scheme::Https => "wss",
            _ => "ws",
        }
    }
}

impl FromStr for Scheme {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "auto" => Ok(Scheme::Auto),
            other => Err(CommonError::InvalidData(format!(
                "unsupported scheme: {}",
                other
            ))),
        }
    }
}

/// Set of HTTP status codes that count as "ready"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u16>", into = "Vec<u16>")]
pub struct StatusPolicy(BTreeSet<u16>);

impl StatusPolicy {
    pub fn exact(code: u16) -> Self {
        Self(BTreeSet::from([code]))
    }

    /// 200 or 304, for endpoints that may answer from cache
    pub fn ok_or_not_modified() -> Self {
        Self(BTreeSet::from([200, 304]))
    }

    pub fn from_codes<I: IntoIterator<Item = u16>>(codes: I) -> Result<Self, CommonError> {
        let set: BTreeSet<u16> = codes.into_iter().collect();

        if set.is_empty() {
            return Err(CommonError::InvalidData(
                "status policy needs at least one code".to_string(),
            ));
        }

        if let Some(bad) = set.iter().find(|code| !(100..=599).contains(*code)) {
            return Err(CommonError::InvalidData(format!(
                "not an HTTP status code: {}",
                bad
            )));
        }

        Ok(Self(set))
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.0.contains(&status)
    }

    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self::exact(200)
    }
}

impl TryFrom<Vec<u16>> for StatusPolicy {
    type Error = CommonError;

    fn try_from(codes: Vec<u16>) -> Result<Self, Self::Error> {
        Self::from_codes(codes)
    }
}

impl From<StatusPolicy> for Vec<u16> {
    fn from(policy: StatusPolicy) -> Self {
        policy.0.into_iter().collect()
    }
}

impl FromStr for StatusPolicy {
    type Err = CommonError;

    /// Parses a comma separated list such as `"200,304"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let codes = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u16>().map_err(|_| {
                    CommonError::InvalidData(format!("invalid status code: {}", part))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_codes(codes)
    }
}

impl fmt::Display for StatusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", codes.join(","))
    }
}

/// What to probe and for how long. Built once per probe run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub expected_status: StatusPolicy,
    #[serde(rename = "timeout_seconds", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(rename = "poll_interval_seconds", with = "duration_secs")]
    pub poll_interval: Duration,
}

impl ProbeTarget {
    /// Plain HTTP target expecting 200, 30s deadline, 1s interval
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Http,
            host: host.into(),
            port,
            path: normalize_path(&path.into()),
            expected_status: StatusPolicy::default(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_expected(mut self, expected: StatusPolicy) -> Self {
        self.expected_status = expected;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Same server, different path and policy
    pub fn for_route(&self, path: &str, expected: StatusPolicy) -> Self {
        Self {
            path: normalize_path(path),
            expected_status: expected,
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url_for(self.scheme.preferred())
    }

    pub fn base_url_for(&self, scheme: Scheme) -> String {
        format!("{}://{}:{}", scheme.as_str(), self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.base_url(), self.path)
    }

    pub fn url_for(&self, scheme: Scheme) -> String {
        format!("{}{}", self.base_url_for(scheme), self.path)
    }

    /// Pin the scheme that answered during a probe run
    pub fn resolve(&self, result: &ProbeResult) -> Self {
        match result.scheme {
            Some(scheme) => self.clone().with_scheme(scheme),
            None => self.clone(),
        }
    }

    pub fn websocket_url(&self, path: &str) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme.websocket(),
            self.host,
            self.port,
            normalize_path(path)
        )
    }

    pub fn validate(&self) -> Result<(), CommonError> {
        if self.host.trim().is_empty() {
            return Err(CommonError::InvalidData("host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(CommonError::InvalidData("port must be non-zero".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(CommonError::InvalidData(
                "poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Outcome of one readiness probe run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub succeeded: bool,
    pub attempts: u32,
    pub last_status: Option<u16>,
    /// Scheme that produced `last_status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<Scheme>,
    #[serde(rename = "elapsed_seconds", with = "duration_secs")]
    pub elapsed: Duration,
}

/// JSON messages exchanged on the server's WebSocket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Ping,
    Pong,
    #[serde(other)]
    Other,
}

/// Result of a single GET against an additional route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCheckResult {
    pub path: String,
    pub url: String,
    pub status: Option<u16>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of the WebSocket handshake / ping check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsCheckResult {
    pub url: String,
    pub passed: bool,
    pub pong_received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_trip_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub routes: Vec<RouteCheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WsCheckResult>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.routes.iter().all(|r| r.passed)
            && self.websocket.as_ref().map_or(true, |ws| ws.passed)
    }

    pub fn failed_routes(&self) -> impl Iterator<Item = &RouteCheckResult> {
        self.routes.iter().filter(|r| !r.passed)
    }
}

/// Everything `devctl` knows after a run, printed with `--json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub url: String,
    pub readiness: ProbeResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckReport>,
}

/// Serializes a `Duration` as float seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
