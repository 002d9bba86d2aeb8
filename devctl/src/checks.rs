use crate::error::{DevctlError, DevctlResult};
use crate::http::StatusSource;
use crate::ws::WsCheck;
use common::{CheckReport, ProbeTarget, RouteCheckResult, StatusPolicy};
use std::time::Duration;
use tokio::time;

/// An additional HTTP route that must answer with an accepted status
#[derive(Debug, Clone, PartialEq)]
pub struct RouteCheck {
    pub path: String,
    pub expected: StatusPolicy,
}

impl RouteCheck {
    pub fn new(path: impl Into<String>, expected: StatusPolicy) -> Self {
        Self {
            path: path.into(),
            expected,
        }
    }
}

/// Checks run once the server is ready
///
/// Each route gets exactly one GET, then the WebSocket check runs if
/// configured. Nothing is retried.
#[derive(Debug, Clone, Default)]
pub struct SecondaryChecks {
    pub routes: Vec<RouteCheck>,
    pub websocket: Option<WsCheck>,
}

impl SecondaryChecks {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.websocket.is_none()
    }

    pub async fn run<S: StatusSource + ?Sized>(
        &self,
        source: &S,
        target: &ProbeTarget,
        request_timeout: Duration,
    ) -> CheckReport {
        let mut routes = Vec::with_capacity(self.routes.len());

        for route in &self.routes {
            let route_target = target.for_route(&route.path, route.expected.clone());
            let url = route_target.url();

            let (status, error) =
                match time::timeout(request_timeout, source.get_status(&url)).await {
                    Ok(Ok(status)) => (Some(status), None),
                    Ok(Err(e)) => (None, Some(e.to_string())),
                    Err(_) => (None, Some("request timed out".to_string())),
                };
            let passed = status.is_some_and(|s| route.expected.accepts(s));

            if passed {
                tracing::info!(url = %url, status = ?status, "Route check passed");
            } else {
                tracing::warn!(url = %url, status = ?status, error = ?error, "Route check failed");
            }

            routes.push(RouteCheckResult {
                path: route_target.path,
                url,
                status,
                passed,
                error,
            });
        }

        let websocket = match &self.websocket {
            Some(check) => Some(check.run(target).await),
            None => None,
        };

        CheckReport { routes, websocket }
    }
}

/// Turn a report into the distinct failure conditions.
/// A WebSocket failure wins over route failures.
pub fn report_to_result(report: &CheckReport) -> DevctlResult<()> {
    if let Some(ws) = report.websocket.as_ref().filter(|ws| !ws.passed) {
        return Err(DevctlError::ProtocolCheckFailed(format!(
            "{}: {}",
            ws.url,
            ws.error.as_deref().unwrap_or("unknown error")
        )));
    }

    let failed: Vec<String> = report
        .failed_routes()
        .map(|r| match r.status {
            Some(status) => format!("{} returned {}", r.path, status),
            None => format!(
                "{} unreachable ({})",
                r.path,
                r.error.as_deref().unwrap_or("no response")
            ),
        })
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(DevctlError::RouteCheckFailed(failed.join(", ")))
    }
}
