use crate::checks::{report_to_result, SecondaryChecks};
use crate::config::Config;
use crate::error::{DevctlError, DevctlResult};
use crate::http::prober::into_ready;
use crate::http::{HttpStatusClient, ReadinessProber, StatusSource};
use crate::pidfile::{PidFile, StopOutcome};
use crate::process::{ManagedProcess, ProcessSpec};
use common::{CheckReport, ProbeResult, ReadinessReport, Scheme};
use nix::sys::signal::Signal;
use serde::Serialize;
use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

/// How results are printed on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    Text,
    Json,
}

/// `devctl status` result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub url: String,
    pub pid: Option<u32>,
    pub status: Option<u16>,
    pub ready: bool,
}

/// Runs the subcommands against one configuration
///
/// The status source is shared between the readiness poll and the route
/// checks so both see the same client settings.
pub struct Runner {
    config: Config,
    prober: ReadinessProber<dyn StatusSource>,
    output: Output,
}

impl Runner {
    pub fn new(config: Config, output: Output) -> DevctlResult<Self> {
        // Auto mode probes https against dev servers with self-signed certs
        let insecure_tls = config.insecure_tls || config.scheme == Scheme::Auto;
        let client = HttpStatusClient::new(config.request_timeout, insecure_tls)?;
        Ok(Self::with_source(config, Arc::new(client), output))
    }

    pub fn with_source(config: Config, source: Arc<dyn StatusSource>, output: Output) -> Self {
        let prober = ReadinessProber::new(source, config.request_timeout);
        Self {
            config,
            prober,
            output,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Readiness only
    pub async fn wait(&self) -> DevctlResult<ProbeResult> {
        let target = self.config.target();
        target.validate()?;

        let readiness = self.prober.probe(&target).await;
        self.emit_readiness(&target.resolve(&readiness).url(), &readiness, None);
        into_ready(&target, readiness)
    }

    /// Readiness, then the secondary checks
    pub async fn check(&self, checks: &SecondaryChecks) -> DevctlResult<CheckReport> {
        let target = self.config.target();
        target.validate()?;

        let readiness = self.prober.probe(&target).await;
        if !readiness.succeeded {
            self.emit_readiness(&target.resolve(&readiness).url(), &readiness, None);
            return into_ready(&target, readiness).map(|_| CheckReport::default());
        }
        let target = target.resolve(&readiness);

        let report = checks
            .run(
                self.prober.source().as_ref(),
                &target,
                self.config.request_timeout,
            )
            .await;
        self.emit_readiness(&target.url(), &readiness, Some(&report));
        report_to_result(&report)?;
        Ok(report)
    }

    /// Pid file state plus a single probe
    pub async fn status(&self) -> DevctlResult<StatusReport> {
        let target = self.config.target();
        let pid = PidFile::new(&self.config.pid_file).running_pid()?;
        let status = self.prober.probe_once(&target).await;

        let report = StatusReport {
            url: target.url(),
            pid,
            status,
            ready: status.is_some_and(|s| target.expected_status.accepts(s)),
        };

        match self.output {
            Output::Json => print_json(&report),
            Output::Text => {
                match report.pid {
                    Some(pid) => println!("process: running (pid {})", pid),
                    None => println!("process: not recorded"),
                }
                match report.status {
                    Some(code) => println!(
                        "{}: {} ({})",
                        report.url,
                        code,
                        if report.ready { "ready" } else { "not ready" }
                    ),
                    None => println!("{}: unreachable", report.url),
                }
            }
        }

        Ok(report)
    }

    /// Start the server, wait for it, and keep it running until `shutdown`
    /// resolves or the server exits. The child is always stopped and the pid
    /// file removed before returning.
    pub async fn run<F>(
        &self,
        spec: &ProcessSpec,
        checks: &SecondaryChecks,
        shutdown: F,
    ) -> DevctlResult<()>
    where
        F: Future<Output = ()>,
    {
        let pid_file = PidFile::new(&self.config.pid_file);
        if let Some(pid) = pid_file.running_pid()? {
            return Err(DevctlError::Process(format!(
                "already running with pid {} (pid file {})",
                pid,
                pid_file.path().display()
            )));
        }

        let mut process = ManagedProcess::start(spec)?;
        pid_file.write(process.pid())?;

        let result = self.supervise(&mut process, checks, shutdown).await;

        let stopped = process.stop(self.config.stop_grace).await;
        if let Err(e) = pid_file.remove() {
            tracing::error!("Failed to remove pid file: {}", e);
        }

        result?;
        stopped.map(|_| ())
    }

    async fn supervise<F>(
        &self,
        process: &mut ManagedProcess,
        checks: &SecondaryChecks,
        shutdown: F,
    ) -> DevctlResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let target = self.config.target();
        target.validate()?;

        let readiness = tokio::select! {
            result = process.wait_ready(&self.prober, &target) => result?,
            _ = &mut shutdown => {
                tracing::info!("Interrupted before the server became ready");
                return Ok(());
            }
        };
        let target = target.resolve(&readiness);

        let report = if checks.is_empty() {
            None
        } else {
            Some(
                checks
                    .run(
                        self.prober.source().as_ref(),
                        &target,
                        self.config.request_timeout,
                    )
                    .await,
            )
        };
        self.emit_readiness(&target.url(), &readiness, report.as_ref());
        if let Some(report) = &report {
            report_to_result(report)?;
        }

        tracing::info!(pid = process.pid(), "Dev server ready, waiting for shutdown");

        tokio::select! {
            status = process.join() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else if stopped_externally(&status) {
                    tracing::info!(pid = process.pid(), %status, "Dev server stopped by signal");
                    Ok(())
                } else {
                    Err(DevctlError::Process(format!(
                        "'{}' exited with {}",
                        process.description(),
                        status
                    )))
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                Ok(())
            }
        }
    }

    /// Stop whatever the pid file points at
    pub async fn stop(&self) -> DevctlResult<StopOutcome> {
        let pid_file = PidFile::new(&self.config.pid_file);
        let outcome = pid_file.stop_recorded(self.config.stop_grace).await?;

        if self.output == Output::Text {
            match outcome {
                StopOutcome::NotRunning => println!("not running"),
                StopOutcome::Stale(pid) => println!("removed stale pid file (pid {})", pid),
                StopOutcome::Terminated(pid) => println!("stopped pid {}", pid),
                StopOutcome::Killed(pid) => println!("killed pid {}", pid),
            }
        }

        Ok(outcome)
    }

    fn emit_readiness(&self, url: &str, readiness: &ProbeResult, checks: Option<&CheckReport>) {
        match self.output {
            Output::Json => print_json(&ReadinessReport {
                url: url.to_string(),
                readiness: readiness.clone(),
                checks: checks.cloned(),
            }),
            Output::Text => {
                println!(
                    "{}: {} after {} attempt(s) in {:.1}s (last status: {})",
                    url,
                    if readiness.succeeded { "ready" } else { "not ready" },
                    readiness.attempts,
                    readiness.elapsed.as_secs_f64(),
                    readiness
                        .last_status
                        .map_or_else(|| "none".to_string(), |s| s.to_string())
                );

                for route in checks.map(|c| c.routes.as_slice()).unwrap_or_default() {
                    println!(
                        "  {} {} ({})",
                        if route.passed { "ok  " } else { "FAIL" },
                        route.url,
                        route
                            .status
                            .map(|s| s.to_string())
                            .or_else(|| route.error.clone())
                            .unwrap_or_default()
                    );
                }

                if let Some(ws) = checks.and_then(|c| c.websocket.as_ref()) {
                    let detail = match (&ws.error, ws.round_trip_ms) {
                        (Some(err), _) => err.clone(),
                        (None, Some(ms)) => format!("pong in {}ms", ms),
                        (None, None) => "open".to_string(),
                    };
                    println!(
                        "  {} {} ({})",
                        if ws.passed { "ok  " } else { "FAIL" },
                        ws.url,
                        detail
                    );
                }
            }
        }
    }
}

/// SIGTERM or SIGINT from outside, e.g. `devctl stop` in another shell
fn stopped_externally(status: &ExitStatus) -> bool {
    matches!(
        status.signal(),
        Some(sig) if sig == Signal::SIGTERM as i32 || sig == Signal::SIGINT as i32
    )
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!("Failed to serialize report: {}", e),
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
