use crate::error::{DevctlError, DevctlResult};
use crate::http::{ReadinessProber, StatusSource};
use common::{ProbeResult, ProbeTarget};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time;

/// How to launch the dev server
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// First word is the program, the rest are arguments
    pub fn from_command_line(words: &[String]) -> DevctlResult<Self> {
        let (program, args) = words
            .split_first()
            .ok_or_else(|| DevctlError::Process("no command given".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            ..Default::default()
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Owned handle to a spawned dev server
///
/// Lifecycle: `start` → `wait_ready` → `stop` or `join`. The child is killed
/// if the handle is dropped while it is still running.
pub struct ManagedProcess {
    child: Child,
    pid: u32,
    description: String,
}

impl ManagedProcess {
    pub fn start(spec: &ProcessSpec) -> DevctlResult<Self> {
        let description = spec.display();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| DevctlError::Process(format!("failed to start '{}': {}", description, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| DevctlError::Process(format!("'{}' exited immediately", description)))?;

        tracing::info!(pid, command = %description, "Started process");

        Ok(Self {
            child,
            pid,
            description,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_running(&mut self) -> DevctlResult<bool> {
        Ok(self.child.try_wait()?.is_none())
    }

    /// Poll the target until ready, failing early if the child exits first
    pub async fn wait_ready<T: StatusSource + ?Sized>(
        &mut self,
        prober: &ReadinessProber<T>,
        target: &ProbeTarget,
    ) -> DevctlResult<ProbeResult> {
        tokio::select! {
            result = prober.wait_ready(target) => result,
            status = self.child.wait() => {
                let status = status?;
                Err(DevctlError::Process(format!(
                    "'{}' exited with {} before becoming ready",
                    self.description, status
                )))
            }
        }
    }

    /// SIGTERM, then SIGKILL once `grace` has passed
    pub async fn stop(&mut self, grace: Duration) -> DevctlResult<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            tracing::debug!(pid = self.pid, %status, "Process already exited");
            return Ok(status);
        }

        tracing::info!(pid = self.pid, grace_secs = grace.as_secs_f64(), "Stopping process");
        send_signal(self.pid, Signal::SIGTERM)?;

        match time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::info!(pid = self.pid, %status, "Process stopped");
                Ok(status)
            }
            Err(_) => {
                tracing::warn!(pid = self.pid, "Process ignored SIGTERM, killing");
                self.child.start_kill()?;
                let status = self.child.wait().await?;
                Ok(status)
            }
        }
    }

    /// Wait for the process to exit on its own
    pub async fn join(&mut self) -> DevctlResult<ExitStatus> {
        let status = self.child.wait().await?;
        tracing::info!(pid = self.pid, %status, "Process exited");
        Ok(status)
    }
}

/// Send `signal` to `pid`. Returns false if the process no longer exists.
pub(crate) fn send_signal(pid: u32, signal: Signal) -> DevctlResult<bool> {
    let raw = i32::try_from(pid)
        .map_err(|_| DevctlError::Process(format!("invalid pid: {}", pid)))?;

    match signal::kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockStatusSource;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::Arc;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh").arg("-c").arg(script)
    }

    fn target() -> ProbeTarget {
        ProbeTarget::new("127.0.0.1", 8888, "/health")
            .with_timeout(Duration::from_secs(30))
            .with_poll_interval(Duration::from_millis(100))
    }

    #[test]
    fn test_spec_from_command_line() {
        let words: Vec<String> = ["python3", "-m", "http.server", "8888"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let spec = ProcessSpec::from_command_line(&words).unwrap();
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args, vec!["-m", "http.server", "8888"]);
        assert_eq!(spec.display(), "python3 -m http.server 8888");

        assert!(ProcessSpec::from_command_line(&[]).is_err());
    }

    #[tokio::test]
    async fn test_start_missing_program() {
        let result = ManagedProcess::start(&ProcessSpec::new("/nonexistent/dev-server"));
        match result {
            Err(DevctlError::Process(msg)) => assert!(msg.contains("failed to start")),
            Err(e) => panic!("Expected Process error, got {:?}", e),
            Ok(_) => panic!("Expected Process error, got a running process"),
        }
    }

    #[tokio::test]
    async fn test_stop_sends_sigterm() {
        let mut process = ManagedProcess::start(&ProcessSpec::new("sleep").arg("30")).unwrap();
        assert!(process.is_running().unwrap());

        let status = process.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
        assert!(!process.is_running().unwrap());

        // Stopping again reports the same exit
        let again = process.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(again.signal(), Some(Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let mut process = ManagedProcess::start(&sh("trap '' TERM; sleep 5")).unwrap();
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = process.stop(Duration::from_millis(200)).await.unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn test_join_reports_exit_code() {
        let mut process = ManagedProcess::start(&sh("exit 3")).unwrap();
        let status = process.join().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let spec = sh("test \"$DEVCTL_TEST_VALUE\" = ok && test \"$(pwd)\" = \"$EXPECTED_DIR\"")
            .env("DEVCTL_TEST_VALUE", "ok")
            .env(
                "EXPECTED_DIR",
                dir.path().canonicalize().unwrap().to_string_lossy(),
            )
            .current_dir(dir.path().canonicalize().unwrap());

        let mut process = ManagedProcess::start(&spec).unwrap();
        let status = process.join().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_wait_ready_fails_when_child_exits() {
        let prober = ReadinessProber::new(
            Arc::new(MockStatusSource::refusing()),
            Duration::from_secs(1),
        );
        let mut process = ManagedProcess::start(&sh("exit 1")).unwrap();

        let err = process.wait_ready(&prober, &target()).await.unwrap_err();
        match err {
            DevctlError::Process(msg) => assert!(msg.contains("before becoming ready")),
            e => panic!("Expected Process error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_wait_ready_then_stop() {
        let prober = ReadinessProber::new(
            Arc::new(MockStatusSource::ready_after(Duration::from_millis(200), 200)),
            Duration::from_secs(1),
        );
        let mut process = ManagedProcess::start(&ProcessSpec::new("sleep").arg("30")).unwrap();

        let result = process.wait_ready(&prober, &target()).await.unwrap();
        assert!(result.succeeded);
        assert!(result.attempts >= 2);

        process.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[test]
    fn test_send_signal_to_missing_process() {
        // Far above any kernel's pid_max
        assert!(!send_signal(i32::MAX as u32, Signal::SIGTERM).unwrap());
    }
}
