use crate::error::{DevctlError, DevctlResult};
use crate::http::prober::deadline_after;
use crate::process::send_signal;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{self, Instant};

/// What `stop_recorded` found and did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No pid file
    NotRunning,
    /// Pid file pointed at a dead process and was removed
    Stale(u32),
    /// Exited after SIGTERM
    Terminated(u32),
    /// Needed SIGKILL after the grace period
    Killed(u32),
}

/// PID file for the managed dev server
///
/// `devctl run` records the child's PID here so that a separate
/// `devctl stop` or `devctl status` can find it.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, pid: u32) -> DevctlResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, format!("{}\n", pid))?;
        tracing::debug!(path = %self.path.display(), pid, "Wrote pid file");
        Ok(())
    }

    /// `None` when there is no pid file
    pub fn read(&self) -> DevctlResult<Option<u32>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        contents.trim().parse::<u32>().map(Some).map_err(|_| {
            DevctlError::Process(format!(
                "invalid pid file {}: {:?}",
                self.path.display(),
                contents.trim()
            ))
        })
    }

    pub fn remove(&self) -> DevctlResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Signal 0 probe; permission errors count as alive
    pub fn is_alive(pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };

        match signal::kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(_) => true,
        }
    }

    /// PID of a live recorded process, cleaning up a stale file
    pub fn running_pid(&self) -> DevctlResult<Option<u32>> {
        match self.read()? {
            Some(pid) if Self::is_alive(pid) => Ok(Some(pid)),
            Some(pid) => {
                tracing::info!(pid, path = %self.path.display(), "Removing stale pid file");
                self.remove()?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Stop the recorded process: SIGTERM, wait up to `grace`, then SIGKILL
    pub async fn stop_recorded(&self, grace: Duration) -> DevctlResult<StopOutcome> {
        let pid = match self.read()? {
            Some(pid) => pid,
            None => return Ok(StopOutcome::NotRunning),
        };

        if !send_signal(pid, Signal::SIGTERM)? {
            self.remove()?;
            return Ok(StopOutcome::Stale(pid));
        }
        tracing::info!(pid, "Sent SIGTERM");

        let deadline = deadline_after(Instant::now(), grace);
        while Instant::now() < deadline {
            if !Self::is_alive(pid) {
                self.remove()?;
                return Ok(StopOutcome::Terminated(pid));
            }
            time::sleep(Duration::from_millis(100)).await;
        }

        tracing::warn!(pid, "Process still running after grace period, sending SIGKILL");
        let outcome = kill_after_grace(pid)?;
        self.remove()?;
        Ok(outcome)
    }
}

/// SIGKILL, unless the process exited on its own in the meantime
fn kill_after_grace(pid: u32) -> DevctlResult<StopOutcome> {
    if send_signal(pid, Signal::SIGKILL)? {
        Ok(StopOutcome::Killed(pid))
    } else {
        tracing::info!(pid, "Process exited before SIGKILL");
        Ok(StopOutcome::Terminated(pid))
    }
}
