//! Child process handle for the chat engine.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::process::Child;

/// How long `kill` waits for the child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running chat engine.
#[derive(Debug)]
pub struct EngineHandle {
    /// Process ID.
    pub pid: u32,
    /// Program name, for logging.
    pub program: String,
    child: Child,
}

impl EngineHandle {
    /// Wrap a spawned child. `None` if it already exited and has no pid.
    pub fn new(child: Child, program: impl Into<String>) -> Option<Self> {
        let pid = child.id()?;
        Some(Self {
            pid,
            program: program.into(),
            child,
        })
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Exit status if the engine has exited, as `(code, signal)`.
    pub fn check_exit_status(&mut self) -> Option<(Option<i32>, Option<i32>)> {
        match self.child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => Some(split_status(status)),
            Err(e) => {
                warn!("Error checking engine {} status: {:?}", self.pid, e);
                Some((None, None))
            }
        }
    }

    /// Wait for the engine to exit on its own.
    pub async fn wait(&mut self) -> Result<String> {
        let status = self
            .child
            .wait()
            .await
            .with_context(|| format!("waiting for {} (PID {})", self.program, self.pid))?;
        let (code, signal) = split_status(status);
        Ok(format_exit_status(code, signal))
    }

    /// Kill the engine and wait for it to be reaped.
    pub async fn kill(&mut self) -> Result<()> {
        if let Err(e) = self.child.kill().await
            && self.is_running()
        {
            return Err(anyhow::anyhow!("failed to kill {}: {}", self.program, e));
        }

        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("{} (PID {}) reaped: {}", self.program, self.pid, status);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Error waiting for {} (PID {}): {:?}", self.program, self.pid, e);
                Ok(())
            }
            Err(_) => {
                warn!("Timeout waiting for {} (PID {}) to exit", self.program, self.pid);
                Ok(())
            }
        }
    }
}

fn split_status(status: std::process::ExitStatus) -> (Option<i32>, Option<i32>) {
    let code = status.code();
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;
    (code, signal)
}

/// Human-readable exit status.
pub fn format_exit_status(exit_code: Option<i32>, signal: Option<i32>) -> String {
    match (exit_code, signal) {
        (Some(code), _) => format!("exited with code {}", code),
        (None, Some(sig)) => {
            let sig_name = match sig {
                2 => "SIGINT",
                9 => "SIGKILL",
                15 => "SIGTERM",
                _ => "",
            };
            if sig_name.is_empty() {
                format!("killed by signal {}", sig)
            } else {
                format!("killed by {} (signal {})", sig_name, sig)
            }
        }
        (None, None) => "exited (unknown status)".to_string(),
    }
}
