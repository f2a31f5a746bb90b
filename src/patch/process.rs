use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn exited_ok(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Finished(ProcessOutput),
    TimedOut,
}

/// Runs a command to completion or until the timeout.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &[String], timeout: Duration) -> Result<ProcessOutcome>;
}

/// [`ProcessRunner`] over `tokio::process`. A timed-out child is killed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &[String], timeout: Duration) -> Result<ProcessOutcome> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Patch("empty command".into()))?;
        debug!("spawning {} {:?}", program, args);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(ProcessOutcome::Finished(ProcessOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }))
            }
            Err(_) => Ok(ProcessOutcome::TimedOut),
        }
    }
}
