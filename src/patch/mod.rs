//! Supervises a scraping command and repairs its locator policy when it fails.
//!
//! ```text
//! Run → Success
//!     → Failure → Classify → RequestPatch → Apply | Reject → Run
//!     → TimedOut (stop)
//! ```

mod policy;
mod process;

pub use policy::Policy;
pub use process::{ProcessOutcome, ProcessOutput, ProcessRunner, TokioProcessRunner};

use crate::config::PatchConfig;
use crate::oracle::SelectorOracle;
use crate::{Error, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Failure lines kept for the oracle prompt.
const MAX_FAILURE_LINES: usize = 40;

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The command ran clean.
    Succeeded,
    /// The command exceeded its timeout. Not patchable.
    TimedOut,
    /// The command failed but nothing in stderr implicated the locators.
    OutOfScope,
    /// `max_cycles` runs without success.
    CycleLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub outcome: PatchOutcome,
    /// Runs performed.
    pub cycles: u32,
    pub applied: u32,
    pub rejected: u32,
}

/// One line of the audit log.
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    timestamp: String,
    cycle: u32,
    /// Version the proposal would have become.
    version: u64,
    failure: &'a str,
    raw_response: Option<&'a str>,
    decision: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Backup state for one loop run.
enum Backup {
    NotTaken,
    /// The live policy existed and was copied.
    Copied,
    /// There was no live policy to copy.
    Absent,
}

pub struct PatchLoop<'a> {
    runner: &'a dyn ProcessRunner,
    oracle: &'a SelectorOracle,
    config: PatchConfig,
    command: Vec<String>,
}

impl<'a> PatchLoop<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, oracle: &'a SelectorOracle, config: &PatchConfig) -> Self {
        Self {
            runner,
            oracle,
            command: config.command.clone(),
            config: config.clone(),
        }
    }

    /// Supervise `command` instead of `patch.command`.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub async fn run(&self) -> Result<PatchReport> {
        if self.command.is_empty() {
            return Err(Error::Patch("no command to supervise".into()));
        }

        let mut report = PatchReport {
            outcome: PatchOutcome::CycleLimit,
            cycles: 0,
            applied: 0,
            rejected: 0,
        };
        let mut backup = Backup::NotTaken;

        for cycle in 1..=self.config.max_cycles {
            report.cycles = cycle;
            info!("Run {}/{}: {}", cycle, self.config.max_cycles, self.command.join(" "));

            let output = match self.runner.run(&self.command, self.config.timeout()).await? {
                ProcessOutcome::TimedOut => {
                    warn!("Command timed out after {:?}", self.config.timeout());
                    report.outcome = PatchOutcome::TimedOut;
                    return Ok(report);
                }
                ProcessOutcome::Finished(output) => output,
            };

            if !is_failure(&output, &self.config.failure_markers) {
                info!("Command succeeded");
                report.outcome = PatchOutcome::Succeeded;
                return Ok(report);
            }

            let lines = failure_signature(&output.stderr, &self.config.signatures);
            if lines.is_empty() {
                warn!("Command failed (status {:?}) with no locator-related errors", output.status);
                report.outcome = PatchOutcome::OutOfScope;
                return Ok(report);
            }
            let failure = lines.join("\n");
            self.log_failure(cycle, &failure)?;

            if matches!(backup, Backup::NotTaken) {
                backup = self.take_backup()?;
            }

            if self.attempt_patch(cycle, &failure, &backup).await? {
                report.applied += 1;
            } else {
                report.rejected += 1;
            }

            if cycle < self.config.max_cycles && !self.config.cooldown().is_zero() {
                debug!("Cooling down for {:?}", self.config.cooldown());
                tokio::time::sleep(self.config.cooldown()).await;
            }
        }

        warn!("Giving up after {} runs", report.cycles);
        Ok(report)
    }

    /// Ask for a new policy, audit the attempt, then apply or revert.
    /// Returns whether the proposal was applied.
    async fn attempt_patch(&self, cycle: u32, failure: &str, backup: &Backup) -> Result<bool> {
        let current = Policy::load_or_default(&self.config.policy)?;
        let raw = self.oracle.propose_policy(failure, &current.to_yaml()?).await;

        let verdict = match raw.as_deref() {
            Some(raw) => Policy::from_proposal(raw, &current),
            None => Err(Error::Patch("oracle gave no answer".into())),
        };

        let entry = AuditEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            cycle,
            version: current.version + 1,
            failure,
            raw_response: raw.as_deref(),
            decision: if verdict.is_ok() { "applied" } else { "rejected" },
            reason: verdict.as_ref().err().map(|e| e.to_string()),
        };
        append_line(&self.config.audit_log, &serde_json::to_string(&entry)?)?;

        match verdict {
            Ok(policy) => {
                policy.save(&self.config.policy)?;
                info!(
                    "Applied policy v{} ({} locators)",
                    policy.version,
                    policy.locators.len()
                );
                Ok(true)
            }
            Err(e) => {
                warn!("Rejected proposal: {}", e);
                self.revert(backup)?;
                Ok(false)
            }
        }
    }

    fn take_backup(&self) -> Result<Backup> {
        let live = &self.config.policy;
        let backup = self.config.backup_path();
        if !live.exists() {
            debug!("No live policy at {}; nothing to back up", live.display());
            return Ok(Backup::Absent);
        }
        if let Some(parent) = backup.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(live, &backup)?;
        info!("Backed up {} to {}", live.display(), backup.display());
        Ok(Backup::Copied)
    }

    fn revert(&self, backup: &Backup) -> Result<()> {
        let live = &self.config.policy;
        match backup {
            Backup::Copied => {
                std::fs::copy(self.config.backup_path(), live)?;
                debug!("Restored {} from backup", live.display());
            }
            Backup::Absent if live.exists() => {
                std::fs::remove_file(live)?;
                debug!("Removed {}; there was none before", live.display());
            }
            _ => {}
        }
        Ok(())
    }

    fn log_failure(&self, cycle: u32, failure: &str) -> Result<()> {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        append_line(
            &self.config.error_log,
            &format!("[{}] run {}\n{}", stamp, cycle, failure),
        )
    }
}

/// A run failed when it exited non-zero or printed an unhandled-failure marker.
pub fn is_failure(output: &ProcessOutput, markers: &[String]) -> bool {
    !output.exited_ok() || markers.iter().any(|m| output.stderr.contains(m.as_str()))
}

/// Stderr lines mentioning any signature (case-insensitive), last
/// `MAX_FAILURE_LINES` only.
pub fn failure_signature(stderr: &str, signatures: &[String]) -> Vec<String> {
    let needles: Vec<String> = signatures.iter().map(|s| s.to_lowercase()).collect();
    let lines: Vec<String> = stderr
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            needles.iter().any(|n| lower.contains(n.as_str()))
        })
        .map(|line| line.trim_end().to_string())
        .collect();
    let skip = lines.len().saturating_sub(MAX_FAILURE_LINES);
    lines.into_iter().skip(skip).collect()
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}
