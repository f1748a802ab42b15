mod docker;
mod engine;
mod runner;
mod strategy;
mod telemetry;
mod workspace;

pub use docker::DockerEngine;
pub use engine::{IsolationEngine, UnitId, UnitMetadata, UnitSpec, WaitOutcome};
pub use runner::Runner;
pub use strategy::{ExecutionStrategy, LanguageProfile, Manifest, MountSpec, StrategyTable};
pub use telemetry::{TelemetryError, extract as extract_metrics};
pub use workspace::Workspace;

use serde::Serialize;
use thiserror::Error;

/// Exit code reported for executions that hit the deadline
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Stderr content reported for executions that hit the deadline
pub const TIMEOUT_MARKER: &str = "timeout";
/// Exit code reported when the unit could not be started or awaited
pub const SYSTEM_ERROR_EXIT_CODE: i32 = -1;
/// Name of the file holding the puzzle input inside every workspace
pub const INPUT_FILE_NAME: &str = "input.txt";

/// One evaluation call: which language, what code, what input
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub language: &'a str,
    pub source: &'a [u8],
    pub stdin_payload: &'a [u8],
}

/// Resource telemetry gathered from the engine after the unit stopped
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ExecutionMetrics {
    /// Absent when the lifecycle timestamps could not be determined
    pub duration_ms: Option<f64>,
    pub oom_killed: bool,
    pub memory_limit_bytes: u64,
}

/// Everything a caller gets back once a unit has been started
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub metrics: ExecutionMetrics,
    /// Only a prefix of stdout was captured; such output never passes
    pub stdout_truncated: bool,
}

impl ExecutionResult {
    /// The fixed shape of a run that exceeded its deadline
    pub fn timed_out() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: Vec::new(),
            stderr: TIMEOUT_MARKER.as_bytes().to_vec(),
            metrics: ExecutionMetrics::default(),
            stdout_truncated: false,
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Appends a diagnostic line to stderr without losing what the program wrote
    pub(crate) fn append_diagnostic(&mut self, note: &str) {
        if !self.stderr.is_empty() && !self.stderr.ends_with(b"\n") {
            self.stderr.push(b'\n');
        }
        self.stderr.extend_from_slice(note.as_bytes());
    }
}

impl From<WaitOutcome> for ExecutionResult {
    fn from(outcome: WaitOutcome) -> Self {
        Self {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            metrics: ExecutionMetrics::default(),
            stdout_truncated: outcome.stdout_truncated,
        }
    }
}

/// Failures that abort an evaluation before any result exists
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to create sandbox unit: {0:#}")]
    SandboxCreate(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_shape() {
        let result = ExecutionResult::timed_out();
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.stdout.is_empty());
        assert_eq!(result.stderr_lossy(), TIMEOUT_MARKER);
        assert_eq!(result.metrics.duration_ms, None);
    }

    #[test]
    fn test_append_diagnostic_keeps_program_stderr() {
        let mut result = ExecutionResult {
            stderr: b"Traceback".to_vec(),
            ..Default::default()
        };
        result.append_diagnostic("[telemetry] gone");
        assert_eq!(result.stderr_lossy(), "Traceback\n[telemetry] gone");

        let mut empty = ExecutionResult::default();
        empty.append_diagnostic("[telemetry] gone");
        assert_eq!(empty.stderr_lossy(), "[telemetry] gone");
    }
}
