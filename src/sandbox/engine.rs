use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;

use anyhow::Result;

use crate::config::ByteSize;

use super::strategy::MountSpec;

/// Opaque handle to one execution unit, never reused across requests
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the engine needs to create a unit
///
/// Network isolation, the read-only root and the read-only workspace mount
/// are always applied by the engine and have no fields here.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    /// Name the unit is created under; removal by name works before `create` returns
    pub name: String,
    pub image: String,
    /// Host directory mounted read-only at `mount_path`, also the working directory
    pub workspace: PathBuf,
    pub mount_path: String,
    pub memory_limit: ByteSize,
    pub cpus: f64,
    /// Writable scratch areas
    pub tmpfs: Vec<MountSpec>,
    pub env: BTreeMap<String, String>,
    /// Replaces the image entrypoint when present
    pub entrypoint: Option<Vec<String>>,
}

/// Exit status and captured streams of a unit that ran to completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaitOutcome {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The program wrote more stdout than the engine keeps
    pub stdout_truncated: bool,
}

/// Raw post-mortem facts reported by the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitMetadata {
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub oom_killed: bool,
    pub memory_limit_bytes: u64,
}

/// The isolation engine the runner drives
///
/// Every call blocks only the request that issued it. Implementations are
/// cloned into cleanup tasks, so they should be cheap handles.
pub trait IsolationEngine: Clone + Send + Sync + 'static {
    /// Creates (but does not start) a unit
    fn create(&self, spec: &UnitSpec) -> impl Future<Output = Result<UnitId>> + Send;

    /// Starts the unit with no stdin attached and waits for it to exit
    ///
    /// The future may be dropped when the deadline elapses; implementations
    /// must not leave blocked helpers behind when that happens.
    fn start_and_wait(&self, unit: &UnitId) -> impl Future<Output = Result<WaitOutcome>> + Send;

    /// Asks the unit to stop without waiting for confirmation
    fn request_stop(&self, unit: &UnitId);

    /// Reads lifecycle and resource metadata of a stopped unit
    fn inspect(&self, unit: &UnitId) -> impl Future<Output = Result<UnitMetadata>> + Send;

    /// Forcibly removes the unit; succeeds if it is already gone
    fn remove(&self, unit: &UnitId) -> impl Future<Output = Result<()>> + Send;
}
