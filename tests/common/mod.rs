#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;

use aocjudge::config::{MilliSecond, RunnerConfig};
use aocjudge::sandbox::{
    ExecutionStrategy, IsolationEngine, LanguageProfile, Manifest, MountSpec, Runner,
    StrategyTable, UnitId, UnitMetadata, UnitSpec, WaitOutcome,
};

pub const NEVER: &str = "0001-01-01T00:00:00Z";
pub const SCRIPT_SUFFIX: &str = ".script";

/// Direct-run language whose programs are scripts for the scripted engine
pub fn script_profile() -> LanguageProfile {
    LanguageProfile {
        name: "script".to_string(),
        image: "aocjudge-script".to_string(),
        file_name: "main.script".to_string(),
        strategy: ExecutionStrategy::DirectRun,
        extra_mounts: vec![],
        env: BTreeMap::new(),
        libraries: vec!["parens".to_string()],
    }
}

/// Build-then-run language with a synthesized Cargo manifest
pub fn built_profile() -> LanguageProfile {
    LanguageProfile {
        name: "built".to_string(),
        image: "aocjudge-built".to_string(),
        file_name: "src/main.script".to_string(),
        strategy: ExecutionStrategy::BuildThenRun {
            command: vec!["build-and-run".to_string(), "--release".to_string()],
            manifest: Some(Manifest::Cargo {
                dependencies: BTreeMap::from([("itertools".to_string(), "0.13".to_string())]),
            }),
            scratch: MountSpec::default(),
        },
        extra_mounts: vec![],
        env: BTreeMap::from([("CARGO_TARGET_DIR".to_string(), "/scratch/target".to_string())]),
        libraries: vec![],
    }
}

pub fn runner_config(workspace_root: &Path, timeout_ms: u64) -> RunnerConfig {
    RunnerConfig {
        timeout: MilliSecond(timeout_ms),
        workspace_root: Some(workspace_root.to_path_buf()),
        ..Default::default()
    }
}

pub fn scripted_runner(
    workspace_root: &Path,
    timeout_ms: u64,
    engine: ScriptedEngine,
) -> Runner<ScriptedEngine> {
    Runner::new(
        runner_config(workspace_root, timeout_ms),
        StrategyTable::new([script_profile(), built_profile()]),
        engine,
    )
}

/// Number of entries directly under `dir`
pub fn entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[derive(Debug, Clone)]
struct UnitState {
    spec: UnitSpec,
    started_at: Option<String>,
    finished_at: Option<String>,
    oom_killed: bool,
}

#[derive(Debug, Default)]
struct Record {
    created: Vec<UnitSpec>,
    snapshots: Vec<Vec<String>>,
    live: HashMap<UnitId, UnitState>,
    stops: Vec<UnitId>,
    removed: Vec<UnitId>,
}

#[derive(Debug, Default)]
struct Inner {
    fail_create: bool,
    fail_inspect: bool,
    fail_remove: bool,
    /// The unit exists for this long before `create` returns
    create_delay: Option<Duration>,
    record: Mutex<Record>,
}

/// In-memory engine that "runs" a tiny line-based script language
///
/// Script lines:
/// - `print <text>` writes text and a newline to stdout
/// - `eprint <text>` writes text and a newline to stderr
/// - `newline` writes an empty line to stdout
/// - `count-parens` prints the count of '(' minus ')' in the input file
/// - `sleep <ms>` sleeps
/// - `oom` gets killed for exceeding memory
/// - `overflow` reports that stdout went past the capture limit
/// - `exit <code>` stops with the given code
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    inner: Arc<Inner>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create() -> Self {
        Self {
            inner: Arc::new(Inner {
                fail_create: true,
                ..Default::default()
            }),
        }
    }

    pub fn failing_inspect() -> Self {
        Self {
            inner: Arc::new(Inner {
                fail_inspect: true,
                ..Default::default()
            }),
        }
    }

    pub fn failing_remove() -> Self {
        Self {
            inner: Arc::new(Inner {
                fail_remove: true,
                ..Default::default()
            }),
        }
    }

    pub fn slow_create(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                create_delay: Some(delay),
                ..Default::default()
            }),
        }
    }

    pub fn live_units(&self) -> usize {
        self.inner.record.lock().live.len()
    }

    pub fn created(&self) -> Vec<UnitSpec> {
        self.inner.record.lock().created.clone()
    }

    pub fn snapshots(&self) -> Vec<Vec<String>> {
        self.inner.record.lock().snapshots.clone()
    }

    pub fn stop_requests(&self) -> usize {
        self.inner.record.lock().stops.len()
    }

    pub fn removed(&self) -> usize {
        self.inner.record.lock().removed.len()
    }

    fn spec_of(&self, unit: &UnitId) -> Result<UnitSpec> {
        self.inner
            .record
            .lock()
            .live
            .get(unit)
            .map(|s| s.spec.clone())
            .ok_or_else(|| anyhow!("no such unit: {unit}"))
    }

    fn update(&self, unit: &UnitId, f: impl FnOnce(&mut UnitState)) {
        if let Some(state) = self.inner.record.lock().live.get_mut(unit) {
            f(state);
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn list_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.is_dir() {
            list_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().into_owned());
        }
    }
}

fn find_script(root: &Path) -> Option<PathBuf> {
    let mut files = Vec::new();
    list_files(root, root, &mut files);
    files
        .into_iter()
        .find(|f| f.ends_with(SCRIPT_SUFFIX))
        .map(|f| root.join(f))
}

impl IsolationEngine for ScriptedEngine {
    async fn create(&self, spec: &UnitSpec) -> Result<UnitId> {
        if self.inner.fail_create {
            bail!("pull access denied for {}", spec.image);
        }

        let mut files = Vec::new();
        list_files(&spec.workspace, &spec.workspace, &mut files);
        files.sort();

        let unit = UnitId::new(spec.name.clone());
        {
            let mut record = self.inner.record.lock();
            record.created.push(spec.clone());
            record.snapshots.push(files);
            record.live.insert(
                unit.clone(),
                UnitState {
                    spec: spec.clone(),
                    started_at: None,
                    finished_at: None,
                    oom_killed: false,
                },
            );
        }

        if let Some(delay) = self.inner.create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(unit)
    }

    async fn start_and_wait(&self, unit: &UnitId) -> Result<WaitOutcome> {
        let spec = self.spec_of(unit)?;
        self.update(unit, |s| s.started_at = Some(now()));

        let script_path = find_script(&spec.workspace)
            .ok_or_else(|| anyhow!("no script in {}", spec.workspace.display()))?;
        let script = fs::read_to_string(script_path)?;
        let input = fs::read_to_string(spec.workspace.join("input.txt"))?;

        let mut outcome = WaitOutcome::default();
        for line in script.lines() {
            let (op, arg) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
            match op {
                "print" => outcome.stdout.extend_from_slice(format!("{arg}\n").as_bytes()),
                "eprint" => outcome.stderr.extend_from_slice(format!("{arg}\n").as_bytes()),
                "newline" => outcome.stdout.push(b'\n'),
                "overflow" => outcome.stdout_truncated = true,
                "count-parens" => {
                    let floor = input.matches('(').count() as i64 - input.matches(')').count() as i64;
                    outcome.stdout.extend_from_slice(format!("{floor}\n").as_bytes());
                }
                "sleep" => tokio::time::sleep(Duration::from_millis(arg.parse()?)).await,
                "oom" => {
                    self.update(unit, |s| s.oom_killed = true);
                    outcome.exit_code = 137;
                    break;
                }
                "exit" => {
                    outcome.exit_code = arg.parse()?;
                    break;
                }
                "" => {}
                other => bail!("unknown instruction {other}"),
            }
        }

        self.update(unit, |s| s.finished_at = Some(now()));
        Ok(outcome)
    }

    fn request_stop(&self, unit: &UnitId) {
        self.inner.record.lock().stops.push(unit.clone());
    }

    async fn inspect(&self, unit: &UnitId) -> Result<UnitMetadata> {
        if self.inner.fail_inspect {
            bail!("unexpected end of JSON input");
        }
        let record = self.inner.record.lock();
        let state = record
            .live
            .get(unit)
            .ok_or_else(|| anyhow!("no such unit: {unit}"))?;
        Ok(UnitMetadata {
            started_at: Some(state.started_at.clone().unwrap_or_else(|| NEVER.to_string())),
            finished_at: Some(state.finished_at.clone().unwrap_or_else(|| NEVER.to_string())),
            oom_killed: state.oom_killed,
            memory_limit_bytes: state.spec.memory_limit.0,
        })
    }

    async fn remove(&self, unit: &UnitId) -> Result<()> {
        if self.inner.fail_remove {
            bail!("daemon gone while removing {unit}");
        }
        let mut record = self.inner.record.lock();
        record.live.remove(unit);
        record.removed.push(unit.clone());
        Ok(())
    }
}
