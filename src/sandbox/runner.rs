use std::time::Duration;

use tokio::time::{Instant, timeout_at};

use crate::config::RunnerConfig;

use super::engine::{IsolationEngine, UnitId};
use super::strategy::StrategyTable;
use super::telemetry::{self, TelemetryError};
use super::workspace::Workspace;
use super::{
    ExecutionMetrics, ExecutionRequest, ExecutionResult, RunnerError, SYSTEM_ERROR_EXIT_CODE,
};

/// Runs untrusted code in one fresh execution unit per request
///
/// The runner holds no per-request state, so a single instance can serve
/// any number of concurrent evaluations.
pub struct Runner<E> {
    config: RunnerConfig,
    table: StrategyTable,
    engine: E,
}

impl<E: IsolationEngine> Runner<E> {
    pub fn new(config: RunnerConfig, table: StrategyTable, engine: E) -> Self {
        Self {
            config,
            table,
            engine,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Evaluates `source` written in `language` against `stdin_payload`
    pub async fn evaluate(
        &self,
        language: &str,
        source: &[u8],
        stdin_payload: &[u8],
    ) -> Result<ExecutionResult, RunnerError> {
        self.execute(ExecutionRequest {
            language,
            source,
            stdin_payload,
        })
        .await
    }

    /// Main entry point: build, create, run, inspect, clean
    pub async fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionResult, RunnerError> {
        let profile = self
            .table
            .lookup(request.language)
            .ok_or_else(|| RunnerError::UnsupportedLanguage(request.language.to_string()))?;

        // Step 1: Materialize the workspace
        let workspace = Workspace::build(
            &self.config.workspace_root(),
            profile,
            request.source,
            request.stdin_payload,
        )
        .map_err(|e| {
            log::error!("Failed to build {} workspace: {e}", profile.name);
            RunnerError::Workspace(e)
        })?;
        let spec = profile.strategy.launch(profile, &self.config, &workspace);
        let mut reaper = Reaper::new(self.engine.clone(), workspace);

        // Step 2: Create the unit, reapable by name while creation is in flight
        reaper.track(UnitId::new(spec.name.clone()));
        let unit = match self.engine.create(&spec).await {
            Ok(unit) => unit,
            Err(e) => {
                log::error!(
                    "Failed to create {} unit from {}: {e:#}",
                    profile.name,
                    spec.image
                );
                reaper.untrack();
                reaper.cleanup().await;
                return Err(RunnerError::SandboxCreate(e));
            }
        };
        log::debug!("Created unit {unit} for {}", profile.name);
        reaper.track(unit.clone());

        // Step 3: Run until exit or deadline
        let mut result = self.drive(&unit).await;
        if result.stdout_truncated {
            result.append_diagnostic("[output] stdout exceeded the capture limit and was cut");
        }

        // Step 4: Gather telemetry, degrading on failure
        match self.inspect(&unit).await {
            Ok(metrics) => result.metrics = metrics,
            Err(e) => {
                log::warn!("Telemetry unavailable for unit {unit}: {e}");
                result.append_diagnostic(&format!("[telemetry] {e}"));
            }
        }

        // Step 5: Tear everything down
        reaper.cleanup().await;

        log::info!(
            "Evaluated {} submission on unit {unit}: exit code {}, {:?} ms",
            profile.name,
            result.exit_code,
            result.metrics.duration_ms
        );
        Ok(result)
    }

    /// Starts the unit and waits for it, bounded by the configured timeout
    async fn drive(&self, unit: &UnitId) -> ExecutionResult {
        let deadline = Instant::now() + Duration::from(self.config.timeout);

        match timeout_at(deadline, self.engine.start_and_wait(unit)).await {
            Ok(Ok(outcome)) => {
                log::debug!("Unit {unit} exited with {}", outcome.exit_code);
                outcome.into()
            }
            Ok(Err(e)) => {
                log::error!("Failed to run unit {unit}: {e:#}");
                ExecutionResult {
                    exit_code: SYSTEM_ERROR_EXIT_CODE,
                    stderr: format!("failed to run sandbox: {e:#}").into_bytes(),
                    ..Default::default()
                }
            }
            Err(_) => {
                log::info!(
                    "Unit {unit} exceeded {} ms, requesting stop",
                    self.config.timeout.0
                );
                // Not awaited: forced removal reclaims the unit either way
                self.engine.request_stop(unit);
                ExecutionResult::timed_out()
            }
        }
    }

    async fn inspect(&self, unit: &UnitId) -> Result<ExecutionMetrics, TelemetryError> {
        let metadata = self
            .engine
            .inspect(unit)
            .await
            .map_err(TelemetryError::Inspect)?;
        telemetry::extract(&metadata)
    }
}

/// Owns the workspace and, once created, the unit of one request
///
/// `cleanup` is the normal release path. If the request future is dropped
/// before reaching it, `Drop` removes the directory synchronously and hands
/// the unit removal to the current runtime.
struct Reaper<E: IsolationEngine> {
    engine: E,
    unit: Option<UnitId>,
    workspace: Option<Workspace>,
}

impl<E: IsolationEngine> Reaper<E> {
    fn new(engine: E, workspace: Workspace) -> Self {
        Self {
            engine,
            unit: None,
            workspace: Some(workspace),
        }
    }

    fn track(&mut self, unit: UnitId) {
        self.unit = Some(unit);
    }

    /// Creation failed, so there is no unit to remove
    fn untrack(&mut self) {
        self.unit = None;
    }

    async fn cleanup(mut self) {
        if let Some(unit) = self.unit.take() {
            match self.engine.remove(&unit).await {
                Ok(()) => log::debug!("Removed unit {unit}"),
                Err(e) => log::warn!("Failed to remove unit {unit}: {e:#}"),
            }
        }

        if let Some(workspace) = self.workspace.take() {
            let path = workspace.path().to_path_buf();
            if let Err(e) = workspace.close() {
                log::warn!("Failed to remove workspace {}: {e}", path.display());
            }
        }
    }
}

impl<E: IsolationEngine> Drop for Reaper<E> {
    fn drop(&mut self) {
        let Some(unit) = self.unit.take() else {
            return;
        };

        log::warn!("Request abandoned before cleanup, removing unit {unit} in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = self.engine.clone();
                handle.spawn(async move {
                    if let Err(e) = engine.remove(&unit).await {
                        log::warn!("Failed to remove abandoned unit {unit}: {e:#}");
                    }
                });
            }
            Err(_) => log::error!("No runtime left to remove unit {unit}"),
        }
        // The workspace, if still held, is removed when its field drops
    }
}
