use std::ffi::OsStr;
use std::io;
use std::process::Stdio;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::engine::{IsolationEngine, UnitId, UnitMetadata, UnitSpec, WaitOutcome};
use crate::config::ByteSize;

/// Label attached to every unit so leftovers can be found
pub const UNIT_LABEL: &str = "aocjudge.unit";

/// Drives the Docker daemon through its command line client
#[derive(Debug, Clone)]
pub struct DockerEngine {
    binary: String,
    /// Bytes kept per captured stream; the rest is read and discarded
    output_limit: usize,
}

impl DockerEngine {
    pub fn new(binary: impl Into<String>, output_limit: ByteSize) -> Self {
        Self {
            binary: binary.into(),
            output_limit: usize::try_from(output_limit.0).unwrap_or(usize::MAX),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Arguments of `docker create` for a unit
    pub fn create_args(spec: &UnitSpec) -> Vec<String> {
        let memory = spec.memory_limit.0.to_string();
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            spec.name.clone(),
            "--network".into(),
            "none".into(),
            "--memory".into(),
            memory.clone(),
            "--memory-swap".into(),
            memory,
            "--cpus".into(),
            spec.cpus.to_string(),
            "--read-only".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--label".into(),
            format!("{UNIT_LABEL}=1"),
            "--volume".into(),
            format!("{}:{}:ro", spec.workspace.display(), spec.mount_path),
            "--workdir".into(),
            spec.mount_path.clone(),
        ];

        for mount in &spec.tmpfs {
            let exec = if mount.exec { "exec" } else { "noexec" };
            args.push("--tmpfs".into());
            args.push(format!("{}:rw,{exec},size={}", mount.target, mount.size.0));
        }

        for (key, value) in &spec.env {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }

        match spec.entrypoint.as_deref() {
            Some([program, rest @ ..]) => {
                args.push("--entrypoint".into());
                args.push(program.clone());
                args.push(spec.image.clone());
                args.extend(rest.iter().cloned());
            }
            _ => args.push(spec.image.clone()),
        }

        args
    }

    /// Identifiers of every unit carrying our label, running or not
    pub async fn list_units(&self) -> Result<Vec<UnitId>> {
        let filter = format!("label={UNIT_LABEL}");
        let output = self
            .command([
                "ps",
                "--all",
                "--quiet",
                "--no-trunc",
                "--filter",
                filter.as_str(),
            ])
            .output()
            .await
            .context("Failed to spawn docker ps")?;

        if !output.status.success() {
            bail!(
                "docker ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(UnitId::new)
            .collect())
    }
}

impl IsolationEngine for DockerEngine {
    async fn create(&self, spec: &UnitSpec) -> Result<UnitId> {
        let args = Self::create_args(spec);
        log::debug!("docker {}", args.join(" "));

        let output = self
            .command(&args)
            .output()
            .await
            .context("Failed to spawn docker create")?;

        if !output.status.success() {
            bail!(
                "docker create exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = stdout
            .lines()
            .next()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("docker create printed no container id"))?;

        Ok(UnitId::new(id))
    }

    async fn start_and_wait(&self, unit: &UnitId) -> Result<WaitOutcome> {
        // Attached start relays the container's streams and exit status
        let mut cmd = self.command(["start", "--attach", unit.as_str()]);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = cmd.spawn().context("Failed to spawn docker start")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("docker start stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("docker start stderr was not captured"))?;

        let (status, stdout, stderr) = tokio::try_join!(
            child.wait(),
            read_capped(stdout, self.output_limit),
            read_capped(stderr, self.output_limit),
        )
        .context("Failed to collect docker start output")?;

        if stdout.truncated || stderr.truncated {
            log::warn!(
                "Unit {unit} exceeded the {} byte capture limit",
                self.output_limit
            );
        }

        Ok(WaitOutcome {
            exit_code: status.code().unwrap_or(super::SYSTEM_ERROR_EXIT_CODE),
            stdout: stdout.bytes,
            stderr: stderr.bytes,
            stdout_truncated: stdout.truncated,
        })
    }

    fn request_stop(&self, unit: &UnitId) {
        let mut cmd = self.command(["stop", "--time", "0", unit.as_str()]);
        cmd.stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        let unit = unit.clone();

        tokio::spawn(async move {
            match cmd.status().await {
                Ok(status) if status.success() => log::debug!("Stopped unit {unit}"),
                Ok(status) => log::debug!("docker stop {unit} exited with {status}"),
                Err(e) => log::debug!("Failed to spawn docker stop for {unit}: {e}"),
            }
        });
    }

    async fn inspect(&self, unit: &UnitId) -> Result<UnitMetadata> {
        let output = self
            .command(["inspect", "--type", "container", unit.as_str()])
            .output()
            .await
            .context("Failed to spawn docker inspect")?;

        if !output.status.success() {
            bail!(
                "docker inspect exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_inspect(&output.stdout)
    }

    async fn remove(&self, unit: &UnitId) -> Result<()> {
        let output = self
            .command(["rm", "--force", "--volumes", unit.as_str()])
            .output()
            .await
            .context("Failed to spawn docker rm")?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() || stderr.contains("No such container") {
            return Ok(());
        }
        bail!("docker rm exited with {}: {}", output.status, stderr.trim())
    }
}

struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Reads `reader` to the end, keeping at most `limit` bytes
///
/// The stream is drained past the limit so the writer never blocks on a full pipe.
async fn read_capped<R>(mut reader: R, limit: usize) -> io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    let mut truncated = false;
    let mut chunk = vec![0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(bytes.len());
        if n > room {
            truncated = true;
        }
        bytes.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok(Captured { bytes, truncated })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    state: InspectState,
    host_config: InspectHostConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    started_at: Option<String>,
    finished_at: Option<String>,
    #[serde(rename = "OOMKilled")]
    oom_killed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    memory: u64,
}

/// Decodes the JSON array printed by `docker inspect`
fn parse_inspect(raw: &[u8]) -> Result<UnitMetadata> {
    let entries: Vec<InspectEntry> =
        serde_json::from_slice(raw).context("Malformed docker inspect output")?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("docker inspect returned no entries"))?;

    Ok(UnitMetadata {
        started_at: entry.state.started_at,
        finished_at: entry.state.finished_at,
        oom_killed: entry.state.oom_killed,
        memory_limit_bytes: entry.host_config.memory,
    })
}
