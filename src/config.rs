use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::sandbox::LanguageProfile;

#[derive(Parser)]
#[command(name = "aocjudge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Per-execution wall-clock timeout in milliseconds
    #[arg(long = "timeout-ms", env = "AOCJUDGE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Address to bind the HTTP server to
    #[arg(long = "bind-address", env = "AOCJUDGE_HOST")]
    pub bind_address: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(long = "bind-port", env = "AOCJUDGE_PORT")]
    pub bind_port: Option<u16>,

    /// Path to the line-delimited case file
    #[arg(long = "cases", env = "AOCJUDGE_DATA")]
    pub cases_path: Option<PathBuf>,
}

impl CliArgs {
    /// Load the configuration from the specified file and apply overrides
    pub fn to_config(&self) -> Result<Config> {
        let file = std::fs::File::open(&self.config_path)
            .with_context(|| format!("Failed to open {}", self.config_path))?;
        let reader = std::io::BufReader::new(file);
        let mut config: Config = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse {}", self.config_path))?;

        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ms) = self.timeout_ms {
            config.runner.timeout = MilliSecond(ms);
        }
        if let Some(address) = &self.bind_address {
            config.server.bind_address = address.clone();
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = port;
        }
        if let Some(path) = &self.cases_path {
            config.cases_path = Some(path.clone());
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    pub languages: Vec<LanguageProfile>,
    pub cases_path: Option<PathBuf>,
}

impl Config {
    /// Rejects settings the runner cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.server.max_concurrent_evals == 0 {
            bail!("server.max_concurrent_evals must not be 0");
        }
        if self.runner.timeout.0 == 0 {
            bail!("runner.timeout_ms must be positive");
        }
        if self.runner.memory_limit.0 == 0 {
            bail!("runner.memory_limit must be positive");
        }
        if self.runner.output_limit.0 == 0 {
            bail!("runner.output_limit must be positive");
        }
        if self.runner.cpus.is_nan() || self.runner.cpus <= 0.0 {
            bail!("runner.cpus must be positive");
        }
        if !self.runner.mount_path.starts_with('/') {
            bail!("runner.mount_path must be absolute");
        }

        let mut seen = HashSet::new();
        for language in &self.languages {
            language.validate()?;
            if !seen.insert(language.name.as_str()) {
                bail!("language {} is configured twice", language.name);
            }
        }
        Ok(())
    }

    /// Case file location, falling back to the user data directory
    pub fn cases_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cases_path {
            return Ok(path.clone());
        }

        use directories::ProjectDirs;

        let proj_dirs = ProjectDirs::from("", "", "aocjudge")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;
        Ok(proj_dirs.data_local_dir().join("cases.jsonl"))
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub bind_address: String,
    pub bind_port: u16,
    /// Upper bound on evaluations running at the same time
    pub max_concurrent_evals: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "AocJudge".to_string(),
            bind_address: "127.0.0.1".to_string(),
            bind_port: 8000,
            max_concurrent_evals: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// Process-wide sandbox policy, identical for every request
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RunnerConfig {
    #[serde(rename = "timeout_ms")]
    pub timeout: MilliSecond,
    pub memory_limit: ByteSize,
    pub cpus: f64,
    /// Parent of the per-request workspaces; the system temp dir if unset
    pub workspace_root: Option<PathBuf>,
    /// Where the workspace appears inside the unit
    pub mount_path: String,
    pub docker_binary: String,
    /// Captured bytes kept per output stream
    pub output_limit: ByteSize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: MilliSecond(8000),
            memory_limit: ByteSize(256 * 1024 * 1024),
            cpus: 0.5,
            workspace_root: None,
            mount_path: "/app".to_string(),
            docker_binary: "docker".to_string(),
            output_limit: ByteSize(1024 * 1024),
        }
    }
}

impl RunnerConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);
