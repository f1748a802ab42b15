use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::config::{ByteSize, RunnerConfig};

use super::INPUT_FILE_NAME;
use super::engine::UnitSpec;
use super::workspace::Workspace;

const DEFAULT_SCRATCH_TARGET: &str = "/scratch";
const DEFAULT_SCRATCH_SIZE: u64 = 512 * 1024 * 1024;

/// Per-language descriptor of how submitted code is laid out and launched
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LanguageProfile {
    pub name: String,
    /// Image the execution unit is created from
    pub image: String,
    /// Where the submitted source lands, relative to the workspace root
    pub file_name: String,
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    #[serde(default)]
    pub extra_mounts: Vec<MountSpec>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Pre-installed libraries, informational only
    #[serde(default)]
    pub libraries: Vec<String>,
}

/// How a language gets from source to running process
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// The image entrypoint runs the source file as-is
    #[default]
    DirectRun,
    /// The entrypoint is replaced with a toolchain invocation that builds then runs
    BuildThenRun {
        command: Vec<String>,
        #[serde(default)]
        manifest: Option<Manifest>,
        #[serde(default)]
        scratch: MountSpec,
    },
}

/// A writable, size-bounded in-memory mount
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub target: String,
    pub size: ByteSize,
    /// Allow executing binaries written to the mount
    #[serde(default)]
    pub exec: bool,
}

impl Default for MountSpec {
    fn default() -> Self {
        Self {
            target: DEFAULT_SCRATCH_TARGET.to_string(),
            size: ByteSize(DEFAULT_SCRATCH_SIZE),
            exec: true,
        }
    }
}

/// Project descriptor synthesized next to the source for toolchains that need one
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Manifest {
    Cargo {
        #[serde(default)]
        dependencies: BTreeMap<String, String>,
    },
    GoModule {
        #[serde(default = "default_go_module")]
        module: String,
        #[serde(default = "default_go_version")]
        go_version: String,
        #[serde(default)]
        require: BTreeMap<String, String>,
    },
}

fn default_go_module() -> String {
    "solution".to_string()
}

fn default_go_version() -> String {
    "1.22".to_string()
}

impl Manifest {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Cargo { .. } => "Cargo.toml",
            Self::GoModule { .. } => "go.mod",
        }
    }

    /// Renders the manifest text, dependencies in name order
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Cargo { dependencies } => {
                out.push_str("[package]\nname = \"solution\"\nversion = \"0.1.0\"\nedition = \"2021\"\n");
                out.push_str("\n[dependencies]\n");
                for (name, version) in dependencies {
                    out.push_str(&format!("{name} = \"{version}\"\n"));
                }
            }
            Self::GoModule {
                module,
                go_version,
                require,
            } => {
                out.push_str(&format!("module {module}\n\ngo {go_version}\n"));
                if !require.is_empty() {
                    out.push_str("\nrequire (\n");
                    for (path, version) in require {
                        out.push_str(&format!("\t{path} {version}\n"));
                    }
                    out.push_str(")\n");
                }
            }
        }
        out
    }
}

impl LanguageProfile {
    pub fn needs_build_wrapper(&self) -> bool {
        matches!(self.strategy, ExecutionStrategy::BuildThenRun { .. })
    }

    pub fn build_command(&self) -> Option<&[String]> {
        match &self.strategy {
            ExecutionStrategy::DirectRun => None,
            ExecutionStrategy::BuildThenRun { command, .. } => Some(command),
        }
    }

    /// Rejects entries that would write outside the workspace or launch nothing
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.image.is_empty() {
            bail!("language entries need a name and an image");
        }
        ensure_relative(&self.name, &self.file_name)?;
        if Path::new(&self.file_name) == Path::new(INPUT_FILE_NAME) {
            bail!(
                "language {}: source file collides with {INPUT_FILE_NAME}",
                self.name
            );
        }
        if let ExecutionStrategy::BuildThenRun {
            command,
            manifest,
            scratch,
        } = &self.strategy
        {
            if command.is_empty() {
                bail!("language {}: build command must not be empty", self.name);
            }
            if let Some(manifest) = manifest
                && manifest.file_name() == self.file_name
            {
                bail!(
                    "language {}: source file collides with {}",
                    self.name,
                    manifest.file_name()
                );
            }
            if scratch.size.0 == 0 {
                bail!("language {}: scratch size must be positive", self.name);
            }
        }
        if self
            .extra_mounts
            .iter()
            .any(|m| m.size.0 == 0 || !m.target.starts_with('/'))
        {
            bail!(
                "language {}: extra mounts need an absolute target and a positive size",
                self.name
            );
        }
        Ok(())
    }
}

fn ensure_relative(language: &str, file_name: &str) -> Result<()> {
    let path = Path::new(file_name);
    let valid = !file_name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
        bail!("language {language}: file name {file_name:?} must be a plain relative path");
    }
    Ok(())
}

impl ExecutionStrategy {
    /// Lays out the source (and manifest, if any) inside the workspace
    pub fn prepare(
        &self,
        workspace: &Workspace,
        profile: &LanguageProfile,
        source: &[u8],
    ) -> std::io::Result<()> {
        workspace.write_file(&profile.file_name, source)?;
        if let Self::BuildThenRun {
            manifest: Some(manifest),
            ..
        } = self
        {
            workspace.write_file(manifest.file_name(), manifest.render().as_bytes())?;
        }
        Ok(())
    }

    /// Describes the unit the engine should create for this workspace
    pub fn launch(
        &self,
        profile: &LanguageProfile,
        config: &RunnerConfig,
        workspace: &Workspace,
    ) -> UnitSpec {
        let mut tmpfs = profile.extra_mounts.clone();
        let entrypoint = match self {
            Self::DirectRun => None,
            Self::BuildThenRun {
                command, scratch, ..
            } => {
                tmpfs.push(scratch.clone());
                Some(command.clone())
            }
        };

        UnitSpec {
            name: workspace.name(),
            image: profile.image.clone(),
            workspace: workspace.path().to_path_buf(),
            mount_path: config.mount_path.clone(),
            memory_limit: config.memory_limit,
            cpus: config.cpus,
            tmpfs,
            env: profile.env.clone(),
            entrypoint,
        }
    }
}

/// Read-only lookup from language name to its profile
#[derive(Debug, Default)]
pub struct StrategyTable {
    profiles: HashMap<String, LanguageProfile>,
}

impl StrategyTable {
    pub fn new(profiles: impl IntoIterator<Item = LanguageProfile>) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self { profiles }
    }

    pub fn lookup(&self, language: &str) -> Option<&LanguageProfile> {
        self.profiles.get(language)
    }

    /// Supported language names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn profiles(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.values()
    }
}
