use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::TempDir;

use super::INPUT_FILE_NAME;
use super::strategy::LanguageProfile;

// The unit may run as an unprivileged user, so everything must stay readable
const DIR_PERMISSIONS: u32 = 0o755;
const FILE_PERMISSIONS: u32 = 0o644;

/// Throwaway directory holding one request's source and input
///
/// The directory is removed when the workspace is closed or dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Materializes the input file and the profile's source layout under `root`
    pub fn build(
        root: &Path,
        profile: &LanguageProfile,
        source: &[u8],
        stdin_payload: &[u8],
    ) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("aocjudge-{}-", name_component(&profile.name)))
            .tempdir_in(root)?;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(DIR_PERMISSIONS))?;

        let workspace = Self { dir };
        workspace.write_file(INPUT_FILE_NAME, stdin_payload)?;
        profile.strategy.prepare(&workspace, profile, source)?;

        log::debug!(
            "Built workspace {} ({} source bytes, {} input bytes)",
            workspace.path().display(),
            source.len(),
            stdin_payload.len()
        );
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory name, unique per live workspace and usable as a unit name
    pub fn name(&self) -> String {
        self.dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Writes `contents` at a path relative to the workspace, creating parents
    pub(crate) fn write_file(&self, relative: &str, contents: &[u8]) -> io::Result<()> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent()
            && parent != self.dir.path()
        {
            fs::create_dir_all(parent)?;
            fs::set_permissions(parent, fs::Permissions::from_mode(DIR_PERMISSIONS))?;
        }
        fs::write(&path, contents)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(FILE_PERMISSIONS))
    }

    /// Removes the directory, reporting failures instead of swallowing them
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

// Container names only allow [a-zA-Z0-9_.-]
fn name_component(language: &str) -> String {
    language
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
