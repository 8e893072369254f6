//! Per-task workspace directories.

use deployit_core::TaskId;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::command::VARIABLES_FILE;
use crate::{ExecutorError, ExecutorResult};

pub const SCRIPT_FILE: &str = "resources.tf";
pub const VERSIONS_FILE: &str = "version.tf";
pub const STATE_FILE: &str = "terraform.tfstate";

/// Extensions of files that are inputs or tool internals rather than
/// results worth keeping.
const NON_IMPORTANT_EXTENSIONS: [&str; 4] = ["tf", "tfstate", "binary", "hcl"];

/// A provider the workspace pins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequirement {
    pub name: String,
    pub source: String,
    pub version: String,
}

/// Render `version.tf` for a tool version constraint and provider pins.
pub fn render_version_constraints(
    required_version: Option<&str>,
    providers: &[ProviderRequirement],
) -> String {
    let mut out = String::from("terraform {\n");
    if let Some(version) = required_version {
        out.push_str(&format!("  required_version = \"{version}\"\n"));
    }
    if !providers.is_empty() {
        out.push_str("  required_providers {\n");
        for p in providers {
            out.push_str(&format!(
                "    {} = {{\n      source  = \"{}\"\n      version = \"{}\"\n    }}\n",
                p.name, p.source, p.version
            ));
        }
        out.push_str("  }\n");
    }
    out.push_str("}\n");
    out
}

/// A task's private directory under the workspace root.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create `{root}/{task_id}`. Fails if it already exists, so two tasks
    /// never share a directory.
    pub async fn create(root: &Path, task_id: TaskId) -> ExecutorResult<Self> {
        let dir = root.join(task_id.to_string());
        if fs::try_exists(&dir).await? {
            return Err(ExecutorError::Workspace(format!(
                "workspace {} already exists",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub async fn write_script(&self, script: &str) -> ExecutorResult<()> {
        self.write(SCRIPT_FILE, script).await
    }

    pub async fn write_version_constraints(&self, content: &str) -> ExecutorResult<()> {
        self.write(VERSIONS_FILE, content).await
    }

    pub async fn write_state(&self, state: &str) -> ExecutorResult<()> {
        self.write(STATE_FILE, state).await
    }

    /// Write the variables file. Null values are dropped; returns whether a
    /// file was written.
    pub async fn write_variables(&self, variables: &HashMap<String, Value>) -> ExecutorResult<bool> {
        let present: serde_json::Map<String, Value> = variables
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if present.is_empty() {
            return Ok(false);
        }
        let json = serde_json::to_string_pretty(&Value::Object(present))
            .map_err(|e| ExecutorError::Workspace(e.to_string()))?;
        self.write(VARIABLES_FILE, &json).await?;
        Ok(true)
    }

    pub async fn remove_variables(&self) {
        match fs::remove_file(self.dir.join(VARIABLES_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to delete variables file"),
        }
    }

    pub async fn read_state(&self) -> ExecutorResult<Option<String>> {
        match fs::read_to_string(self.dir.join(STATE_FILE)).await {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Contents of result files at the top level of the workspace, such as
    /// state backups.
    pub async fn important_files(&self) -> ExecutorResult<HashMap<String, String>> {
        let mut files = HashMap::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == VARIABLES_FILE || !is_important(&name) {
                continue;
            }
            match fs::read_to_string(entry.path()).await {
                Ok(content) => {
                    files.insert(name, content);
                }
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable workspace file"),
            }
        }
        Ok(files)
    }

    /// Delete the directory and everything in it.
    pub async fn remove(self) {
        if let Err(e) = fs::remove_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to delete workspace");
        }
    }

    async fn write(&self, name: &str, content: &str) -> ExecutorResult<()> {
        fs::write(self.dir.join(name), content).await?;
        Ok(())
    }
}

fn is_important(name: &str) -> bool {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => !NON_IMPORTANT_EXTENSIONS.contains(&ext),
        None => true,
    }
}
