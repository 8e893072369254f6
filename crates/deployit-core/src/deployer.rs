//! Deployer trait and deploy result types.
//!
//! A deployer turns a [`DeployTask`] into provisioned (or destroyed) cloud
//! resources by driving one IaC tool, locally or through a remote service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::state::DeployerTaskStatus;
use crate::task::{DeployTask, ServiceDescriptor};
use crate::{Error, Result, TaskId};

/// Which IaC engine handles a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployerKind {
    Terraform,
    #[serde(rename = "opentofu")]
    OpenTofu,
}

impl DeployerKind {
    pub const ALL: [DeployerKind; 2] = [DeployerKind::Terraform, DeployerKind::OpenTofu];

    /// Default executable name on `PATH`.
    pub fn executable(self) -> &'static str {
        match self {
            DeployerKind::Terraform => "terraform",
            DeployerKind::OpenTofu => "tofu",
        }
    }
}

impl std::fmt::Display for DeployerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployerKind::Terraform => write!(f, "terraform"),
            DeployerKind::OpenTofu => write!(f, "opentofu"),
        }
    }
}

impl std::str::FromStr for DeployerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "terraform" => Ok(DeployerKind::Terraform),
            "opentofu" | "open_tofu" | "tofu" => Ok(DeployerKind::OpenTofu),
            other => Err(Error::DeployerNotFound(other.to_string())),
        }
    }
}

/// Outcome of one executor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResult {
    pub id: TaskId,
    pub state: DeployerTaskStatus,
    pub message: Option<String>,
    /// Serialized tool state after the run.
    pub raw_tool_state: Option<String>,
    /// Contents of audit-relevant workspace files, keyed by file name.
    #[serde(default)]
    pub important_file_contents: HashMap<String, String>,
    /// Outputs declared by the script, recovered from the tool state.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
}

impl DeployResult {
    pub fn new(id: TaskId, state: DeployerTaskStatus) -> Self {
        Self {
            id,
            state,
            message: None,
            raw_tool_state: None,
            important_file_contents: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    /// A failed result for the path the task's operation runs.
    pub fn failure(task: &DeployTask, message: impl Into<String>) -> Self {
        let state = DeployerTaskStatus::finished(task.operation.uses_destroy_path(), false);
        Self {
            message: Some(message.into()),
            ..Self::new(task.id, state)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

/// Result of validating a deployment script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub diagnostics: Vec<ScriptDiagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDiagnostic {
    pub severity: String,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
}

/// Trait for deployers.
///
/// Modify reuses [`Deployer::deploy`] with the updated task.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// The IaC engine this deployer drives.
    fn kind(&self) -> DeployerKind;

    /// Provision or update the resources described by the task.
    async fn deploy(&self, task: &DeployTask) -> Result<DeployResult>;

    /// Destroy the resources recorded in the task's previous tool state.
    async fn destroy(&self, task: &DeployTask) -> Result<DeployResult>;

    /// Check a descriptor's script without touching any cloud resource.
    async fn validate(&self, descriptor: &ServiceDescriptor) -> Result<ScriptValidationResult> {
        let _ = descriptor;
        Err(Error::InvalidInput(format!(
            "{} deployer does not support script validation",
            self.kind()
        )))
    }

    /// Produce the tool's JSON plan for a task.
    async fn plan(&self, task: &DeployTask) -> Result<Value> {
        let _ = task;
        Err(Error::InvalidInput(format!(
            "{} deployer does not support plan preview",
            self.kind()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("OpenTofu".parse::<DeployerKind>().unwrap(), DeployerKind::OpenTofu);
        assert_eq!("terraform".parse::<DeployerKind>().unwrap(), DeployerKind::Terraform);
        let err = "helm".parse::<DeployerKind>().unwrap_err();
        assert!(matches!(err, Error::DeployerNotFound(_)));
    }

    #[test]
    fn test_kind_serde_matches_display() {
        for kind in DeployerKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
