//! Deployer that hands tasks to a remote execution service.
//!
//! The service runs the same init/plan/apply sequence as the local deployer
//! and answers with the tool state and important files.

use async_trait::async_trait;
use deployit_config::DeployEnvironments;
use deployit_core::deployer::{DeployResult, Deployer, DeployerKind};
use deployit_core::state::{DeployerTaskStatus, Operation};
use deployit_core::task::DeployTask;
use deployit_core::{Error, Result, TaskId};
use deployit_executor::ToolState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Remote runs can take as long as local ones.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRequest<'a> {
    task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    script: Option<&'a str>,
    required_version: &'a str,
    variables: &'a HashMap<String, Value>,
    env_variables: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tf_state: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteResponse {
    command_successful: bool,
    #[serde(default)]
    command_std_error: Option<String>,
    #[serde(default)]
    terraform_state: Option<String>,
    #[serde(default)]
    important_file_content_map: HashMap<String, String>,
}

pub struct RemoteDeployer {
    kind: DeployerKind,
    client: reqwest::Client,
    base_url: String,
    environments: Arc<DeployEnvironments>,
}

impl RemoteDeployer {
    pub fn new(
        kind: DeployerKind,
        base_url: impl Into<String>,
        environments: Arc<DeployEnvironments>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            kind,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            environments,
        }
    }

    fn url(&self, action: &str) -> String {
        format!("{}/{}/{}/scripts", self.base_url, self.kind.executable(), action)
    }

    async fn submit(&self, task: &DeployTask, action: &str, destroy: bool) -> Result<DeployResult> {
        let resolved = self.environments.resolve(task).await?;
        let deployment = &task.descriptor.deployment;
        let request = RemoteRequest {
            task_id: task.id,
            script: (!destroy).then_some(deployment.script.as_str()),
            required_version: deployment.deployer_tool.version.trim(),
            variables: &resolved.variables,
            env_variables: resolved.process_env(),
            tf_state: task.previous_tool_state.as_deref(),
        };

        let url = self.url(action);
        info!(task_id = %task.id, url = %url, "Submitting task to remote deployer");
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("remote deployer unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(task_id = %task.id, status = %status, "Remote deployer rejected task");
            return Err(Error::ExecutionFailed(format!(
                "remote deployer returned {status}: {body}"
            )));
        }

        let body: RemoteResponse = response
            .json()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("invalid remote response: {e}")))?;

        let mut result = DeployResult::new(
            task.id,
            DeployerTaskStatus::finished(destroy, body.command_successful),
        );
        if !body.command_successful {
            result.message = body.command_std_error;
        }
        if let Some(raw) = &body.terraform_state {
            match ToolState::parse(raw) {
                Ok(state) => result.outputs = state.outputs,
                Err(e) => warn!(task_id = %task.id, error = %e, "Could not parse tool state"),
            }
        }
        result.raw_tool_state = body.terraform_state;
        result.important_file_contents = body.important_file_content_map;
        Ok(result)
    }
}

#[async_trait]
impl Deployer for RemoteDeployer {
    fn kind(&self) -> DeployerKind {
        self.kind
    }

    async fn deploy(&self, task: &DeployTask) -> Result<DeployResult> {
        let action = if task.operation == Operation::Modify {
            "modify"
        } else {
            "deploy"
        };
        self.submit(task, action, false).await
    }

    async fn destroy(&self, task: &DeployTask) -> Result<DeployResult> {
        if task.previous_tool_state.is_none() {
            return Err(Error::InvalidInput(format!(
                "service {} has no stored state to destroy",
                task.service_id()
            )));
        }
        self.submit(task, "destroy", true).await
    }
}
