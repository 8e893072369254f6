//! Deployer that runs Terraform or OpenTofu on this host.

use async_trait::async_trait;
use deployit_config::DeployEnvironments;
use deployit_core::deployer::{DeployResult, Deployer, DeployerKind, ScriptValidationResult};
use deployit_core::state::DeployerTaskStatus;
use deployit_core::task::{DeployTask, ServiceDescriptor};
use deployit_core::{Error, Result, TaskId};
use deployit_executor::{
    ExecutionInputs, ExecutionOutcome, IacAction, IacExecutor, ProviderRequirement, ToolState,
    render_version_constraints,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Longest tail of tool output kept as a failure message.
const MAX_MESSAGE_LEN: usize = 4000;

pub struct LocalIacDeployer {
    kind: DeployerKind,
    executor: IacExecutor,
    environments: Arc<DeployEnvironments>,
    /// Provider pins, keyed by CSP.
    providers: Vec<(String, ProviderRequirement)>,
}

impl LocalIacDeployer {
    pub fn new(
        kind: DeployerKind,
        executor: IacExecutor,
        environments: Arc<DeployEnvironments>,
        providers: Vec<(String, ProviderRequirement)>,
    ) -> Self {
        Self {
            kind,
            executor,
            environments,
            providers,
        }
    }

    fn version_constraints(&self, descriptor: &ServiceDescriptor) -> String {
        let providers: Vec<ProviderRequirement> = self
            .providers
            .iter()
            .filter(|(csp, _)| *csp == descriptor.csp)
            .map(|(_, p)| p.clone())
            .collect();
        let required = descriptor.deployment.deployer_tool.version.trim();
        render_version_constraints(
            (!required.is_empty()).then_some(required),
            &providers,
        )
    }

    async fn inputs(&self, task: &DeployTask, with_script: bool) -> Result<ExecutionInputs> {
        let resolved = self.environments.resolve(task).await?;
        Ok(ExecutionInputs {
            script: with_script.then(|| task.descriptor.deployment.script.clone()),
            version_constraints: self.version_constraints(&task.descriptor),
            previous_state: task.previous_tool_state.clone(),
            env: resolved.process_env(),
            variables: resolved.variables,
        })
    }

    fn to_result(&self, task: &DeployTask, destroy: bool, outcome: ExecutionOutcome) -> DeployResult {
        let mut result = DeployResult::new(
            task.id,
            DeployerTaskStatus::finished(destroy, outcome.success),
        );
        if !outcome.success {
            result.message = Some(tail(&outcome.output, MAX_MESSAGE_LEN));
        }
        if let Some(raw) = &outcome.tool_state {
            match ToolState::parse(raw) {
                Ok(state) => result.outputs = state.outputs,
                Err(e) => warn!(task_id = %task.id, error = %e, "Could not parse tool state"),
            }
        }
        result.raw_tool_state = outcome.tool_state;
        result.important_file_contents = outcome.important_files;
        result
    }
}

#[async_trait]
impl Deployer for LocalIacDeployer {
    fn kind(&self) -> DeployerKind {
        self.kind
    }

    async fn deploy(&self, task: &DeployTask) -> Result<DeployResult> {
        info!(task_id = %task.id, deployer = %self.kind, operation = %task.operation, "Starting local deploy");
        let inputs = self.inputs(task, true).await?;
        let outcome = self
            .executor
            .execute(task.id, IacAction::Deploy, &inputs)
            .await?;
        Ok(self.to_result(task, false, outcome))
    }

    async fn destroy(&self, task: &DeployTask) -> Result<DeployResult> {
        if task.previous_tool_state.is_none() {
            return Err(Error::InvalidInput(format!(
                "service {} has no stored state to destroy",
                task.service_id()
            )));
        }
        info!(task_id = %task.id, deployer = %self.kind, operation = %task.operation, "Starting local destroy");
        let inputs = self.inputs(task, false).await?;
        let outcome = self
            .executor
            .execute(task.id, IacAction::Destroy, &inputs)
            .await?;
        Ok(self.to_result(task, true, outcome))
    }

    async fn validate(&self, descriptor: &ServiceDescriptor) -> Result<ScriptValidationResult> {
        let result = self
            .executor
            .validate(
                TaskId::new(),
                &descriptor.deployment.script,
                &self.version_constraints(descriptor),
            )
            .await?;
        Ok(result)
    }

    async fn plan(&self, task: &DeployTask) -> Result<Value> {
        let inputs = self.inputs(task, true).await?;
        Ok(self.executor.plan_json(task.id, &inputs).await?)
    }
}

fn tail(output: &str, max: usize) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
