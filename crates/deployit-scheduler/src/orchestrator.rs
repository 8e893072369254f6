//! Deploy task state machine.
//!
//! A task is first *started*: every precondition is checked and the initial
//! state is persisted, so configuration problems surface to the caller
//! immediately. The started task is then *executed* on a worker, where any
//! failure is folded into a failed [`DeployResult`].

use deployit_core::deployer::{DeployResult, Deployer, ScriptValidationResult};
use deployit_core::state::{DeployerTaskStatus, Operation, ServiceDeploymentState};
use deployit_core::status::DeploymentStatusStore;
use deployit_core::task::{DeployTask, ServiceDescriptor};
use deployit_core::versions::ToolVersion;
use deployit_core::{Error, Result, TaskId};
use deployit_deployer::{DeployerRegistry, VersionCacheManager};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::worker::WorkerPool;

/// A task whose preconditions passed and whose initial state is persisted.
pub struct StartedTask {
    task: DeployTask,
    deployer: Arc<dyn Deployer>,
    tool_version: Option<ToolVersion>,
}

impl StartedTask {
    pub fn task(&self) -> &DeployTask {
        &self.task
    }

    /// Tool version picked for the descriptor's required version.
    pub fn tool_version(&self) -> Option<ToolVersion> {
        self.tool_version
    }
}

pub struct DeployOrchestrator {
    registry: DeployerRegistry,
    store: Arc<dyn DeploymentStatusStore>,
    versions: Option<Arc<VersionCacheManager>>,
    pool: WorkerPool,
    seen: Mutex<HashSet<TaskId>>,
}

impl DeployOrchestrator {
    pub fn new(
        registry: DeployerRegistry,
        store: Arc<dyn DeploymentStatusStore>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            registry,
            store,
            versions: None,
            pool,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Check required tool versions against the version cache before a task
    /// starts.
    pub fn with_versions(mut self, versions: Arc<VersionCacheManager>) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn registry(&self) -> &DeployerRegistry {
        &self.registry
    }

    /// Start a task and run it on the worker pool.
    pub async fn submit(self: &Arc<Self>, task: DeployTask) -> Result<JoinHandle<DeployResult>> {
        let started = self.start(task).await?;
        let this = self.clone();
        Ok(self.pool.spawn(async move { this.execute(started).await }))
    }

    /// Start a task and run it on the current task.
    pub async fn run(&self, task: DeployTask) -> Result<DeployResult> {
        let started = self.start(task).await?;
        Ok(self.execute(started).await)
    }

    /// Check preconditions and persist the operation's initial state.
    pub async fn start(&self, mut task: DeployTask) -> Result<StartedTask> {
        let operation = task.operation;
        let service_id = task.service_id();
        let deployer = self.registry.get(task.deployer_kind())?;

        if !operation.uses_destroy_path() {
            task.descriptor.flavor(&task.request.flavor)?;
        }
        let tool_version = self.check_tool_version(&task).await?;

        let current = self.store.get(service_id).await?;
        let current_state = current.as_ref().map(|s| s.state);
        if let Some(state) = current_state.filter(|s| !s.is_terminal()) {
            return Err(Error::Conflict(format!(
                "service {service_id} is busy in state {state}"
            )));
        }
        if !operation.is_allowed_from(current_state) {
            let from = current_state.map_or("NOT_DEPLOYED", ServiceDeploymentState::as_str);
            return Err(Error::Conflict(format!(
                "{operation} is not allowed for service {service_id} in state {from}"
            )));
        }

        if task.previous_tool_state.is_none() {
            task.previous_tool_state = current.and_then(|s| s.tool_state);
        }
        if operation == Operation::Destroy && task.previous_tool_state.is_none() {
            return Err(Error::InvalidInput(format!(
                "service {service_id} is not deployed"
            )));
        }

        self.claim_task_id(task.id)?;
        self.store
            .begin(service_id, task.id, operation.initial_state())
            .await?;
        info!(
            task_id = %task.id,
            service_id = %service_id,
            operation = %operation,
            state = %operation.initial_state(),
            "Task started"
        );

        Ok(StartedTask {
            task,
            deployer,
            tool_version,
        })
    }

    /// Run a started task to completion and persist its final state.
    ///
    /// Never fails: deployer errors and panics become a failed result.
    pub async fn execute(&self, started: StartedTask) -> DeployResult {
        let StartedTask {
            task,
            deployer,
            tool_version,
        } = started;
        let span = info_span!(
            "deploy_task",
            task_id = %task.id,
            operation = %task.operation,
            deployer = %deployer.kind(),
        );

        async move {
            if let Some(version) = tool_version {
                info!(version = %version, "Using tool version");
            }
            let result = if nothing_to_destroy(&task) {
                info!("No stored tool state, nothing to destroy");
                DeployResult::new(task.id, DeployerTaskStatus::DestroySuccess)
            } else {
                let invocation = async {
                    if task.operation.uses_destroy_path() {
                        deployer.destroy(&task).await
                    } else {
                        deployer.deploy(&task).await
                    }
                };
                match AssertUnwindSafe(invocation).catch_unwind().await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        error!(error = %e, "Deployer failed");
                        DeployResult::failure(&task, e.to_string())
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(panic = %message, "Deployer panicked");
                        DeployResult::failure(&task, format!("deployer panicked: {message}"))
                    }
                }
            };
            self.persist(&task, &result).await;
            self.release_task_id(task.id);
            result
        }
        .instrument(span)
        .await
    }

    pub async fn validate(&self, descriptor: &ServiceDescriptor) -> Result<ScriptValidationResult> {
        let deployer = self.registry.get(descriptor.deployment.deployer_tool.kind)?;
        deployer.validate(descriptor).await
    }

    pub async fn plan(&self, task: &DeployTask) -> Result<Value> {
        let deployer = self.registry.get(task.deployer_kind())?;
        task.descriptor.flavor(&task.request.flavor)?;
        deployer.plan(task).await
    }

    async fn check_tool_version(&self, task: &DeployTask) -> Result<Option<ToolVersion>> {
        let Some(versions) = &self.versions else {
            return Ok(None);
        };
        let required = task.descriptor.deployment.deployer_tool.version.trim();
        if required.is_empty() {
            return Ok(None);
        }
        versions
            .find_best_version(task.deployer_kind(), required)
            .await
            .map(Some)
    }

    fn claim_task_id(&self, id: TaskId) -> Result<()> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| Error::Internal("task registry lock poisoned".into()))?;
        if !seen.insert(id) {
            return Err(Error::Conflict(format!("task id {id} was already used")));
        }
        Ok(())
    }

    /// Finished ids are never handed out again, so only live ones are kept.
    fn release_task_id(&self, id: TaskId) {
        match self.seen.lock() {
            Ok(mut seen) => {
                seen.remove(&id);
            }
            Err(_) => warn!(task_id = %id, "Task registry lock poisoned"),
        }
    }

    /// Two writes: the generic state with the result, then the
    /// operation-specific state when it differs. Failures are logged only.
    async fn persist(&self, task: &DeployTask, result: &DeployResult) {
        let service_id = task.service_id();
        let generic = task.operation.generic_state(result.is_success());
        if let Err(e) = self.store.record_result(service_id, result, generic).await {
            error!(error = %e, state = %generic, "Failed to persist task result");
            return;
        }

        let settled = task.operation.settle(generic);
        if settled != generic {
            if let Err(e) = self.store.update_state(service_id, settled).await {
                error!(error = %e, state = %settled, "Failed to persist final state");
                return;
            }
        }

        if result.is_success() {
            info!(state = %settled, "Task finished");
        } else {
            warn!(state = %settled, message = ?result.message, "Task failed");
        }
    }
}

/// A rollback or purge after a deploy that never produced tool state has no
/// resources to remove.
fn nothing_to_destroy(task: &DeployTask) -> bool {
    matches!(task.operation, Operation::Rollback | Operation::Purge)
        && task.previous_tool_state.is_none()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
