//! In-process execution of one deploy operation.

use anyhow::{Context, Result};
use deployit_config::{DeployEnvironments, EnvCredentialCenter, ProcessEnv, SystemConfig};
use deployit_core::deployer::DeployResult;
use deployit_core::secret::AesGcmCodec;
use deployit_core::state::{DeployerTaskStatus, Operation, ServiceDeploymentState};
use deployit_core::status::{DeploymentStatusStore, InMemoryStatusStore};
use deployit_core::task::{DeployRequest, DeployTask, ServiceDescriptor};
use deployit_core::{ServiceId, TaskId};
use deployit_deployer::{DeployerRegistry, InMemoryVersionStore, VersionCacheManager};
use deployit_scheduler::{DeployOrchestrator, WorkerPool};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct RunArgs {
    pub descriptor: PathBuf,
    pub request: PathBuf,
    pub operation: Operation,
    pub tool_state: Option<PathBuf>,
    pub state_out: Option<PathBuf>,
    pub namespace: String,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Record an earlier successful deployment so destroy and modify find its
/// tool state.
async fn seed_state(
    store: &dyn DeploymentStatusStore,
    service_id: ServiceId,
    tool_state: String,
) -> Result<()> {
    let task_id = TaskId::new();
    store
        .begin(service_id, task_id, ServiceDeploymentState::DeploySuccess)
        .await?;
    let mut earlier = DeployResult::new(task_id, DeployerTaskStatus::DeploySuccess);
    earlier.raw_tool_state = Some(tool_state);
    store
        .record_result(service_id, &earlier, ServiceDeploymentState::DeploySuccess)
        .await?;
    Ok(())
}

fn orchestrator(config: &SystemConfig, store: Arc<InMemoryStatusStore>) -> Result<DeployOrchestrator> {
    let env = Arc::new(ProcessEnv);
    let credentials = EnvCredentialCenter::new(config.credentials.clone(), env.clone());
    let environments = Arc::new(DeployEnvironments::new(
        Arc::new(credentials),
        Arc::new(AesGcmCodec::from_passphrase(&config.secret_key)),
        env,
    ));
    let registry = DeployerRegistry::from_config(config, environments);
    let versions = VersionCacheManager::from_config(config, Arc::new(InMemoryVersionStore::new()))?;
    Ok(DeployOrchestrator::new(registry, store, WorkerPool::new(1)).with_versions(Arc::new(versions)))
}

/// Run an operation against the configured deployers and print the result.
pub async fn run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = SystemConfig::load(config_path)?;
    let descriptor: ServiceDescriptor = read_json(&args.descriptor)?;
    let request: DeployRequest = read_json(&args.request)?;
    let service_id = request.service_id;

    let store = Arc::new(InMemoryStatusStore::new());
    if let Some(path) = &args.tool_state {
        let state = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tool state: {}", path.display()))?;
        seed_state(store.as_ref(), service_id, state).await?;
    }

    let orchestrator = orchestrator(&config, store.clone())?;
    let task = DeployTask::new(args.operation, request, descriptor, args.namespace, "");
    info!(task_id = %task.id, service_id = %service_id, operation = %args.operation, "Running task");

    let result = orchestrator.run(task).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(path) = &args.state_out {
        let status = store.get(service_id).await?;
        if let Some(state) = status.and_then(|s| s.tool_state) {
            std::fs::write(path, state)
                .with_context(|| format!("Failed to write tool state: {}", path.display()))?;
        }
    }

    if !result.is_success() {
        anyhow::bail!("{} failed", args.operation);
    }
    Ok(())
}
