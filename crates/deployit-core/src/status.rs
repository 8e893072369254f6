//! Persisted deployment status and the store abstraction over it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::deployer::DeployResult;
use crate::state::ServiceDeploymentState;
use crate::{Error, Result, ServiceId, TaskId};

/// Status record for one service, keyed by its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub service_id: ServiceId,
    /// Task that last wrote this record.
    pub task_id: Option<TaskId>,
    pub state: ServiceDeploymentState,
    pub error: Option<String>,
    /// Tool state from the last finished run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_state: Option<String>,
    #[serde(default)]
    pub important_files: HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Store for deployment status. Implementations must make each call atomic
/// per service.
#[async_trait]
pub trait DeploymentStatusStore: Send + Sync {
    async fn get(&self, service_id: ServiceId) -> Result<Option<DeploymentStatus>>;

    /// Record that a task started, moving the service to `state`.
    async fn begin(
        &self,
        service_id: ServiceId,
        task_id: TaskId,
        state: ServiceDeploymentState,
    ) -> Result<DeploymentStatus>;

    /// Persist a finished result under `state`. The previous tool state is
    /// kept when the result carries none.
    async fn record_result(
        &self,
        service_id: ServiceId,
        result: &DeployResult,
        state: ServiceDeploymentState,
    ) -> Result<DeploymentStatus>;

    /// Overwrite only the state.
    async fn update_state(
        &self,
        service_id: ServiceId,
        state: ServiceDeploymentState,
    ) -> Result<DeploymentStatus>;
}

/// In-process status store.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    records: RwLock<HashMap<ServiceId, DeploymentStatus>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStatusStore for InMemoryStatusStore {
    async fn get(&self, service_id: ServiceId) -> Result<Option<DeploymentStatus>> {
        Ok(self.records.read().await.get(&service_id).cloned())
    }

    async fn begin(
        &self,
        service_id: ServiceId,
        task_id: TaskId,
        state: ServiceDeploymentState,
    ) -> Result<DeploymentStatus> {
        let mut records = self.records.write().await;
        let record = records
            .entry(service_id)
            .or_insert_with(|| DeploymentStatus {
                service_id,
                task_id: None,
                state,
                error: None,
                tool_state: None,
                important_files: HashMap::new(),
                updated_at: Utc::now(),
            });
        record.task_id = Some(task_id);
        record.state = state;
        record.error = None;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn record_result(
        &self,
        service_id: ServiceId,
        result: &DeployResult,
        state: ServiceDeploymentState,
    ) -> Result<DeploymentStatus> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&service_id)
            .ok_or_else(|| Error::NotFound(format!("deployment {service_id}")))?;
        record.task_id = Some(result.id);
        record.state = state;
        record.error = if result.is_success() {
            None
        } else {
            result.message.clone()
        };
        if let Some(tool_state) = &result.raw_tool_state {
            record.tool_state = Some(tool_state.clone());
        }
        if !result.important_file_contents.is_empty() {
            record.important_files = result.important_file_contents.clone();
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn update_state(
        &self,
        service_id: ServiceId,
        state: ServiceDeploymentState,
    ) -> Result<DeploymentStatus> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&service_id)
            .ok_or_else(|| Error::NotFound(format!("deployment {service_id}")))?;
        record.state = state;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}
