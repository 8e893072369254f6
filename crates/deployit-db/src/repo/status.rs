//! Deployment status, one row per service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deployit_core::deployer::DeployResult;
use deployit_core::state::ServiceDeploymentState;
use deployit_core::status::{DeploymentStatus, DeploymentStatusStore};
use deployit_core::{ServiceId, TaskId};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;

use crate::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct StatusRow {
    service_id: uuid::Uuid,
    task_id: Option<uuid::Uuid>,
    state: String,
    error: Option<String>,
    tool_state: Option<String>,
    important_files: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StatusRow> for DeploymentStatus {
    type Error = DbError;

    fn try_from(row: StatusRow) -> DbResult<Self> {
        let state: ServiceDeploymentState = row
            .state
            .parse()
            .map_err(|_| DbError::Decode(format!("state {}", row.state)))?;
        let important_files: HashMap<String, String> =
            serde_json::from_value(row.important_files)
                .map_err(|e| DbError::Decode(format!("important files: {e}")))?;
        Ok(DeploymentStatus {
            service_id: row.service_id.into(),
            task_id: row.task_id.map(TaskId::from),
            state,
            error: row.error,
            tool_state: row.tool_state,
            important_files,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "service_id, task_id, state, error, tool_state, important_files, updated_at";

/// PostgreSQL implementation of [`DeploymentStatusStore`].
///
/// Every method is a single statement, so each call is atomic per service.
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, service_id: ServiceId) -> DbResult<Option<DeploymentStatus>> {
        let row = sqlx::query_as::<_, StatusRow>(&format!(
            "SELECT {COLUMNS} FROM deployment_status WHERE service_id = $1"
        ))
        .bind(service_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(DeploymentStatus::try_from).transpose()
    }

    async fn upsert_started(
        &self,
        service_id: ServiceId,
        task_id: TaskId,
        state: ServiceDeploymentState,
    ) -> DbResult<DeploymentStatus> {
        let row = sqlx::query_as::<_, StatusRow>(&format!(
            r#"
            INSERT INTO deployment_status (service_id, task_id, state, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (service_id) DO UPDATE
            SET task_id = EXCLUDED.task_id,
                state = EXCLUDED.state,
                error = NULL,
                updated_at = now()
            RETURNING {COLUMNS}
            "#
        ))
        .bind(service_id.as_uuid())
        .bind(task_id.as_uuid())
        .bind(state.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn update_result(
        &self,
        service_id: ServiceId,
        result: &DeployResult,
        state: ServiceDeploymentState,
    ) -> DbResult<DeploymentStatus> {
        debug!(service_id = %service_id, task_id = %result.id, state = %state, "Recording deploy result");
        let error = if result.is_success() {
            None
        } else {
            result.message.clone()
        };
        let files = (!result.important_file_contents.is_empty())
            .then(|| serde_json::to_value(&result.important_file_contents))
            .transpose()
            .map_err(|e| DbError::Decode(format!("important files: {e}")))?;

        let row = sqlx::query_as::<_, StatusRow>(&format!(
            r#"
            UPDATE deployment_status
            SET task_id = $2,
                state = $3,
                error = $4,
                tool_state = COALESCE($5, tool_state),
                important_files = COALESCE($6, important_files),
                updated_at = now()
            WHERE service_id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(service_id.as_uuid())
        .bind(result.id.as_uuid())
        .bind(state.as_str())
        .bind(error)
        .bind(result.raw_tool_state.as_deref())
        .bind(files)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("deployment {service_id}")))?;
        row.try_into()
    }

    async fn set_state(
        &self,
        service_id: ServiceId,
        state: ServiceDeploymentState,
    ) -> DbResult<DeploymentStatus> {
        let row = sqlx::query_as::<_, StatusRow>(&format!(
            r#"
            UPDATE deployment_status
            SET state = $2, updated_at = now()
            WHERE service_id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(service_id.as_uuid())
        .bind(state.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("deployment {service_id}")))?;
        row.try_into()
    }
}

#[async_trait]
impl DeploymentStatusStore for PgStatusStore {
    async fn get(&self, service_id: ServiceId) -> deployit_core::Result<Option<DeploymentStatus>> {
        Ok(self.fetch(service_id).await?)
    }

    async fn begin(
        &self,
        service_id: ServiceId,
        task_id: TaskId,
        state: ServiceDeploymentState,
    ) -> deployit_core::Result<DeploymentStatus> {
        Ok(self.upsert_started(service_id, task_id, state).await?)
    }

    async fn record_result(
        &self,
        service_id: ServiceId,
        result: &DeployResult,
        state: ServiceDeploymentState,
    ) -> deployit_core::Result<DeploymentStatus> {
        Ok(self.update_result(service_id, result, state).await?)
    }

    async fn update_state(
        &self,
        service_id: ServiceId,
        state: ServiceDeploymentState,
    ) -> deployit_core::Result<DeploymentStatus> {
        Ok(self.set_state(service_id, state).await?)
    }
}
