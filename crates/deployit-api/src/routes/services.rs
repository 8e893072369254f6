//! Service deployment endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use deployit_core::state::{Operation, ServiceDeploymentState};
use deployit_core::status::DeploymentStatus;
use deployit_core::task::{DeployRequest, DeployTask, ServiceDescriptor};
use deployit_core::{ServiceId, TaskId};
use deployit_scheduler::PollOutcome;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(deploy_service))
        .route("/{id}", get(get_status))
        .route("/{id}/status", get(poll_status))
        .route("/{id}/operations/{operation}", post(run_operation))
}

/// Request and descriptor for one operation on a service.
#[derive(Debug, Deserialize)]
pub struct ServiceTaskBody {
    pub request: DeployRequest,
    pub descriptor: ServiceDescriptor,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub service_template_id: String,
}

impl ServiceTaskBody {
    pub fn into_task(self, operation: Operation) -> DeployTask {
        DeployTask::new(
            operation,
            self.request,
            self.descriptor,
            self.namespace,
            self.service_template_id,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub service_id: ServiceId,
    pub task_id: TaskId,
    pub operation: Operation,
    pub state: ServiceDeploymentState,
}

async fn deploy_service(
    State(state): State<AppState>,
    Json(body): Json<ServiceTaskBody>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    submit(&state, body.into_task(Operation::Deploy)).await
}

async fn run_operation(
    State(state): State<AppState>,
    Path((id, operation)): Path<(ServiceId, Operation)>,
    Json(body): Json<ServiceTaskBody>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    if body.request.service_id != id {
        return Err(ApiError::BadRequest(format!(
            "request is for service {}, not {id}",
            body.request.service_id
        )));
    }
    submit(&state, body.into_task(operation)).await
}

async fn submit(
    state: &AppState,
    task: DeployTask,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let response = AcceptedResponse {
        service_id: task.service_id(),
        task_id: task.id,
        operation: task.operation,
        state: task.operation.initial_state(),
    };
    // The handle is dropped; the task keeps running on the worker pool.
    state.orchestrator.submit(task).await?;
    info!(task_id = %response.task_id, service_id = %response.service_id, operation = %response.operation, "Accepted task");
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<DeploymentStatus>, ApiError> {
    let status = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("deployment {id}")))?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub last_known: Option<ServiceDeploymentState>,
}

async fn poll_status(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollOutcome>, ApiError> {
    let outcome = state.poller.spawn(id, query.last_known).wait().await?;
    Ok(Json(outcome))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::routes::test_support::{get, json_request, send, state};
    use serde_json::{Value, json};

    pub fn body(service_id: ServiceId, flavor: &str) -> Value {
        json!({
            "request": {
                "service_id": service_id,
                "user_id": "alice",
                "csp": "openstack",
                "region": {"name": "RegionOne"},
                "flavor": flavor,
                "hosting_type": "self"
            },
            "descriptor": {
                "name": "kafka",
                "csp": "openstack",
                "flavors": [{"name": "small", "properties": {"size": "1"}}],
                "deployment": {
                    "deployer_tool": {"kind": "opentofu", "version": ">= 1.6.0"},
                    "credential_type": "variables",
                    "script": "resource \"null_resource\" \"x\" {}",
                    "variables": [
                        {"name": "fixed", "kind": "fix_variable", "value": "42"}
                    ]
                }
            }
        })
    }

    async fn wait_for_terminal(state: &AppState, id: ServiceId) -> Value {
        let mut last: Option<String> = None;
        for _ in 0..20 {
            let uri = match &last {
                Some(s) => format!("/api/v1/services/{id}/status?last_known={s}"),
                None => format!("/api/v1/services/{id}/status"),
            };
            let (status, outcome) = send(state, get(&uri)).await;
            assert_eq!(status, StatusCode::OK);
            if outcome["terminal"] == json!(true) {
                return outcome;
            }
            last = outcome["status"]["state"].as_str().map(str::to_string);
        }
        panic!("service never reached a terminal state");
    }

    #[tokio::test]
    async fn test_deploy_then_poll_to_success() {
        let state = state();
        let id = ServiceId::new();

        let (status, accepted) =
            send(&state, json_request("POST", "/api/v1/services", &body(id, "small"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["state"], "DEPLOYING");
        assert_eq!(accepted["operation"], "deploy");

        let outcome = wait_for_terminal(&state, id).await;
        assert_eq!(outcome["status"]["state"], "DEPLOY_SUCCESS");
    }

    #[tokio::test]
    async fn test_unknown_flavor_is_bad_request() {
        let state = state();
        let (status, body) = send(
            &state,
            json_request("POST", "/api/v1/services", &body(ServiceId::new(), "xl")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("xl"));
    }

    #[tokio::test]
    async fn test_operation_not_allowed_is_conflict() {
        let state = state();
        let id = ServiceId::new();
        let (status, _) = send(
            &state,
            json_request(
                "POST",
                &format!("/api/v1/services/{id}/operations/destroy"),
                &body(id, "small"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_destroy_after_deploy() {
        let state = state();
        let id = ServiceId::new();
        send(&state, json_request("POST", "/api/v1/services", &body(id, "small"))).await;
        wait_for_terminal(&state, id).await;

        let (status, accepted) = send(
            &state,
            json_request(
                "POST",
                &format!("/api/v1/services/{id}/operations/destroy"),
                &body(id, "small"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["state"], "DESTROYING");

        let outcome = wait_for_terminal(&state, id).await;
        assert_eq!(outcome["status"]["state"], "DESTROY_SUCCESS");
    }

    #[tokio::test]
    async fn test_mismatched_service_id_is_rejected() {
        let state = state();
        let (status, _) = send(
            &state,
            json_request(
                "POST",
                &format!("/api/v1/services/{}/operations/modify", ServiceId::new()),
                &body(ServiceId::new(), "small"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_poll_unknown_service_is_not_found() {
        let state = state();
        let (status, _) = send(
            &state,
            get(&format!("/api/v1/services/{}/status", ServiceId::new())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&state, get(&format!("/api/v1/services/{}", ServiceId::new()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
