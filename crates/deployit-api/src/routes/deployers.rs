//! Deployer endpoints: tool versions, script validation, plan preview.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use deployit_config::variables::fixed_variables;
use deployit_core::deployer::{DeployerKind, ScriptValidationResult};
use deployit_core::state::Operation;
use deployit_core::task::ServiceDescriptor;
use deployit_core::versions::ToolVersion;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::services::ServiceTaskBody;
use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_deployers))
        .route("/{kind}/versions", get(list_versions))
        .route("/validate", post(validate))
        .route("/plan", post(plan))
        .route("/variables", post(variables))
}

async fn list_deployers(State(state): State<AppState>) -> Json<Vec<DeployerKind>> {
    Json(state.orchestrator.registry().kinds())
}

async fn list_versions(
    State(state): State<AppState>,
    Path(kind): Path<DeployerKind>,
) -> Json<Vec<ToolVersion>> {
    let versions = state.versions.get_versions(kind).await;
    Json(versions.into_iter().collect())
}

async fn validate(
    State(state): State<AppState>,
    Json(descriptor): Json<ServiceDescriptor>,
) -> Result<Json<ScriptValidationResult>, ApiError> {
    Ok(Json(state.orchestrator.validate(&descriptor).await?))
}

async fn plan(
    State(state): State<AppState>,
    Json(body): Json<ServiceTaskBody>,
) -> Result<Json<Value>, ApiError> {
    let task = body.into_task(Operation::Deploy);
    Ok(Json(state.orchestrator.plan(&task).await?))
}

#[derive(Debug, Serialize)]
pub struct VariablesResponse {
    /// Every variable that would be passed, sensitive ones still encoded.
    pub variables: HashMap<String, Value>,
    pub fixed: HashMap<String, String>,
}

async fn variables(
    State(state): State<AppState>,
    Json(body): Json<ServiceTaskBody>,
) -> Result<Json<VariablesResponse>, ApiError> {
    let task = body.into_task(Operation::Deploy);
    let variables = state.environments.all_deployment_variables(&task)?;
    Ok(Json(VariablesResponse {
        variables,
        fixed: fixed_variables(&task.descriptor),
    }))
}

#[cfg(test)]
mod tests {
    use crate::routes::services::tests::body;
    use crate::routes::test_support::{get, json_request, send, state};
    use axum::http::StatusCode;
    use deployit_core::ServiceId;
    use serde_json::json;

    #[tokio::test]
    async fn test_versions_fall_back_to_defaults() {
        let state = state();
        let (status, body) = send(&state, get("/api/v1/deployers/opentofu/versions")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["1.6.2", "1.7.3"]));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let state = state();
        let (status, _) = send(&state, get("/api/v1/deployers/helm/versions")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_lists_registered_deployers() {
        let state = state();
        let (_, body) = send(&state, get("/api/v1/deployers")).await;
        assert_eq!(body, json!(["opentofu"]));
    }

    #[tokio::test]
    async fn test_variables_preview() {
        let state = state();
        let (status, body) = send(
            &state,
            json_request(
                "POST",
                "/api/v1/deployers/variables",
                &body(ServiceId::new(), "small"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fixed"], json!({"fixed": "42"}));
        assert_eq!(body["variables"]["fixed"], json!("42"));
    }

    #[tokio::test]
    async fn test_validate_unsupported_by_deployer() {
        let state = state();
        let descriptor = body(ServiceId::new(), "small")["descriptor"].clone();
        let (status, _) = send(
            &state,
            json_request("POST", "/api/v1/deployers/validate", &descriptor),
        )
        .await;
        // The test deployer keeps the default validate, which rejects.
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
