//! API routes.

pub mod deployers;
pub mod health;
pub mod services;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/services", services::router())
        .nest("/deployers", deployers::router())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::AppState;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use deployit_config::{DeployEnvironments, ProcessEnv};
    use deployit_core::credential::{CredentialCenter, CredentialType, CredentialVariables};
    use deployit_core::deployer::{DeployResult, Deployer, DeployerKind};
    use deployit_core::secret::AesGcmCodec;
    use deployit_core::state::DeployerTaskStatus;
    use deployit_core::status::InMemoryStatusStore;
    use deployit_core::task::DeployTask;
    use deployit_core::versions::{VersionSet, parse_version_set};
    use deployit_core::{Error, Result};
    use deployit_config::PollSettings;
    use deployit_deployer::{DeployerRegistry, InMemoryVersionStore, VersionCacheManager, VersionFetcher};
    use deployit_scheduler::{DeployOrchestrator, PollSettingsHandle, StatusPoller, WorkerPool};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct InstantDeployer;

    #[async_trait]
    impl Deployer for InstantDeployer {
        fn kind(&self) -> DeployerKind {
            DeployerKind::OpenTofu
        }

        async fn deploy(&self, task: &DeployTask) -> Result<DeployResult> {
            let mut result = DeployResult::new(task.id, DeployerTaskStatus::DeploySuccess);
            result.raw_tool_state = Some("{}".into());
            Ok(result)
        }

        async fn destroy(&self, task: &DeployTask) -> Result<DeployResult> {
            Ok(DeployResult::new(task.id, DeployerTaskStatus::DestroySuccess))
        }
    }

    struct NoCredentials;

    #[async_trait]
    impl CredentialCenter for NoCredentials {
        async fn get_credential(
            &self,
            csp: &str,
            _site: &str,
            credential_type: CredentialType,
            _user_id: Option<&str>,
        ) -> Result<CredentialVariables> {
            Ok(CredentialVariables {
                csp: csp.to_string(),
                credential_type,
                variables: vec![],
            })
        }
    }

    struct DownFeed;

    #[async_trait]
    impl VersionFetcher for DownFeed {
        async fn fetch(&self) -> Result<VersionSet> {
            Err(Error::ExternalService("offline".into()))
        }
    }

    pub fn state() -> AppState {
        let store = Arc::new(InMemoryStatusStore::new());
        let versions = Arc::new(
            VersionCacheManager::new(Arc::new(InMemoryVersionStore::new())).with_kind(
                DeployerKind::OpenTofu,
                Arc::new(DownFeed),
                parse_version_set(["1.6.2", "1.7.3"]).unwrap(),
            ),
        );
        let registry = DeployerRegistry::new().with(Arc::new(InstantDeployer));
        let orchestrator = DeployOrchestrator::new(registry, store.clone(), WorkerPool::new(2))
            .with_versions(versions.clone());
        let poll_settings = PollSettingsHandle::new(PollSettings {
            interval: Duration::from_millis(10),
            max_wait: Duration::from_millis(200),
        });
        AppState {
            orchestrator: Arc::new(orchestrator),
            poller: StatusPoller::new(store.clone(), poll_settings.clone()),
            poll_settings,
            versions,
            environments: Arc::new(DeployEnvironments::new(
                Arc::new(NoCredentials),
                Arc::new(AesGcmCodec::from_passphrase("test")),
                Arc::new(ProcessEnv),
            )),
            store,
        }
    }

    pub async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = super::router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }
}
