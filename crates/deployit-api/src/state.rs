//! Application state.

use deployit_config::{DeployEnvironments, EnvCredentialCenter, EnvSource, SystemConfig};
use deployit_core::secret::AesGcmCodec;
use deployit_core::status::DeploymentStatusStore;
use deployit_core::versions::VersionStore;
use deployit_deployer::{DeployerRegistry, VersionCacheManager};
use deployit_scheduler::{DeployOrchestrator, PollSettingsHandle, StatusPoller, WorkerPool};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DeployOrchestrator>,
    pub poller: StatusPoller,
    pub poll_settings: PollSettingsHandle,
    pub versions: Arc<VersionCacheManager>,
    pub environments: Arc<DeployEnvironments>,
    pub store: Arc<dyn DeploymentStatusStore>,
}

impl AppState {
    /// Wire deployers, the orchestrator and the poller from configuration.
    pub fn from_config(
        config: &SystemConfig,
        store: Arc<dyn DeploymentStatusStore>,
        version_store: Arc<dyn VersionStore>,
        env: Arc<dyn EnvSource>,
    ) -> deployit_core::Result<Self> {
        let credentials = EnvCredentialCenter::new(config.credentials.clone(), env.clone());
        let environments = Arc::new(DeployEnvironments::new(
            Arc::new(credentials),
            Arc::new(AesGcmCodec::from_passphrase(&config.secret_key)),
            env,
        ));
        let registry = DeployerRegistry::from_config(config, environments.clone());
        let versions = Arc::new(VersionCacheManager::from_config(config, version_store)?);
        let orchestrator = DeployOrchestrator::new(
            registry,
            store.clone(),
            WorkerPool::new(config.workers),
        )
        .with_versions(versions.clone());

        let poll_settings = PollSettingsHandle::new(config.poll);
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            poller: StatusPoller::new(store.clone(), poll_settings.clone()),
            poll_settings,
            versions,
            environments,
            store,
        })
    }
}
