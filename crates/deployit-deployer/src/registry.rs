//! Dispatch from deployer kind to deployer implementation.

use deployit_config::{DeployEnvironments, ExecutionMode, SystemConfig};
use deployit_core::deployer::{Deployer, DeployerKind};
use deployit_core::{Error, Result};
use deployit_executor::{IacExecutor, ProviderRequirement};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::local::LocalIacDeployer;
use crate::remote::RemoteDeployer;

/// Lookup table of deployers, built once at startup.
#[derive(Default, Clone)]
pub struct DeployerRegistry {
    deployers: HashMap<DeployerKind, Arc<dyn Deployer>>,
}

impl DeployerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployer under its own kind, replacing any previous one.
    pub fn register(&mut self, deployer: Arc<dyn Deployer>) {
        self.deployers.insert(deployer.kind(), deployer);
    }

    pub fn with(mut self, deployer: Arc<dyn Deployer>) -> Self {
        self.register(deployer);
        self
    }

    /// The deployer for `kind`. An unregistered kind is a configuration
    /// error.
    pub fn get(&self, kind: DeployerKind) -> Result<Arc<dyn Deployer>> {
        self.deployers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::DeployerNotFound(format!("no deployer registered for {kind}")))
    }

    pub fn kinds(&self) -> Vec<DeployerKind> {
        let mut kinds: Vec<_> = self.deployers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Build the registry described by the system config.
    pub fn from_config(config: &SystemConfig, environments: Arc<DeployEnvironments>) -> Self {
        let mut registry = Self::new();
        for deployer in &config.deployers {
            match &deployer.mode {
                ExecutionMode::Local { executable } => {
                    let executor =
                        IacExecutor::new(executable.display().to_string(), &config.workspace_dir)
                            .with_tf_log(config.tf_log.clone());
                    let providers = deployer
                        .providers
                        .iter()
                        .map(|p| {
                            (
                                p.csp.clone(),
                                ProviderRequirement {
                                    name: p.name.clone(),
                                    source: p.source.clone(),
                                    version: p.version.clone(),
                                },
                            )
                        })
                        .collect();
                    registry.register(Arc::new(LocalIacDeployer::new(
                        deployer.kind,
                        executor,
                        environments.clone(),
                        providers,
                    )));
                    info!(deployer = %deployer.kind, executable = %executable.display(), "Registered local deployer");
                }
                ExecutionMode::Remote { base_url } => {
                    registry.register(Arc::new(RemoteDeployer::new(
                        deployer.kind,
                        base_url.clone(),
                        environments.clone(),
                    )));
                    info!(deployer = %deployer.kind, url = %base_url, "Registered remote deployer");
                }
            }
        }
        registry
    }
}
