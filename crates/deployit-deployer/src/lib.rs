//! Deployment backends for DeployIt.
//!
//! Provides:
//! - Local Terraform/OpenTofu deployers driving the tool as a subprocess
//! - A remote deployer delegating to an execution service over HTTP
//! - The registry that dispatches a task to the deployer for its kind
//! - The deployer tool version cache

pub mod local;
pub mod registry;
pub mod remote;
pub mod versions;

pub use deployit_core::deployer::{DeployResult, Deployer, DeployerKind};
pub use local::LocalIacDeployer;
pub use registry::DeployerRegistry;
pub use remote::RemoteDeployer;
pub use versions::{
    GitHubReleaseFetcher, InMemoryVersionStore, RequiredVersion, VersionCacheManager,
    VersionFetcher,
};
