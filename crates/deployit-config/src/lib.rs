//! Configuration for DeployIt.
//!
//! This crate handles:
//! - System configuration (KDL file with environment overrides)
//! - Resolution of a deploy task's declared variables into the environment
//!   and tool variables handed to an IaC executor
//! - Credentials sourced from the process environment

pub mod credential;
pub mod env;
pub mod error;
pub mod system;
pub mod variables;

pub use credential::EnvCredentialCenter;
pub use env::{EnvSource, ProcessEnv};
pub use error::{ConfigError, ConfigResult};
pub use system::{
    CredentialConfig, CredentialOwner, CredentialVariableConfig, DeployerConfig, ExecutionMode,
    PollSettings, ProviderPin, ReleaseFeedConfig, SystemConfig, VersionRefreshConfig,
    parse_system_config,
};
pub use variables::{DeployEnvironments, ResolvedVariables};
