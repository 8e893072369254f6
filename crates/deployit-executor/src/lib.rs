//! IaC tool executor for DeployIt.
//!
//! Runs Terraform-class CLI tools (Terraform, OpenTofu) as subprocesses,
//! each task inside its own workspace directory.

pub mod command;
pub mod error;
pub mod executor;
pub mod state;
pub mod workspace;

pub use command::{CommandLine, ToolCommands};
pub use error::{ExecutorError, ExecutorResult};
pub use executor::{ExecutionInputs, ExecutionOutcome, IacAction, IacExecutor};
pub use state::{ResourceInstance, ToolState};
pub use workspace::{ProviderRequirement, Workspace, render_version_constraints};
