//! API server for DeployIt.
//!
//! Provides the HTTP REST API for submitting deploy operations, long-polling
//! their status and inspecting deployer tool versions.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
