//! Core domain types and traits for DeployIt.
//!
//! This crate contains:
//! - Resource identifiers
//! - Deploy tasks, service descriptors and variable declarations
//! - The deployment lifecycle (states, operations, transitions)
//! - Deployer, credential and status store abstractions
//! - Secret encoding for sensitive variables
//! - Deployer tool versions

pub mod credential;
pub mod deployer;
pub mod error;
pub mod id;
pub mod secret;
pub mod state;
pub mod status;
pub mod task;
pub mod versions;

pub use error::{Error, ErrorKind, Result};
pub use id::{ServiceId, TaskId};
