//! Deploy task scheduling for DeployIt.
//!
//! Runs the deploy task state machine on a bounded worker pool, exposes
//! status changes through a bounded long-poll, and drives the background
//! refresh of the deployer tool version cache.

pub mod jobs;
pub mod orchestrator;
pub mod poller;
pub mod worker;

pub use jobs::VersionRefreshScheduler;
pub use orchestrator::{DeployOrchestrator, StartedTask};
pub use poller::{PollHandle, PollOutcome, PollSettingsHandle, StatusPoller};
pub use worker::WorkerPool;
