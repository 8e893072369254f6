//! Long-poll over persisted deployment status.

use deployit_config::PollSettings;
use deployit_core::state::ServiceDeploymentState;
use deployit_core::status::{DeploymentStatus, DeploymentStatusStore};
use deployit_core::{Error, Result, ServiceId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Shared, hot-reloadable poll settings.
#[derive(Clone)]
pub struct PollSettingsHandle {
    tx: Arc<watch::Sender<PollSettings>>,
}

impl PollSettingsHandle {
    pub fn new(settings: PollSettings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> PollSettings {
        *self.tx.borrow()
    }

    /// Replace the settings; polls started afterwards use them.
    pub fn publish(&self, settings: PollSettings) {
        self.tx.send_replace(settings);
    }
}

/// What a poll observed.
#[derive(Debug, Clone, Serialize)]
pub struct PollOutcome {
    pub status: DeploymentStatus,
    pub changed: bool,
    pub terminal: bool,
}

#[derive(Clone)]
pub struct StatusPoller {
    store: Arc<dyn DeploymentStatusStore>,
    settings: PollSettingsHandle,
}

impl StatusPoller {
    pub fn new(store: Arc<dyn DeploymentStatusStore>, settings: PollSettingsHandle) -> Self {
        Self { store, settings }
    }

    /// Wait until the state of `service_id` differs from `last_known` or is
    /// terminal, at most for the configured max wait.
    ///
    /// Reads once immediately. When the budget runs out the last observed
    /// status is returned with `changed == false`.
    pub async fn poll(
        &self,
        service_id: ServiceId,
        last_known: Option<ServiceDeploymentState>,
    ) -> Result<PollOutcome> {
        let PollSettings { interval, max_wait } = self.settings.current();
        let deadline = Instant::now() + max_wait;

        loop {
            let status = self
                .store
                .get(service_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("deployment {service_id}")))?;
            let changed = last_known != Some(status.state);
            let terminal = status.is_terminal();
            let now = Instant::now();
            if changed || terminal || now >= deadline {
                debug!(service_id = %service_id, state = %status.state, changed, terminal, "Poll finished");
                return Ok(PollOutcome {
                    status,
                    changed,
                    terminal,
                });
            }
            sleep(interval.min(deadline - now)).await;
        }
    }

    /// Run [`poll`](Self::poll) on its own task. Dropping the handle cancels
    /// the poll.
    pub fn spawn(
        &self,
        service_id: ServiceId,
        last_known: Option<ServiceDeploymentState>,
    ) -> PollHandle {
        let (tx, rx) = oneshot::channel();
        let poller = self.clone();
        let task = tokio::spawn(async move {
            let outcome = poller.poll(service_id, last_known).await;
            let _ = tx.send(outcome);
        });
        PollHandle { rx, task }
    }
}

/// Result of a spawned poll, delivered exactly once.
pub struct PollHandle {
    rx: oneshot::Receiver<Result<PollOutcome>>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub async fn wait(mut self) -> Result<PollOutcome> {
        (&mut self.rx)
            .await
            .map_err(|_| Error::Internal("poll task ended without a result".into()))?
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployit_core::TaskId;
    use deployit_core::status::InMemoryStatusStore;
    use std::time::Duration;

    fn settings(interval_ms: u64, max_wait_ms: u64) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(interval_ms),
            max_wait: Duration::from_millis(max_wait_ms),
        }
    }

    async fn store_in(state: ServiceDeploymentState) -> (Arc<InMemoryStatusStore>, ServiceId) {
        let store = Arc::new(InMemoryStatusStore::new());
        let id = ServiceId::new();
        store.begin(id, TaskId::new(), state).await.unwrap();
        (store, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_status_returns_immediately() {
        let (store, id) = store_in(ServiceDeploymentState::Deploying).await;
        let poller = StatusPoller::new(store, PollSettingsHandle::new(settings(1000, 60_000)));

        let started = Instant::now();
        let outcome = poller.poll(id, None).await.unwrap();
        assert!(outcome.changed);
        assert!(!outcome.terminal);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_returns_immediately() {
        let (store, id) = store_in(ServiceDeploymentState::DeploySuccess).await;
        let poller = StatusPoller::new(store, PollSettingsHandle::new(settings(1000, 60_000)));

        let outcome = poller
            .poll(id, Some(ServiceDeploymentState::DeploySuccess))
            .await
            .unwrap();
        assert!(!outcome.changed);
        assert!(outcome.terminal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_status_times_out_within_budget() {
        let (store, id) = store_in(ServiceDeploymentState::Deploying).await;
        let poller = StatusPoller::new(store, PollSettingsHandle::new(settings(1000, 5_500)));

        let started = Instant::now();
        let outcome = poller
            .poll(id, Some(ServiceDeploymentState::Deploying))
            .await
            .unwrap();
        let waited = started.elapsed();
        assert!(!outcome.changed);
        assert!(!outcome.terminal);
        assert_eq!(outcome.status.state, ServiceDeploymentState::Deploying);
        assert!(waited >= Duration::from_millis(5_500));
        assert!(waited <= Duration::from_millis(6_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_during_wait_is_observed() {
        let (store, id) = store_in(ServiceDeploymentState::Deploying).await;
        let poller = StatusPoller::new(store.clone(), PollSettingsHandle::new(settings(1000, 60_000)));

        let handle = poller.spawn(id, Some(ServiceDeploymentState::Deploying));
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        store
            .update_state(id, ServiceDeploymentState::DeployFailed)
            .await
            .unwrap();

        let started = Instant::now();
        let outcome = handle.wait().await.unwrap();
        assert!(outcome.changed);
        assert!(outcome.terminal);
        assert!(started.elapsed() <= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_service_is_not_found() {
        let poller = StatusPoller::new(
            Arc::new(InMemoryStatusStore::new()),
            PollSettingsHandle::new(settings(1000, 5_000)),
        );
        let err = poller.poll(ServiceId::new(), None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reloaded_settings_apply_to_next_poll() {
        let (store, id) = store_in(ServiceDeploymentState::Destroying).await;
        let handle = PollSettingsHandle::new(settings(1000, 60_000));
        let poller = StatusPoller::new(store, handle.clone());

        handle.publish(settings(100, 300));
        let started = Instant::now();
        poller
            .poll(id, Some(ServiceDeploymentState::Destroying))
            .await
            .unwrap();
        assert!(started.elapsed() <= Duration::from_millis(400));
        assert_eq!(handle.current().max_wait, Duration::from_millis(300));
    }
}
