//! Background refresh of the deployer tool version cache.

use deployit_config::VersionRefreshConfig;
use deployit_deployer::VersionCacheManager;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

/// Runs the daily full refresh and the frequent default-only refresh.
///
/// The first tick of each job comes one period after [`start`](Self::start);
/// the cache is warmed separately at startup.
pub struct VersionRefreshScheduler {
    manager: Arc<VersionCacheManager>,
    config: VersionRefreshConfig,
    shutdown: Option<watch::Sender<bool>>,
    jobs: Vec<JoinHandle<()>>,
}

impl VersionRefreshScheduler {
    pub fn new(manager: Arc<VersionCacheManager>, config: VersionRefreshConfig) -> Self {
        Self {
            manager,
            config,
            shutdown: None,
            jobs: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let (tx, rx) = watch::channel(false);

        let manager = self.manager.clone();
        self.jobs.push(spawn_job(
            "full-refresh",
            self.config.full_interval,
            rx.clone(),
            move || {
                let manager = manager.clone();
                async move { manager.refresh_all().await }
            },
        ));

        let manager = self.manager.clone();
        self.jobs.push(spawn_job(
            "default-only-refresh",
            self.config.default_only_interval,
            rx,
            move || {
                let manager = manager.clone();
                async move { manager.refresh_default_only().await }
            },
        ));

        self.shutdown = Some(tx);
        info!(
            full_interval = ?self.config.full_interval,
            default_only_interval = ?self.config.default_only_interval,
            "Version refresh scheduler started"
        );
    }

    /// Signal both jobs and wait for them to finish. A refresh already in
    /// progress completes first.
    pub async fn stop(&mut self) {
        let Some(tx) = self.shutdown.take() else {
            return;
        };
        let _ = tx.send(true);
        for job in self.jobs.drain(..) {
            let _ = job.await;
        }
        info!("Version refresh scheduler stopped");
    }
}

fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    run: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!(job = name, "Running scheduled job");
                    run().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deployit_core::deployer::DeployerKind;
    use deployit_core::versions::{VersionSet, parse_version_set};
    use deployit_core::{Error, Result};
    use deployit_deployer::{InMemoryVersionStore, VersionFetcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl VersionFetcher for CountingFetcher {
        async fn fetch(&self) -> Result<VersionSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::ExternalService("feed down".into()));
            }
            Ok(parse_version_set(["1.9.0"]).unwrap())
        }
    }

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn scheduler(fail: bool) -> (VersionRefreshScheduler, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            fail,
        });
        let manager = VersionCacheManager::new(Arc::new(InMemoryVersionStore::new())).with_kind(
            DeployerKind::OpenTofu,
            fetcher.clone(),
            parse_version_set(["1.6.2"]).unwrap(),
        );
        let config = VersionRefreshConfig {
            full_interval: HOUR * 24,
            default_only_interval: HOUR,
        };
        (
            VersionRefreshScheduler::new(Arc::new(manager), config),
            fetcher,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_follow_their_cadence() {
        let (mut scheduler, fetcher) = scheduler(false);
        scheduler.start();

        sleep(HOUR / 2).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        // Default-only job fills the empty cache, then skips the live entry.
        sleep(HOUR * 3).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // The full refresh fetches regardless.
        sleep(HOUR * 21).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_only_job_retries_while_feed_is_down() {
        let (mut scheduler, fetcher) = scheduler(true);
        scheduler.start();

        sleep(HOUR * 3 + HOUR / 2).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_jobs() {
        let (mut scheduler, fetcher) = scheduler(true);
        scheduler.start();
        scheduler.start();
        scheduler.stop().await;

        sleep(HOUR * 48).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
