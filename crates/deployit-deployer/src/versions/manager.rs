use deployit_config::SystemConfig;
use deployit_core::deployer::DeployerKind;
use deployit_core::versions::{ToolVersion, VersionSet, VersionStore, parse_version_set};
use deployit_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::fetcher::{GitHubReleaseFetcher, VersionFetcher};
use super::required::RequiredVersion;

/// Serves the versions offered per deployer kind.
///
/// Entries have no TTL. They change only through [`refresh`](Self::refresh)
/// and the two refresh sweeps driven by the scheduler.
pub struct VersionCacheManager {
    store: Arc<dyn VersionStore>,
    fetchers: HashMap<DeployerKind, Arc<dyn VersionFetcher>>,
    defaults: HashMap<DeployerKind, VersionSet>,
}

impl VersionCacheManager {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self {
            store,
            fetchers: HashMap::new(),
            defaults: HashMap::new(),
        }
    }

    pub fn with_kind(
        mut self,
        kind: DeployerKind,
        fetcher: Arc<dyn VersionFetcher>,
        defaults: VersionSet,
    ) -> Self {
        self.fetchers.insert(kind, fetcher);
        self.defaults.insert(kind, defaults);
        self
    }

    /// One GitHub fetcher per configured deployer, seeded with its default
    /// versions.
    pub fn from_config(config: &SystemConfig, store: Arc<dyn VersionStore>) -> Result<Self> {
        let mut manager = Self::new(store);
        for deployer in &config.deployers {
            let defaults =
                parse_version_set(deployer.default_versions.iter().map(String::as_str))?;
            manager = manager.with_kind(
                deployer.kind,
                Arc::new(GitHubReleaseFetcher::new(&deployer.feed)),
                defaults,
            );
        }
        Ok(manager)
    }

    pub fn kinds(&self) -> Vec<DeployerKind> {
        let mut kinds: Vec<_> = self.fetchers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn defaults(&self, kind: DeployerKind) -> VersionSet {
        self.defaults.get(&kind).cloned().unwrap_or_default()
    }

    async fn cached(&self, kind: DeployerKind) -> Option<VersionSet> {
        match self.store.get(kind).await {
            Ok(set) => set.filter(|s| !s.is_empty()),
            Err(e) => {
                warn!(deployer = %kind, error = %e, "Failed to read version cache");
                None
            }
        }
    }

    /// Versions to offer for `kind`.
    ///
    /// A cached set that differs from the defaults wins. Otherwise the feed is
    /// fetched and cached; if that fails the defaults are returned.
    pub async fn get_versions(&self, kind: DeployerKind) -> VersionSet {
        let defaults = self.defaults(kind);
        if let Some(cached) = self.cached(kind).await {
            if cached != defaults {
                return cached;
            }
        }
        match self.refresh(kind).await {
            Ok(versions) => versions,
            Err(e) => {
                warn!(deployer = %kind, error = %e, "Version fetch failed, using defaults");
                defaults
            }
        }
    }

    /// Fetch the feed for `kind` and replace the cached set.
    pub async fn refresh(&self, kind: DeployerKind) -> Result<VersionSet> {
        let fetcher = self.fetchers.get(&kind).ok_or_else(|| {
            Error::DeployerNotFound(format!("no version feed configured for {kind}"))
        })?;
        let versions = fetcher.fetch().await?;
        if let Err(e) = self.store.replace(kind, versions.clone()).await {
            warn!(deployer = %kind, error = %e, "Failed to store fetched versions");
        }
        info!(deployer = %kind, count = versions.len(), "Refreshed tool versions");
        Ok(versions)
    }

    /// Unconditionally re-fetch every kind.
    pub async fn refresh_all(&self) {
        for kind in self.kinds() {
            if let Err(e) = self.refresh(kind).await {
                warn!(deployer = %kind, error = %e, "Scheduled version refresh failed");
            }
        }
    }

    /// Re-fetch only kinds whose cache is empty or still the default set.
    pub async fn refresh_default_only(&self) {
        for kind in self.kinds() {
            let stale = match self.cached(kind).await {
                Some(cached) => cached == self.defaults(kind),
                None => true,
            };
            if !stale {
                continue;
            }
            if let Err(e) = self.refresh(kind).await {
                warn!(deployer = %kind, error = %e, "Version refresh of default cache failed");
            }
        }
    }

    /// Populate every kind once so the first request doesn't pay for a fetch.
    pub async fn warm_up(&self) {
        for kind in self.kinds() {
            let versions = self.get_versions(kind).await;
            info!(deployer = %kind, count = versions.len(), "Warmed version cache");
        }
    }

    /// Best available version for a descriptor's required version.
    pub async fn find_best_version(
        &self,
        kind: DeployerKind,
        required: &str,
    ) -> Result<ToolVersion> {
        let required = RequiredVersion::parse(required)?;
        let available = self.get_versions(kind).await;
        required.best_match(&available).ok_or_else(|| {
            Error::InvalidInput(format!(
                "no available {kind} version matches required version {required}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::InMemoryVersionStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns queued responses in order, repeating the last one.
    struct ScriptedFetcher {
        responses: Mutex<Vec<Result<VersionSet>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<VersionSet>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VersionFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<VersionSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                match &responses[0] {
                    Ok(v) => Ok(v.clone()),
                    Err(e) => Err(Error::ExternalService(e.to_string())),
                }
            }
        }
    }

    fn set(versions: &[&str]) -> VersionSet {
        parse_version_set(versions.iter().copied()).unwrap()
    }

    fn feed_down() -> Result<VersionSet> {
        Err(Error::ExternalService("feed down".into()))
    }

    fn manager(fetcher: Arc<ScriptedFetcher>) -> (VersionCacheManager, Arc<InMemoryVersionStore>) {
        let store = Arc::new(InMemoryVersionStore::new());
        let manager = VersionCacheManager::new(store.clone()).with_kind(
            DeployerKind::OpenTofu,
            fetcher,
            set(&["1.6.2", "1.7.3"]),
        );
        (manager, store)
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_defaults() {
        let fetcher = ScriptedFetcher::new(vec![feed_down()]);
        let (manager, store) = manager(fetcher.clone());
        let versions = manager.get_versions(DeployerKind::OpenTofu).await;
        assert_eq!(versions, set(&["1.6.2", "1.7.3"]));
        assert!(store.get(DeployerKind::OpenTofu).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_cache_is_served_without_fetch() {
        let fetcher = ScriptedFetcher::new(vec![Ok(set(&["1.6.2", "1.7.3", "1.8.1"]))]);
        let (manager, _store) = manager(fetcher.clone());

        let first = manager.get_versions(DeployerKind::OpenTofu).await;
        let second = manager.get_versions(DeployerKind::OpenTofu).await;
        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_equal_to_defaults_is_refetched() {
        let fetcher = ScriptedFetcher::new(vec![Ok(set(&["1.9.0"]))]);
        let (manager, store) = manager(fetcher.clone());
        store
            .replace(DeployerKind::OpenTofu, set(&["1.6.2", "1.7.3"]))
            .await
            .unwrap();

        assert_eq!(manager.get_versions(DeployerKind::OpenTofu).await, set(&["1.9.0"]));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_default_only_skips_live_entries() {
        let fetcher = ScriptedFetcher::new(vec![Ok(set(&["1.9.0"]))]);
        let (manager, store) = manager(fetcher.clone());
        store
            .replace(DeployerKind::OpenTofu, set(&["1.8.0"]))
            .await
            .unwrap();

        manager.refresh_default_only().await;
        assert_eq!(fetcher.calls(), 0);

        manager.refresh_all().await;
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            store.get(DeployerKind::OpenTofu).await.unwrap(),
            Some(set(&["1.9.0"]))
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_existing_entry() {
        let fetcher = ScriptedFetcher::new(vec![feed_down()]);
        let (manager, store) = manager(fetcher);
        store
            .replace(DeployerKind::OpenTofu, set(&["1.8.0"]))
            .await
            .unwrap();

        manager.refresh_all().await;
        assert_eq!(
            store.get(DeployerKind::OpenTofu).await.unwrap(),
            Some(set(&["1.8.0"]))
        );
    }

    #[tokio::test]
    async fn test_find_best_version() {
        let fetcher = ScriptedFetcher::new(vec![feed_down()]);
        let (manager, _store) = manager(fetcher);
        assert_eq!(
            manager
                .find_best_version(DeployerKind::OpenTofu, ">= 1.7.0")
                .await
                .unwrap(),
            ToolVersion::new(1, 7, 3)
        );
        let err = manager
            .find_best_version(DeployerKind::OpenTofu, "= 2.0.0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), deployit_core::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_unknown_kind_has_no_versions() {
        let fetcher = ScriptedFetcher::new(vec![feed_down()]);
        let (manager, _store) = manager(fetcher);
        assert!(manager.get_versions(DeployerKind::Terraform).await.is_empty());
        assert!(manager.refresh(DeployerKind::Terraform).await.is_err());
    }
}
