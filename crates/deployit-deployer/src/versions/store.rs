use async_trait::async_trait;
use deployit_core::Result;
use deployit_core::deployer::DeployerKind;
use deployit_core::versions::{VersionSet, VersionStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local version store.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    sets: RwLock<HashMap<DeployerKind, VersionSet>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn get(&self, kind: DeployerKind) -> Result<Option<VersionSet>> {
        Ok(self.sets.read().await.get(&kind).cloned())
    }

    async fn replace(&self, kind: DeployerKind, versions: VersionSet) -> Result<()> {
        self.sets.write().await.insert(kind, versions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployit_core::versions::parse_version_set;

    #[tokio::test]
    async fn test_replace_swaps_whole_set() {
        let store = InMemoryVersionStore::new();
        assert!(store.get(DeployerKind::Terraform).await.unwrap().is_none());

        store
            .replace(DeployerKind::Terraform, parse_version_set(["1.6.0", "1.7.0"]).unwrap())
            .await
            .unwrap();
        store
            .replace(DeployerKind::Terraform, parse_version_set(["1.8.0"]).unwrap())
            .await
            .unwrap();

        let set = store.get(DeployerKind::Terraform).await.unwrap().unwrap();
        assert_eq!(set, parse_version_set(["1.8.0"]).unwrap());
        assert!(store.get(DeployerKind::OpenTofu).await.unwrap().is_none());
    }
}
