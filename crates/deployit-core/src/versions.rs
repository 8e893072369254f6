//! Deployer tool versions and the store that caches them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::deployer::DeployerKind;
use crate::{Error, Result};

/// A `major.minor.patch` release of an IaC tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Versions offered for one deployer kind, in ascending order.
pub type VersionSet = BTreeSet<ToolVersion>;

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for ToolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parts: Vec<&str> = digits.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(Error::InvalidInput(format!("invalid version: {s}")));
        };
        let num = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| Error::InvalidInput(format!("invalid version: {s}")))
        };
        Ok(Self::new(num(*major)?, num(*minor)?, num(*patch)?))
    }
}

impl TryFrom<String> for ToolVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ToolVersion> for String {
    fn from(v: ToolVersion) -> Self {
        v.to_string()
    }
}

/// Parse a list of version strings, failing on the first bad one.
pub fn parse_version_set<'a>(versions: impl IntoIterator<Item = &'a str>) -> Result<VersionSet> {
    versions.into_iter().map(str::parse).collect()
}

/// Key-value store of version sets per deployer kind.
///
/// `replace` swaps the whole set for a kind; readers never see a partially
/// written set.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn get(&self, kind: DeployerKind) -> Result<Option<VersionSet>>;

    async fn replace(&self, kind: DeployerKind, versions: VersionSet) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_order() {
        let set = parse_version_set(["1.10.0", "v1.9.2", "1.6.0"]).unwrap();
        let ordered: Vec<String> = set.iter().map(|v| v.to_string()).collect();
        assert_eq!(ordered, vec!["1.6.0", "1.9.2", "1.10.0"]);
    }

    #[test]
    fn test_invalid_versions() {
        assert!("1.6".parse::<ToolVersion>().is_err());
        assert!("1.6.0-rc1".parse::<ToolVersion>().is_err());
        assert!("a.b.c".parse::<ToolVersion>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let v = ToolVersion::new(1, 7, 3);
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.7.3\"");
        let back: ToolVersion = serde_json::from_str("\"1.7.3\"").unwrap();
        assert_eq!(back, v);
    }
}
