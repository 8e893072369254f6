use deployit_core::versions::{ToolVersion, VersionSet};
use deployit_core::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static REQUIRED_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(=|>=|<=)?\s*v?(\d+\.\d+\.\d+)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOperator {
    Exact,
    AtLeast,
    AtMost,
}

/// A tool version constraint as written in a service descriptor,
/// e.g. `">= 1.6.0"`. A bare version means an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredVersion {
    pub operator: VersionOperator,
    pub version: ToolVersion,
}

impl RequiredVersion {
    pub fn parse(required: &str) -> Result<Self> {
        let trimmed = required.trim();
        let caps = REQUIRED_VERSION.captures(trimmed).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Invalid deployer tool required version format: {required}"
            ))
        })?;
        let operator = match caps.get(1).map(|m| m.as_str()) {
            Some(">=") => VersionOperator::AtLeast,
            Some("<=") => VersionOperator::AtMost,
            _ => VersionOperator::Exact,
        };
        Ok(Self {
            operator,
            version: caps[2].parse()?,
        })
    }

    pub fn is_satisfied_by(&self, candidate: &ToolVersion) -> bool {
        match self.operator {
            VersionOperator::Exact => *candidate == self.version,
            VersionOperator::AtLeast => *candidate >= self.version,
            VersionOperator::AtMost => *candidate <= self.version,
        }
    }

    /// `=` picks the exact version, `>=` the lowest satisfying one and `<=`
    /// the highest satisfying one.
    pub fn best_match(&self, available: &VersionSet) -> Option<ToolVersion> {
        let mut satisfying = available.iter().filter(|v| self.is_satisfied_by(v));
        match self.operator {
            VersionOperator::AtMost => satisfying.next_back().copied(),
            _ => satisfying.next().copied(),
        }
    }
}

impl std::fmt::Display for RequiredVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.operator {
            VersionOperator::Exact => "=",
            VersionOperator::AtLeast => ">=",
            VersionOperator::AtMost => "<=",
        };
        write!(f, "{op}{}", self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployit_core::versions::parse_version_set;

    fn available() -> VersionSet {
        parse_version_set(["1.5.7", "1.6.2", "1.7.3", "1.8.1"]).unwrap()
    }

    #[test]
    fn test_parse_forms() {
        let r = RequiredVersion::parse(">= v1.6.0").unwrap();
        assert_eq!(r.operator, VersionOperator::AtLeast);
        assert_eq!(r.version, ToolVersion::new(1, 6, 0));
        assert_eq!(RequiredVersion::parse("1.7.3").unwrap().operator, VersionOperator::Exact);
        assert_eq!(RequiredVersion::parse(" <=1.7.0 ").unwrap().to_string(), "<=1.7.0");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["~> 1.6", "> 1.6.0", "latest", ""] {
            assert!(
                matches!(RequiredVersion::parse(bad), Err(Error::InvalidInput(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_best_match() {
        let set = available();
        let best = |s: &str| RequiredVersion::parse(s).unwrap().best_match(&set);
        assert_eq!(best("= 1.7.3"), Some(ToolVersion::new(1, 7, 3)));
        assert_eq!(best("= 1.7.0"), None);
        assert_eq!(best(">= 1.6.0"), Some(ToolVersion::new(1, 6, 2)));
        assert_eq!(best("<= 1.7.9"), Some(ToolVersion::new(1, 7, 3)));
        assert_eq!(best(">= 2.0.0"), None);
        assert_eq!(best("<= 1.0.0"), None);
    }
}
