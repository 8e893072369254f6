//! CLI command implementations.

pub mod run;

use anyhow::Result;
use deployit_config::SystemConfig;
use deployit_core::deployer::DeployerKind;
use deployit_core::state::Operation;
use deployit_deployer::{InMemoryVersionStore, VersionCacheManager};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Parse a lowercase serde name such as `destroy` or `opentofu`.
fn parse_named<T: DeserializeOwned>(s: &str) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
        .map_err(|_| format!("unknown value: {s}"))
}

pub fn parse_operation(s: &str) -> std::result::Result<Operation, String> {
    parse_named(s)
}

pub fn parse_kind(s: &str) -> std::result::Result<DeployerKind, String> {
    parse_named(s)
}

pub async fn versions(config: Option<&Path>, kind: Option<DeployerKind>, refresh: bool) -> Result<()> {
    let config = SystemConfig::load(config)?;
    let manager = VersionCacheManager::from_config(&config, Arc::new(InMemoryVersionStore::new()))?;
    let kinds = match kind {
        Some(kind) => vec![kind],
        None => manager.kinds(),
    };

    for kind in kinds {
        let versions = if refresh {
            manager.get_versions(kind).await
        } else {
            manager.defaults(kind)
        };
        let list: Vec<String> = versions.iter().map(ToString::to_string).collect();
        println!("{kind}: {}", list.join(", "));
    }
    Ok(())
}

pub fn validate_config(path: &Path) -> Result<()> {
    match SystemConfig::load(Some(path)) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  bind: {}", config.bind_address);
            println!("  workers: {}", config.workers);
            for deployer in &config.deployers {
                println!("  deployer {}: {:?}", deployer.kind, deployer.mode);
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
