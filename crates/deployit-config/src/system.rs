//! System configuration parsing.
//!
//! The file is KDL:
//!
//! ```kdl
//! workspace "/var/lib/deployit/workspaces"
//! bind "0.0.0.0:8080"
//! workers 4
//! poll interval-ms=5000 max-wait-ms=60000
//! version-refresh full-secs=86400 default-only-secs=3600
//!
//! deployer "opentofu" mode="local" executable="/usr/local/bin/tofu" {
//!     default-versions "1.6.2" "1.7.3" "1.8.1"
//!     feed endpoint="https://api.github.com" repository="opentofu/opentofu"
//!     provider csp="openstack" name="openstack" source="terraform-provider-openstack/openstack" version=">= 1.53.0"
//! }
//! deployer "terraform" mode="remote" url="http://tf-runner:9090"
//!
//! credential csp="openstack" type="variables" owner="vendor" {
//!     variable "OS_AUTH_URL" env="VENDOR_OS_AUTH_URL"
//! }
//! ```
//!
//! Every field has a default, and `DEPLOYIT_*` environment variables
//! override the file.

use deployit_core::credential::CredentialType;
use deployit_core::deployer::DeployerKind;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::env::{EnvSource, ProcessEnv};
use crate::{ConfigError, ConfigResult};

/// Codec key used when none is configured. Only fit for local development.
pub const DEV_SECRET_KEY: &str = "deployit-dev-secret";

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Root under which each task gets its own workspace directory.
    pub workspace_dir: PathBuf,
    pub bind_address: String,
    /// Postgres URL. In-memory stores are used when absent.
    pub database_url: Option<String>,
    /// Passphrase for the sensitive-value codec.
    pub secret_key: String,
    pub workers: usize,
    /// Value for the tool's `TF_LOG`, if debugging is wanted.
    pub tf_log: Option<String>,
    pub poll: PollSettings,
    pub version_refresh: VersionRefreshConfig,
    pub deployers: Vec<DeployerConfig>,
    pub credentials: Vec<CredentialConfig>,
}

/// Long-poll timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
        }
    }
}

/// Cadences of the version cache refresh jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRefreshConfig {
    /// Unconditional refresh of every kind.
    pub full_interval: Duration,
    /// Refresh of kinds still empty or holding only the defaults.
    pub default_only_interval: Duration,
}

impl Default for VersionRefreshConfig {
    fn default() -> Self {
        Self {
            full_interval: Duration::from_secs(24 * 60 * 60),
            default_only_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run the tool as a subprocess on this host.
    Local { executable: PathBuf },
    /// Hand the task to a remote execution service.
    Remote { base_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFeedConfig {
    pub endpoint: String,
    pub repository: String,
}

/// A provider version constraint written into every workspace for a CSP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPin {
    pub csp: String,
    pub name: String,
    pub source: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerConfig {
    pub kind: DeployerKind,
    pub mode: ExecutionMode,
    pub default_versions: Vec<String>,
    pub feed: ReleaseFeedConfig,
    pub providers: Vec<ProviderPin>,
}

impl DeployerConfig {
    pub fn defaults_for(kind: DeployerKind) -> Self {
        let (versions, repository) = match kind {
            DeployerKind::Terraform => (["1.6.6", "1.7.5", "1.8.5"], "hashicorp/terraform"),
            DeployerKind::OpenTofu => (["1.6.2", "1.7.3", "1.8.1"], "opentofu/opentofu"),
        };
        Self {
            kind,
            mode: ExecutionMode::Local {
                executable: PathBuf::from(kind.executable()),
            },
            default_versions: versions.iter().map(|v| v.to_string()).collect(),
            feed: ReleaseFeedConfig {
                endpoint: "https://api.github.com".to_string(),
                repository: repository.to_string(),
            },
            providers: Vec::new(),
        }
    }

    pub fn providers_for<'a>(&'a self, csp: &'a str) -> impl Iterator<Item = &'a ProviderPin> {
        self.providers.iter().filter(move |p| p.csp == csp)
    }
}

/// Whose credential an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialOwner {
    Vendor,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub csp: String,
    pub credential_type: CredentialType,
    pub owner: CredentialOwner,
    pub variables: Vec<CredentialVariableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialVariableConfig {
    pub name: String,
    /// Environment variable holding the value.
    pub env: String,
    pub sensitive: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            workspace_dir: std::env::temp_dir().join("deployit"),
            bind_address: "0.0.0.0:8080".to_string(),
            database_url: None,
            secret_key: DEV_SECRET_KEY.to_string(),
            workers: 4,
            tf_log: None,
            poll: PollSettings::default(),
            version_refresh: VersionRefreshConfig::default(),
            deployers: DeployerKind::ALL
                .iter()
                .map(|k| DeployerConfig::defaults_for(*k))
                .collect(),
            credentials: Vec::new(),
        }
    }
}

impl SystemConfig {
    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                parse_system_config(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(&ProcessEnv)?;
        Ok(config)
    }

    pub fn uses_dev_secret_key(&self) -> bool {
        self.secret_key == DEV_SECRET_KEY
    }

    pub fn deployer(&self, kind: DeployerKind) -> Option<&DeployerConfig> {
        self.deployers.iter().find(|d| d.kind == kind)
    }

    /// Apply `DEPLOYIT_*` overrides.
    pub fn apply_env(&mut self, env: &dyn EnvSource) -> ConfigResult<()> {
        if let Some(dir) = env.var("DEPLOYIT_WORKSPACE_DIR") {
            self.workspace_dir = PathBuf::from(dir);
        }
        if let Some(bind) = env.var("DEPLOYIT_BIND") {
            self.bind_address = bind;
        }
        if let Some(url) = env.var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(key) = env.var("DEPLOYIT_SECRET_KEY") {
            self.secret_key = key;
        }
        if let Some(workers) = env.var("DEPLOYIT_WORKERS") {
            self.workers = parse_number("DEPLOYIT_WORKERS", &workers)? as usize;
        }
        if let Some(level) = env.var("DEPLOYIT_TF_LOG") {
            self.tf_log = Some(level);
        }
        if let Some(ms) = env.var("DEPLOYIT_POLL_INTERVAL_MS") {
            self.poll.interval =
                Duration::from_millis(parse_number("DEPLOYIT_POLL_INTERVAL_MS", &ms)?);
        }
        if let Some(ms) = env.var("DEPLOYIT_POLL_MAX_WAIT_MS") {
            self.poll.max_wait =
                Duration::from_millis(parse_number("DEPLOYIT_POLL_MAX_WAIT_MS", &ms)?);
        }

        for deployer in &mut self.deployers {
            let prefix = match deployer.kind {
                DeployerKind::Terraform => "DEPLOYIT_TERRAFORM",
                DeployerKind::OpenTofu => "DEPLOYIT_OPENTOFU",
            };
            if let Some(list) = env.var(&format!("{prefix}_DEFAULT_VERSIONS")) {
                deployer.default_versions = split_list(&list);
            }
            if let Some(exe) = env.var(&format!("{prefix}_EXECUTABLE")) {
                deployer.mode = ExecutionMode::Local {
                    executable: PathBuf::from(exe),
                };
            }
            if let Some(url) = env.var(&format!("{prefix}_REMOTE_URL")) {
                deployer.mode = ExecutionMode::Remote { base_url: url };
            }
        }

        self.validate()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "poll.interval-ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.version_refresh.full_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "version-refresh.full-secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.version_refresh.default_only_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "version-refresh.default-only-secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();
    let mut seen_deployers = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "workspace" => {
                config.workspace_dir = get_first_string_arg(node)
                    .map(PathBuf::from)
                    .ok_or_else(|| ConfigError::MissingField("workspace path".to_string()))?;
            }
            "bind" => {
                config.bind_address = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("bind address".to_string()))?;
            }
            "database" => config.database_url = get_first_string_arg(node),
            "secret-key" => {
                if let Some(key) = get_first_string_arg(node) {
                    config.secret_key = key;
                }
            }
            "workers" => {
                if let Some(n) = get_first_int_arg(node) {
                    config.workers = to_u64("workers", n)? as usize;
                }
            }
            "tf-log" => config.tf_log = get_first_string_arg(node),
            "poll" => {
                if let Some(ms) = get_int_prop(node, "interval-ms") {
                    config.poll.interval = Duration::from_millis(to_u64("interval-ms", ms)?);
                }
                if let Some(ms) = get_int_prop(node, "max-wait-ms") {
                    config.poll.max_wait = Duration::from_millis(to_u64("max-wait-ms", ms)?);
                }
            }
            "version-refresh" => {
                if let Some(s) = get_int_prop(node, "full-secs") {
                    config.version_refresh.full_interval =
                        Duration::from_secs(to_u64("full-secs", s)?);
                }
                if let Some(s) = get_int_prop(node, "default-only-secs") {
                    config.version_refresh.default_only_interval =
                        Duration::from_secs(to_u64("default-only-secs", s)?);
                }
            }
            "deployer" => {
                let deployer = parse_deployer(node)?;
                if seen_deployers.contains(&deployer.kind) {
                    return Err(ConfigError::Duplicate(format!("deployer {}", deployer.kind)));
                }
                seen_deployers.push(deployer.kind);
                match config.deployers.iter_mut().find(|d| d.kind == deployer.kind) {
                    Some(existing) => *existing = deployer,
                    None => config.deployers.push(deployer),
                }
            }
            "credential" => config.credentials.push(parse_credential(node)?),
            _ => {}
        }
    }

    config.validate()?;
    Ok(config)
}

fn parse_deployer(node: &KdlNode) -> ConfigResult<DeployerConfig> {
    let kind: DeployerKind = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("deployer kind".to_string()))?
        .parse()
        .map_err(|e: deployit_core::Error| ConfigError::InvalidValue {
            field: "deployer".to_string(),
            message: e.to_string(),
        })?;
    let mut deployer = DeployerConfig::defaults_for(kind);

    match get_string_prop(node, "mode").as_deref() {
        None | Some("local") => {
            if let Some(exe) = get_string_prop(node, "executable") {
                deployer.mode = ExecutionMode::Local {
                    executable: PathBuf::from(exe),
                };
            }
        }
        Some("remote") => {
            let base_url = get_string_prop(node, "url")
                .ok_or_else(|| ConfigError::MissingField(format!("url for remote {kind}")))?;
            deployer.mode = ExecutionMode::Remote { base_url };
        }
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "mode".to_string(),
                message: format!("expected local or remote, got {other}"),
            });
        }
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "default-versions" => deployer.default_versions = get_all_string_args(child),
                "feed" => {
                    if let Some(endpoint) = get_string_prop(child, "endpoint") {
                        deployer.feed.endpoint = endpoint;
                    }
                    if let Some(repository) = get_string_prop(child, "repository") {
                        deployer.feed.repository = repository;
                    }
                }
                "provider" => deployer.providers.push(ProviderPin {
                    csp: required_prop(child, "csp")?,
                    name: required_prop(child, "name")?,
                    source: required_prop(child, "source")?,
                    version: required_prop(child, "version")?,
                }),
                _ => {}
            }
        }
    }

    Ok(deployer)
}

fn parse_credential(node: &KdlNode) -> ConfigResult<CredentialConfig> {
    let credential_type = match get_string_prop(node, "type").as_deref() {
        None | Some("variables") => CredentialType::Variables,
        Some("http_authentication") => CredentialType::HttpAuthentication,
        Some("api_key") => CredentialType::ApiKey,
        Some("oauth2") => CredentialType::Oauth2,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "credential type".to_string(),
                message: other.to_string(),
            });
        }
    };
    let owner = match get_string_prop(node, "owner").as_deref() {
        None | Some("vendor") => CredentialOwner::Vendor,
        Some("user") => CredentialOwner::User,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "credential owner".to_string(),
                message: other.to_string(),
            });
        }
    };

    let mut variables = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes().iter().filter(|c| c.name().value() == "variable") {
            let name = get_first_string_arg(child)
                .ok_or_else(|| ConfigError::MissingField("credential variable name".to_string()))?;
            variables.push(CredentialVariableConfig {
                env: get_string_prop(child, "env").unwrap_or_else(|| name.clone()),
                sensitive: get_bool_prop(child, "sensitive").unwrap_or(true),
                name,
            });
        }
    }

    Ok(CredentialConfig {
        csp: required_prop(node, "csp")?,
        credential_type,
        owner,
        variables,
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number(field: &str, raw: &str) -> ConfigResult<u64> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("not a number: {raw}"),
    })
}

fn to_u64(field: &str, value: i128) -> ConfigResult<u64> {
    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("out of range: {value}"),
    })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_int_prop(node: &KdlNode, name: &str) -> Option<i128> {
    node.get(name).and_then(|v| v.as_integer())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn required_prop(node: &KdlNode, name: &str) -> ConfigResult<String> {
    get_string_prop(node, name).ok_or_else(|| {
        ConfigError::MissingField(format!("{} on {}", name, node.name().value()))
    })
}
