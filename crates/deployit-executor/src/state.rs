//! Parsing of Terraform/OpenTofu state files.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{ExecutorError, ExecutorResult};

/// Outputs and resource instances recovered from a state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolState {
    pub outputs: HashMap<String, Value>,
    pub resources: Vec<ResourceInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    pub mode: String,
    pub resource_type: String,
    pub name: String,
    pub provider: String,
    pub attributes: Value,
}

#[derive(Debug, Deserialize)]
struct RawState {
    #[serde(default)]
    outputs: HashMap<String, RawOutput>,
    #[serde(default)]
    resources: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(default)]
    mode: String,
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    provider: String,
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    #[serde(default)]
    attributes: Value,
}

impl ToolState {
    pub fn parse(raw: &str) -> ExecutorResult<Self> {
        let state: RawState =
            serde_json::from_str(raw).map_err(|e| ExecutorError::ParseFailed(e.to_string()))?;

        let outputs = state
            .outputs
            .into_iter()
            .map(|(k, v)| (k, v.value))
            .collect();

        let resources = state
            .resources
            .into_iter()
            .flat_map(|r| {
                let RawResource {
                    mode,
                    resource_type,
                    name,
                    provider,
                    instances,
                } = r;
                instances.into_iter().map(move |i| ResourceInstance {
                    mode: mode.clone(),
                    resource_type: resource_type.clone(),
                    name: name.clone(),
                    provider: provider.clone(),
                    attributes: i.attributes,
                })
            })
            .collect();

        Ok(Self { outputs, resources })
    }

    /// Whether the state tracks no managed resources.
    pub fn is_empty(&self) -> bool {
        !self.resources.iter().any(|r| r.mode == "managed")
    }
}
