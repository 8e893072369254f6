//! Deploy tasks and the service descriptor they are built from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::credential::CredentialType;
use crate::deployer::DeployerKind;
use crate::state::Operation;
use crate::{Error, Result, ServiceId, TaskId};

/// One logical deploy/modify/destroy request for one service instance.
///
/// A task is built once per operation invocation and never mutated; a retry
/// or rollback gets a fresh task with a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTask {
    pub id: TaskId,
    pub operation: Operation,
    pub request: DeployRequest,
    pub descriptor: ServiceDescriptor,
    pub namespace: String,
    pub service_template_id: String,
    /// Tool state persisted by the previous operation. Destroy-path and
    /// modify operations run against it.
    #[serde(default)]
    pub previous_tool_state: Option<String>,
}

impl DeployTask {
    pub fn new(
        operation: Operation,
        request: DeployRequest,
        descriptor: ServiceDescriptor,
        namespace: impl Into<String>,
        service_template_id: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            operation,
            request,
            descriptor,
            namespace: namespace.into(),
            service_template_id: service_template_id.into(),
            previous_tool_state: None,
        }
    }

    pub fn with_previous_tool_state(mut self, state: Option<String>) -> Self {
        self.previous_tool_state = state;
        self
    }

    pub fn service_id(&self) -> ServiceId {
        self.request.service_id
    }

    pub fn deployer_kind(&self) -> DeployerKind {
        self.descriptor.deployment.deployer_tool.kind
    }
}

/// What the user asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub service_id: ServiceId,
    pub user_id: String,
    pub csp: String,
    pub region: Region,
    pub flavor: String,
    pub hosting_type: HostingType,
    /// Values supplied for the descriptor's declared variables.
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    /// Availability zone choices, keyed by the zone declaration's variable name.
    #[serde(default)]
    pub availability_zones: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    #[serde(default)]
    pub site: String,
}

/// Who owns the cloud account the service is deployed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostingType {
    /// The user's own account.
    #[serde(rename = "self")]
    SelfHosted,
    /// A shared account owned by the service vendor.
    ServiceVendor,
}

/// Declarative description of a deployable service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub csp: String,
    pub flavors: Vec<ServiceFlavor>,
    pub deployment: Deployment,
}

impl ServiceDescriptor {
    pub fn flavor(&self, name: &str) -> Result<&ServiceFlavor> {
        self.flavors
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| {
                Error::FlavorInvalid(format!("Can not get an available flavor: {name}"))
            })
    }
}

/// A named resource-sizing bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceFlavor {
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub deployer_tool: DeployerTool,
    #[serde(default)]
    pub variables: Vec<DeployVariable>,
    pub credential_type: CredentialType,
    /// The IaC script body.
    pub script: String,
    #[serde(default)]
    pub availability_zones: Vec<AvailabilityZoneConfig>,
}

/// Which tool runs the script, and which versions of it are acceptable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerTool {
    pub kind: DeployerKind,
    /// Required version expression such as `>= 1.6.0`.
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityZoneConfig {
    pub display_name: String,
    pub var_name: String,
    #[serde(default)]
    pub mandatory: bool,
}

/// Where a declared variable ends up and where its value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployVariableKind {
    /// Process environment, value from the request.
    Env,
    /// Process environment, value from the ambient environment.
    EnvEnv,
    /// Process environment, fixed declared value.
    FixEnv,
    /// Tool variable, value from the request.
    Variable,
    /// Tool variable, value from the ambient environment.
    EnvVariable,
    /// Tool variable, fixed declared value.
    FixVariable,
}

impl DeployVariableKind {
    pub fn is_env(self) -> bool {
        matches!(
            self,
            DeployVariableKind::Env | DeployVariableKind::EnvEnv | DeployVariableKind::FixEnv
        )
    }

    pub fn is_fixed(self) -> bool {
        matches!(
            self,
            DeployVariableKind::FixEnv | DeployVariableKind::FixVariable
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableDataType {
    #[default]
    String,
    Number,
    Boolean,
}

impl VariableDataType {
    /// Convert a plain string back into a value of this type.
    pub fn parse_value(self, raw: &str) -> Result<Value> {
        match self {
            VariableDataType::String => Ok(Value::String(raw.to_string())),
            VariableDataType::Boolean => raw
                .trim()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|_| Error::InvalidInput(format!("not a boolean: {raw}"))),
            VariableDataType::Number => {
                let trimmed = raw.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(Value::from(i));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| Error::InvalidInput(format!("not a number: {raw}")))
            }
        }
    }
}

/// Whether a variable's value is stored encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveScope {
    #[default]
    None,
    Once,
    Always,
}

/// A variable declared by the service descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployVariable {
    pub name: String,
    pub kind: DeployVariableKind,
    #[serde(default)]
    pub data_type: VariableDataType,
    #[serde(default)]
    pub mandatory: bool,
    /// Fixed value for `FIX_*` kinds.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub sensitive_scope: SensitiveScope,
    #[serde(default)]
    pub description: Option<String>,
}

impl DeployVariable {
    pub fn new(name: impl Into<String>, kind: DeployVariableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            data_type: VariableDataType::String,
            mandatory: false,
            value: None,
            sensitive_scope: SensitiveScope::None,
            description: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_data_type(mut self, data_type: VariableDataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn sensitive(mut self, scope: SensitiveScope) -> Self {
        self.sensitive_scope = scope;
        self
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive_scope != SensitiveScope::None
    }
}
