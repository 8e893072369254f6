//! Resolution of a deploy task's declared variables.
//!
//! Each declaration lands in one of two buckets and takes its value from one
//! of three sources:
//!
//! | Kind           | Bucket              | Source                         |
//! |----------------|---------------------|--------------------------------|
//! | `env`          | process environment | request property, null if absent |
//! | `env_env`      | process environment | ambient environment            |
//! | `fix_env`      | process environment | declared fixed value           |
//! | `variable`     | tool variables      | request property, null if absent |
//! | `env_variable` | tool variables      | ambient environment            |
//! | `fix_variable` | tool variables      | declared fixed value           |
//!
//! Sensitive values are stored encoded and decoded here; tool variables are
//! converted back to their declared type.

use deployit_core::credential::CredentialCenter;
use deployit_core::secret::SecretCodec;
use deployit_core::task::{
    DeployTask, DeployVariable, DeployVariableKind, HostingType, ServiceDescriptor,
};
use deployit_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::env::EnvSource;

/// Everything an executor needs besides the script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedVariables {
    /// Process environment. `None` marks a declared entry without a value.
    pub env: HashMap<String, Option<String>>,
    /// Tool input variables, including region, flavor and zone values.
    pub variables: HashMap<String, Value>,
    pub flavor: HashMap<String, String>,
    pub credentials: HashMap<String, String>,
}

impl ResolvedVariables {
    /// Process environment for the tool: declared entries with a value plus
    /// credentials.
    pub fn process_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .env
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect();
        env.extend(self.credentials.clone());
        env
    }
}

/// Builds environments and variables for deploy tasks.
pub struct DeployEnvironments {
    credential_center: Arc<dyn CredentialCenter>,
    codec: Arc<dyn SecretCodec>,
    ambient: Arc<dyn EnvSource>,
}

impl DeployEnvironments {
    pub fn new(
        credential_center: Arc<dyn CredentialCenter>,
        codec: Arc<dyn SecretCodec>,
        ambient: Arc<dyn EnvSource>,
    ) -> Self {
        Self {
            credential_center,
            codec,
            ambient,
        }
    }

    /// Resolve all four outputs for a task.
    pub async fn resolve(&self, task: &DeployTask) -> Result<ResolvedVariables> {
        let flavor = self.flavor_properties(task)?;
        let mut variables = self.variables(task, true)?;
        for (name, value) in &flavor {
            variables.insert(name.clone(), Value::String(value.clone()));
        }

        let resolved = ResolvedVariables {
            env: self.environment(task)?,
            variables,
            flavor,
            credentials: self.credentials(task).await?,
        };
        debug!(
            task_id = %task.id,
            env = resolved.env.len(),
            variables = resolved.variables.len(),
            credentials = resolved.credentials.len(),
            "Resolved deploy variables"
        );
        Ok(resolved)
    }

    /// Process environment entries declared by the descriptor.
    pub fn environment(&self, task: &DeployTask) -> Result<HashMap<String, Option<String>>> {
        let mut env = HashMap::new();
        for var in declared(task, |k| k.is_env()) {
            let value = match var.kind {
                DeployVariableKind::Env => match request_property(task, &var.name) {
                    Some(value) if var.is_sensitive() => Some(self.codec.decode(&value)?),
                    other => other,
                },
                DeployVariableKind::EnvEnv => self.ambient.var(&var.name),
                DeployVariableKind::FixEnv => match &var.value {
                    Some(value) if var.is_sensitive() => Some(self.codec.decode(value)?),
                    other => other.clone(),
                },
                _ => continue,
            };
            env.insert(var.name.clone(), value);
        }
        Ok(env)
    }

    /// Tool variables: declarations plus region and availability zones.
    ///
    /// With `decode_sensitive` unset, sensitive request values are passed
    /// through as stored.
    pub fn variables(
        &self,
        task: &DeployTask,
        decode_sensitive: bool,
    ) -> Result<HashMap<String, Value>> {
        let mut variables = HashMap::new();
        for var in declared(task, |k| !k.is_env()) {
            let value = match var.kind {
                DeployVariableKind::Variable => {
                    match task.request.properties.get(&var.name) {
                        None | Some(Value::Null) => Value::Null,
                        Some(value) if var.is_sensitive() && decode_sensitive => {
                            self.codec.decode_to_type(var.data_type, &value_to_string(value))?
                        }
                        Some(value) => value.clone(),
                    }
                }
                DeployVariableKind::EnvVariable => {
                    self.ambient.var(&var.name).map_or(Value::Null, Value::String)
                }
                DeployVariableKind::FixVariable => match &var.value {
                    Some(raw) => var.data_type.parse_value(raw)?,
                    None => Value::Null,
                },
                _ => continue,
            };
            variables.insert(var.name.clone(), value);
        }

        variables.insert(
            "region".to_string(),
            Value::String(task.request.region.name.clone()),
        );
        for (name, zone) in self.availability_zones(task)? {
            variables.insert(name, Value::String(zone));
        }
        Ok(variables)
    }

    /// Properties of the requested flavor. The name must match exactly.
    pub fn flavor_properties(&self, task: &DeployTask) -> Result<HashMap<String, String>> {
        task.descriptor
            .flavor(&task.request.flavor)
            .map(|f| f.properties.clone())
    }

    /// Credential variables from the credential center.
    pub async fn credentials(&self, task: &DeployTask) -> Result<HashMap<String, String>> {
        let request = &task.request;
        let user_id = match request.hosting_type {
            HostingType::SelfHosted => Some(request.user_id.as_str()),
            HostingType::ServiceVendor => None,
        };

        let credential = self
            .credential_center
            .get_credential(
                &request.csp,
                &request.region.site,
                task.descriptor.deployment.credential_type,
                user_id,
            )
            .await?;

        Ok(credential
            .variables
            .into_iter()
            .filter_map(|v| v.value.map(|value| (v.name, value)))
            .collect())
    }

    /// Variables as the user supplied them, for display. Sensitive values
    /// stay encoded.
    pub fn all_deployment_variables(&self, task: &DeployTask) -> Result<HashMap<String, Value>> {
        let mut all = self.variables(task, false)?;
        for (name, value) in self.environment_undecoded(task) {
            all.entry(name).or_insert(value);
        }
        Ok(all)
    }

    fn environment_undecoded(&self, task: &DeployTask) -> HashMap<String, Value> {
        declared(task, |k| k.is_env())
            .map(|var| {
                let value = match var.kind {
                    DeployVariableKind::Env => task
                        .request
                        .properties
                        .get(&var.name)
                        .cloned()
                        .unwrap_or(Value::Null),
                    DeployVariableKind::EnvEnv => {
                        self.ambient.var(&var.name).map_or(Value::Null, Value::String)
                    }
                    _ => var.value.clone().map_or(Value::Null, Value::String),
                };
                (var.name.clone(), value)
            })
            .collect()
    }

    fn availability_zones(&self, task: &DeployTask) -> Result<HashMap<String, String>> {
        let mut zones = HashMap::new();
        for zone in &task.descriptor.deployment.availability_zones {
            match task.request.availability_zones.get(&zone.var_name) {
                Some(value) => {
                    zones.insert(zone.var_name.clone(), value.clone());
                }
                None if zone.mandatory => {
                    return Err(Error::InvalidInput(format!(
                        "availability zone {} is required",
                        zone.display_name
                    )));
                }
                None => {}
            }
        }
        Ok(zones)
    }
}

/// Fixed declarations of a descriptor, by name.
pub fn fixed_variables(descriptor: &ServiceDescriptor) -> HashMap<String, String> {
    descriptor
        .deployment
        .variables
        .iter()
        .filter(|v| v.kind.is_fixed())
        .filter_map(|v| v.value.clone().map(|value| (v.name.clone(), value)))
        .collect()
}

fn declared<'a>(
    task: &'a DeployTask,
    filter: impl Fn(DeployVariableKind) -> bool + 'a,
) -> impl Iterator<Item = &'a DeployVariable> + 'a {
    task.descriptor
        .deployment
        .variables
        .iter()
        .filter(move |v| filter(v.kind))
}

fn request_property(task: &DeployTask, name: &str) -> Option<String> {
    match task.request.properties.get(name) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value_to_string(value)),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
