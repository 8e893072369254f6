//! Credential center backed by configured environment variables.

use async_trait::async_trait;
use deployit_core::credential::{
    CredentialCenter, CredentialType, CredentialVariable, CredentialVariables,
};
use deployit_core::{Error, Result};
use std::sync::Arc;

use crate::env::EnvSource;
use crate::system::{CredentialConfig, CredentialOwner};

/// Resolves credentials declared in the system config from the environment.
///
/// Vendor-hosted services (no user id) only see `owner="vendor"` entries;
/// self-hosted services only see `owner="user"` entries.
pub struct EnvCredentialCenter {
    configs: Vec<CredentialConfig>,
    env: Arc<dyn EnvSource>,
}

impl EnvCredentialCenter {
    pub fn new(configs: Vec<CredentialConfig>, env: Arc<dyn EnvSource>) -> Self {
        Self { configs, env }
    }
}

#[async_trait]
impl CredentialCenter for EnvCredentialCenter {
    async fn get_credential(
        &self,
        csp: &str,
        _site: &str,
        credential_type: CredentialType,
        user_id: Option<&str>,
    ) -> Result<CredentialVariables> {
        let owner = if user_id.is_some() {
            CredentialOwner::User
        } else {
            CredentialOwner::Vendor
        };

        let config = self
            .configs
            .iter()
            .find(|c| c.csp == csp && c.credential_type == credential_type && c.owner == owner)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no {credential_type} credential configured for {csp}"
                ))
            })?;

        let variables = config
            .variables
            .iter()
            .map(|v| CredentialVariable {
                name: v.name.clone(),
                value: self.env.var(&v.env),
                is_sensitive: v.sensitive,
            })
            .collect();

        Ok(CredentialVariables {
            csp: csp.to_string(),
            credential_type,
            variables,
        })
    }
}
