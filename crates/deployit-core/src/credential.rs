//! Credential center abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Variables,
    HttpAuthentication,
    ApiKey,
    Oauth2,
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialType::Variables => write!(f, "variables"),
            CredentialType::HttpAuthentication => write!(f, "http_authentication"),
            CredentialType::ApiKey => write!(f, "api_key"),
            CredentialType::Oauth2 => write!(f, "oauth2"),
        }
    }
}

/// One credential entry, exported to the tool as an environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialVariable {
    pub name: String,
    pub value: Option<String>,
    #[serde(default)]
    pub is_sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialVariables {
    pub csp: String,
    pub credential_type: CredentialType,
    pub variables: Vec<CredentialVariable>,
}

/// Resolves cloud credentials per user or per vendor account.
#[async_trait]
pub trait CredentialCenter: Send + Sync {
    /// `user_id` is `None` for vendor-hosted services, which use the
    /// vendor's shared credential.
    async fn get_credential(
        &self,
        csp: &str,
        site: &str,
        credential_type: CredentialType,
        user_id: Option<&str>,
    ) -> Result<CredentialVariables>;
}
