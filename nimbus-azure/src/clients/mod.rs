//! Azure API surface used by the controllers.
//!
//! Each resource kind gets a narrow async client trait, plus pure functions
//! mapping between records and Azure payloads. The shipped implementation of
//! the traits is [`sim::SimulatedAzure`].

pub mod network;
pub mod redis;
pub mod sim;

use serde::Deserialize;
use thiserror::Error;

/// Errors returned by Azure clients.
#[derive(Debug, Error)]
pub enum AzureError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("azure returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid credentials: {0}")]
    Credentials(#[from] serde_json::Error),

    #[error("credentials are missing {0}")]
    MissingCredential(&'static str),
}

impl AzureError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        AzureError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            AzureError::NotFound { .. } => true,
            AzureError::Api { status, .. } => *status == 404,
            _ => false,
        }
    }
}

/// Service principal credentials, as produced by `az ad sp create-for-rbac --sdk-auth`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
    #[serde(default, rename = "activeDirectoryEndpointUrl")]
    pub active_directory_endpoint_url: Option<String>,
    #[serde(default, rename = "resourceManagerEndpointUrl")]
    pub resource_manager_endpoint_url: Option<String>,
}

impl Credentials {
    /// Parse the JSON payload of a provider secret.
    pub fn from_bytes(data: &[u8]) -> Result<Self, AzureError> {
        let creds: Credentials = serde_json::from_slice(data)?;
        if creds.subscription_id.is_empty() {
            return Err(AzureError::MissingCredential("subscriptionId"));
        }
        if creds.client_id.is_empty() {
            return Err(AzureError::MissingCredential("clientId"));
        }
        Ok(creds)
    }
}
