//! Contracts between the managed reconciler and provider-specific code.
//!
//! A [`Connecter`] produces an [`ExternalClient`] for one record; the client
//! expresses how to observe, create, update and delete the external resource.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::resource::Managed;

/// Secret key holding the endpoint of an external resource.
pub const CONNECTION_ENDPOINT_KEY: &str = "endpoint";
/// Secret key holding the port of an external resource.
pub const CONNECTION_PORT_KEY: &str = "port";
/// Secret key holding the password of an external resource.
pub const CONNECTION_PASSWORD_KEY: &str = "password";

/// Details needed to connect to an external resource.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Result of observing an external resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalObservation {
    pub resource_exists: bool,
    pub connection_details: ConnectionDetails,
}

impl ExternalObservation {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn exists() -> Self {
        Self {
            resource_exists: true,
            connection_details: ConnectionDetails::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalCreation {
    pub connection_details: ConnectionDetails,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalUpdate {
    pub connection_details: ConnectionDetails,
}

/// Drives one external resource toward the desired state of its record.
///
/// Implementations must be idempotent:
/// - `observe` reports an absent resource as `resource_exists == false`, not an error
/// - `delete` treats an absent resource as success
#[async_trait]
pub trait ExternalClient<M: Managed>: Send + Sync {
    async fn observe(&self, mg: &mut M) -> Result<ExternalObservation>;
    async fn create(&self, mg: &mut M) -> Result<ExternalCreation>;
    async fn update(&self, mg: &mut M) -> Result<ExternalUpdate>;
    async fn delete(&self, mg: &mut M) -> Result<()>;
}

/// Produces an [`ExternalClient`] for a record, resolving its credentials.
#[async_trait]
pub trait Connecter<M: Managed>: Send + Sync {
    async fn connect(&self, mg: &M) -> Result<Box<dyn ExternalClient<M>>>;
}
