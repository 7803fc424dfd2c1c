//! Subnets client and the mapping between `Subnet` records and Azure subnets.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AzureError;
use crate::apis::network::Subnet;

/// A service endpoint as Azure reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureServiceEndpoint {
    pub service: Option<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    pub provisioning_state: Option<String>,
}

/// Subnet payload of the Azure network API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSubnet {
    pub id: Option<String>,
    pub name: Option<String>,
    pub etag: Option<String>,
    pub address_prefix: Option<String>,
    #[serde(default)]
    pub service_endpoints: Vec<AzureServiceEndpoint>,
    pub provisioning_state: Option<String>,
    pub purpose: Option<String>,
}

#[async_trait]
pub trait SubnetsClient: Send + Sync {
    async fn get(
        &self,
        resource_group: &str,
        virtual_network: &str,
        name: &str,
    ) -> Result<AzureSubnet, AzureError>;

    async fn create_or_update(
        &self,
        resource_group: &str,
        virtual_network: &str,
        name: &str,
        parameters: AzureSubnet,
    ) -> Result<AzureSubnet, AzureError>;

    async fn delete(
        &self,
        resource_group: &str,
        virtual_network: &str,
        name: &str,
    ) -> Result<(), AzureError>;
}

/// Builds a subnets client from the raw bytes of a provider secret.
pub type NewSubnetsClientFn =
    Arc<dyn Fn(&[u8]) -> Result<Box<dyn SubnetsClient>, AzureError> + Send + Sync>;

/// Azure payload for the desired state of a subnet.
pub fn new_subnet_parameters(s: &Subnet) -> AzureSubnet {
    AzureSubnet {
        name: Some(s.spec.name.clone()),
        address_prefix: Some(s.spec.properties.address_prefix.clone()),
        service_endpoints: s
            .spec
            .properties
            .service_endpoints
            .iter()
            .map(|e| AzureServiceEndpoint {
                service: Some(e.service.clone()),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Whether the subnet in Azure differs from the record.
///
/// Only the address prefix and the service names of the service endpoints
/// are compared; everything else on the Azure side is provider-managed.
pub fn subnet_needs_update(s: &Subnet, az: &AzureSubnet) -> bool {
    if az.address_prefix.as_deref() != Some(s.spec.properties.address_prefix.as_str()) {
        return true;
    }
    let desired = s.spec.properties.service_endpoints.iter().map(|e| e.service.as_str());
    let observed = az
        .service_endpoints
        .iter()
        .map(|e| e.service.as_deref().unwrap_or_default());
    !desired.eq(observed)
}

/// Copy provider-assigned fields of an Azure subnet into the record status.
pub fn update_subnet_status_from_azure(s: &mut Subnet, az: &AzureSubnet) {
    s.status.state = az.provisioning_state.clone().unwrap_or_default();
    s.status.etag = az.etag.clone().unwrap_or_default();
    s.status.id = az.id.clone().unwrap_or_default();
    s.status.purpose = az.purpose.clone().unwrap_or_default();
}
