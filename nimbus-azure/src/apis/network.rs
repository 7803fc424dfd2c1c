//! Subnet records.

use nimbus_runtime::meta::{Gvk, Object, ObjectMeta};
use nimbus_runtime::{Managed, ResourceSpec, ResourceStatus};
use serde::{Deserialize, Serialize};

pub const SUBNET_GVK: Gvk = Gvk::new("network.azure.nimbus.io", "v1alpha3", "Subnet");

/// A service endpoint enabled on a subnet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Service type, e.g. `Microsoft.Storage`.
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubnetProperties {
    /// CIDR of the subnet, e.g. `10.0.1.0/24`.
    pub address_prefix: String,
    pub service_endpoints: Vec<ServiceEndpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubnetSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Name of the subnet inside its virtual network.
    pub name: String,
    pub virtual_network_name: String,
    pub resource_group_name: String,
    pub properties: SubnetProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubnetStatus {
    #[serde(flatten)]
    pub resource: ResourceStatus,
    /// Provisioning state reported by Azure.
    pub state: String,
    pub etag: String,
    pub id: String,
    pub purpose: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subnet {
    pub metadata: ObjectMeta,
    pub spec: SubnetSpec,
    pub status: SubnetStatus,
}

impl Object for Subnet {
    fn gvk(&self) -> Gvk {
        SUBNET_GVK
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Managed for Subnet {
    fn resource_spec(&self) -> &ResourceSpec {
        &self.spec.resource
    }
    fn resource_spec_mut(&mut self) -> &mut ResourceSpec {
        &mut self.spec.resource
    }
    fn status(&self) -> &ResourceStatus {
        &self.status.resource
    }
    fn status_mut(&mut self) -> &mut ResourceStatus {
        &mut self.status.resource
    }
}
