//! Redis records: the managed cache, its class and the portable claim.

use std::collections::BTreeMap;

use nimbus_runtime::meta::{Gvk, Object, ObjectMeta};
use nimbus_runtime::{
    Claim, Class, ClassSpecTemplate, Managed, ResourceClaimSpec, ResourceSpec, ResourceStatus,
};
use serde::{Deserialize, Serialize};

pub const REDIS_GVK: Gvk = Gvk::new("cache.azure.nimbus.io", "v1beta1", "Redis");
pub const REDIS_CLASS_GVK: Gvk = Gvk::new("cache.azure.nimbus.io", "v1beta1", "RedisClass");
pub const REDIS_CLUSTER_GVK: Gvk = Gvk::new("cache.nimbus.io", "v1alpha1", "RedisCluster");

/// The only engine version Azure Cache for Redis offers.
pub const SUPPORTED_REDIS_VERSION: &str = "3.2";

/// Provisioning states reported by Azure.
pub const PROVISIONING_STATE_SUCCEEDED: &str = "Succeeded";
pub const PROVISIONING_STATE_CREATING: &str = "Creating";
pub const PROVISIONING_STATE_DELETING: &str = "Deleting";

/// Pricing tier of a cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sku {
    /// `Basic`, `Standard` or `Premium`.
    pub name: String,
    /// `C` (Basic/Standard) or `P` (Premium).
    pub family: String,
    pub capacity: i32,
}

impl Sku {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.family.is_empty() && self.capacity == 0
    }
}

/// Desired cache settings. Optional fields left unset are filled in from
/// Azure once the cache exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisParameters {
    pub resource_group_name: String,
    pub location: String,
    pub sku: Sku,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(rename = "staticIP", skip_serializing_if = "Option::is_none")]
    pub static_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_non_ssl_port: Option<bool>,
    pub redis_configuration: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    pub for_provider: RedisParameters,
}

/// Cache state as last observed in Azure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisObservation {
    pub redis_version: String,
    pub provisioning_state: String,
    pub host_name: String,
    pub port: i32,
    #[serde(rename = "sslPort")]
    pub ssl_port: i32,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisStatus {
    #[serde(flatten)]
    pub resource: ResourceStatus,
    pub at_provider: RedisObservation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Redis {
    pub metadata: ObjectMeta,
    pub spec: RedisSpec,
    pub status: RedisStatus,
}

impl Object for Redis {
    fn gvk(&self) -> Gvk {
        REDIS_GVK
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Managed for Redis {
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisClassSpecTemplate {
    #[serde(flatten)]
    pub class: ClassSpecTemplate,
    pub for_provider: RedisParameters,
}

/// Template for Redis caches provisioned for claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisClass {
    pub metadata: ObjectMeta,
    pub spec_template: RedisClassSpecTemplate,
}

impl Object for RedisClass {
    fn gvk(&self) -> Gvk {
        REDIS_CLASS_GVK
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Class for RedisClass {
    fn class_template(&self) -> &ClassSpecTemplate {
        &self.spec_template.class
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisClusterSpec {
    #[serde(flatten)]
    pub claim: ResourceClaimSpec,
    /// Requested engine version. Empty means any.
    pub engine_version: String,
}

/// Portable request for a Redis cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisCluster {
    pub metadata: ObjectMeta,
    pub spec: RedisClusterSpec,
    pub status: ResourceStatus,
}

impl Object for RedisCluster {
    fn gvk(&self) -> Gvk {
        REDIS_CLUSTER_GVK
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Claim for RedisCluster {
    fn claim_spec(&self) -> &ResourceClaimSpec {
        &self.spec.claim
    }
    fn claim_spec_mut(&mut self) -> &mut ResourceClaimSpec {
        &mut self.spec.claim
    }
    fn status(&self) -> &ResourceStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut ResourceStatus {
        &mut self.status
    }
}
