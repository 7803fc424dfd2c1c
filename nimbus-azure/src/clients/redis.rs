//! Redis client and the mapping between `Redis` records and Azure caches.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AzureError;
use crate::apis::cache::{Redis, RedisObservation, RedisParameters, Sku};

/// Cache payload of the Azure Redis API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureRedis {
    pub id: String,
    pub name: String,
    pub location: String,
    pub sku: Sku,
    pub subnet_id: Option<String>,
    pub static_ip: Option<String>,
    pub enable_non_ssl_port: bool,
    pub redis_configuration: BTreeMap<String, String>,
    pub shard_count: Option<i32>,
    pub provisioning_state: String,
    pub host_name: String,
    pub port: i32,
    pub ssl_port: i32,
    pub redis_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisCreateParameters {
    pub location: String,
    pub sku: Sku,
    pub subnet_id: Option<String>,
    pub static_ip: Option<String>,
    pub enable_non_ssl_port: bool,
    pub redis_configuration: BTreeMap<String, String>,
    pub shard_count: Option<i32>,
}

/// Settings that can change on an existing cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisUpdateParameters {
    pub sku: Sku,
    pub enable_non_ssl_port: bool,
    pub redis_configuration: BTreeMap<String, String>,
    pub shard_count: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKeys {
    pub primary_key: String,
    pub secondary_key: String,
}

#[async_trait]
pub trait RedisClient: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<AzureRedis, AzureError>;

    async fn create(
        &self,
        resource_group: &str,
        name: &str,
        parameters: RedisCreateParameters,
    ) -> Result<AzureRedis, AzureError>;

    async fn update(
        &self,
        resource_group: &str,
        name: &str,
        parameters: RedisUpdateParameters,
    ) -> Result<AzureRedis, AzureError>;

    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError>;

    async fn list_keys(&self, resource_group: &str, name: &str) -> Result<AccessKeys, AzureError>;
}

/// Builds a Redis client from the raw bytes of a provider secret.
pub type NewRedisClientFn =
    Arc<dyn Fn(&[u8]) -> Result<Box<dyn RedisClient>, AzureError> + Send + Sync>;

pub fn new_create_parameters(r: &Redis) -> RedisCreateParameters {
    let p = &r.spec.for_provider;
    RedisCreateParameters {
        location: p.location.clone(),
        sku: p.sku.clone(),
        subnet_id: p.subnet_id.clone(),
        static_ip: p.static_ip.clone(),
        enable_non_ssl_port: p.enable_non_ssl_port.unwrap_or(false),
        redis_configuration: p.redis_configuration.clone(),
        shard_count: p.shard_count,
    }
}

pub fn new_update_parameters(r: &Redis) -> RedisUpdateParameters {
    let p = &r.spec.for_provider;
    RedisUpdateParameters {
        sku: p.sku.clone(),
        enable_non_ssl_port: p.enable_non_ssl_port.unwrap_or(false),
        redis_configuration: p.redis_configuration.clone(),
        shard_count: p.shard_count,
    }
}

/// Whether the cache in Azure differs from the desired parameters.
///
/// Compares only what an update can change. Location, subnet and static IP
/// are fixed at creation.
pub fn redis_needs_update(p: &RedisParameters, az: &AzureRedis) -> bool {
    if p.sku != az.sku {
        return true;
    }
    if p.enable_non_ssl_port.unwrap_or(false) != az.enable_non_ssl_port {
        return true;
    }
    if p.shard_count != az.shard_count {
        return true;
    }
    // Azure adds its own defaults to the configuration; only keys we set count.
    p.redis_configuration
        .iter()
        .any(|(k, v)| az.redis_configuration.get(k) != Some(v))
}

/// Fill unset optional parameters with the values Azure chose.
pub fn late_initialize(p: &mut RedisParameters, az: &AzureRedis) {
    if p.sku.is_empty() {
        p.sku = az.sku.clone();
    }
    if p.enable_non_ssl_port.is_none() {
        p.enable_non_ssl_port = Some(az.enable_non_ssl_port);
    }
    if p.shard_count.is_none() {
        p.shard_count = az.shard_count;
    }
    if p.subnet_id.is_none() {
        p.subnet_id = az.subnet_id.clone();
    }
    if p.static_ip.is_none() {
        p.static_ip = az.static_ip.clone();
    }
    if p.redis_configuration.is_empty() {
        p.redis_configuration = az.redis_configuration.clone();
    }
}

pub fn generate_observation(az: &AzureRedis) -> RedisObservation {
    RedisObservation {
        redis_version: az.redis_version.clone(),
        provisioning_state: az.provisioning_state.clone(),
        host_name: az.host_name.clone(),
        port: az.port,
        ssl_port: az.ssl_port,
        id: az.id.clone(),
        name: az.name.clone(),
    }
}
