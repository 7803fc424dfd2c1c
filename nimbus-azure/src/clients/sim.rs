//! In-memory stand-in for the Azure APIs.
//!
//! Resources are partitioned by subscription, taken from the credentials a
//! client is built with. Every call is counted so callers can assert on the
//! number of reads and writes a reconcile performed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::network::{AzureSubnet, NewSubnetsClientFn, SubnetsClient};
use super::redis::{
    AccessKeys, AzureRedis, NewRedisClientFn, RedisClient, RedisCreateParameters,
    RedisUpdateParameters,
};
use super::{AzureError, Credentials};
use crate::apis::cache::{PROVISIONING_STATE_CREATING, PROVISIONING_STATE_SUCCEEDED};

type SubnetKey = (String, String, String, String);
type CacheKey = (String, String, String);

/// Number of reads a new cache reports `Creating` before it is `Succeeded`.
const DEFAULT_PROVISIONING_READS: u32 = 1;

/// Number of API calls made, by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub reads: usize,
    pub writes: usize,
    pub deletes: usize,
}

struct CacheEntry {
    cache: AzureRedis,
    keys: AccessKeys,
    pending_reads: u32,
}

#[derive(Default)]
struct CloudState {
    subnets: HashMap<SubnetKey, AzureSubnet>,
    caches: HashMap<CacheKey, CacheEntry>,
    revision: u64,
}

impl CloudState {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

#[derive(Default)]
pub struct SimulatedAzure {
    state: Mutex<CloudState>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    outage: AtomicBool,
}

impl SimulatedAzure {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// While set, every call fails with 503.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), AzureError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(AzureError::Api {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        Ok(())
    }

    /// Client factory for subnets, as used by the subnet connecter.
    pub fn subnets_factory(self: &Arc<Self>) -> NewSubnetsClientFn {
        let cloud = Arc::clone(self);
        Arc::new(move |data: &[u8]| -> Result<Box<dyn SubnetsClient>, AzureError> {
            let creds = Credentials::from_bytes(data)?;
            Ok(Box::new(SimulatedSubnets {
                cloud: Arc::clone(&cloud),
                subscription: creds.subscription_id,
            }) as Box<dyn SubnetsClient>)
        })
    }

    /// Client factory for caches, as used by the Redis connecter.
    pub fn redis_factory(self: &Arc<Self>) -> NewRedisClientFn {
        let cloud = Arc::clone(self);
        Arc::new(move |data: &[u8]| -> Result<Box<dyn RedisClient>, AzureError> {
            let creds = Credentials::from_bytes(data)?;
            Ok(Box::new(SimulatedRedis {
                cloud: Arc::clone(&cloud),
                subscription: creds.subscription_id,
            }) as Box<dyn RedisClient>)
        })
    }

    pub fn subnet(
        &self,
        subscription: &str,
        group: &str,
        vnet: &str,
        name: &str,
    ) -> Option<AzureSubnet> {
        self.lock()
            .subnets
            .get(&subnet_key(subscription, group, vnet, name))
            .cloned()
    }

    /// Change a subnet behind the controller's back.
    pub fn modify_subnet(
        &self,
        subscription: &str,
        group: &str,
        vnet: &str,
        name: &str,
        f: impl FnOnce(&mut AzureSubnet),
    ) -> bool {
        match self.lock().subnets.get_mut(&subnet_key(subscription, group, vnet, name)) {
            Some(subnet) => {
                f(subnet);
                true
            }
            None => false,
        }
    }

    pub fn redis(&self, subscription: &str, group: &str, name: &str) -> Option<AzureRedis> {
        self.lock()
            .caches
            .get(&cache_key(subscription, group, name))
            .map(|e| e.cache.clone())
    }

    /// Change a cache behind the controller's back.
    pub fn modify_redis(
        &self,
        subscription: &str,
        group: &str,
        name: &str,
        f: impl FnOnce(&mut AzureRedis),
    ) -> bool {
        match self.lock().caches.get_mut(&cache_key(subscription, group, name)) {
            Some(entry) => {
                f(&mut entry.cache);
                true
            }
            None => false,
        }
    }
}

fn subnet_key(subscription: &str, group: &str, vnet: &str, name: &str) -> SubnetKey {
    (
        subscription.to_string(),
        group.to_string(),
        vnet.to_string(),
        name.to_string(),
    )
}

fn cache_key(subscription: &str, group: &str, name: &str) -> CacheKey {
    (subscription.to_string(), group.to_string(), name.to_string())
}

pub struct SimulatedSubnets {
    cloud: Arc<SimulatedAzure>,
    subscription: String,
}

#[async_trait]
impl SubnetsClient for SimulatedSubnets {
    async fn get(
        &self,
        resource_group: &str,
        virtual_network: &str,
        name: &str,
    ) -> Result<AzureSubnet, AzureError> {
        self.cloud.reads.fetch_add(1, Ordering::SeqCst);
        self.cloud.check_available()?;
        self.cloud
            .subnet(&self.subscription, resource_group, virtual_network, name)
            .ok_or_else(|| AzureError::not_found("Subnet", name))
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        virtual_network: &str,
        name: &str,
        parameters: AzureSubnet,
    ) -> Result<AzureSubnet, AzureError> {
        self.cloud.writes.fetch_add(1, Ordering::SeqCst);
        self.cloud.check_available()?;

        let mut state = self.cloud.lock();
        let revision = state.next_revision();
        let subnet = AzureSubnet {
            id: Some(format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
                self.subscription, resource_group, virtual_network, name
            )),
            name: Some(name.to_string()),
            etag: Some(format!("W/\"{}\"", revision)),
            provisioning_state: Some(PROVISIONING_STATE_SUCCEEDED.to_string()),
            service_endpoints: parameters
                .service_endpoints
                .into_iter()
                .map(|mut e| {
                    e.provisioning_state = Some(PROVISIONING_STATE_SUCCEEDED.to_string());
                    e
                })
                .collect(),
            ..parameters
        };
        state.subnets.insert(
            subnet_key(&self.subscription, resource_group, virtual_network, name),
            subnet.clone(),
        );
        debug!(resource_group, virtual_network, name, "Simulated subnet written");
        Ok(subnet)
    }

    async fn delete(
        &self,
        resource_group: &str,
        virtual_network: &str,
        name: &str,
    ) -> Result<(), AzureError> {
        self.cloud.deletes.fetch_add(1, Ordering::SeqCst);
        self.cloud.check_available()?;
        self.cloud
            .lock()
            .subnets
            .remove(&subnet_key(&self.subscription, resource_group, virtual_network, name))
            .map(|_| ())
            .ok_or_else(|| AzureError::not_found("Subnet", name))
    }
}

pub struct SimulatedRedis {
    cloud: Arc<SimulatedAzure>,
    subscription: String,
}

#[async_trait]
impl RedisClient for SimulatedRedis {
    async fn get(&self, resource_group: &str, name: &str) -> Result<AzureRedis, AzureError> {
        self.cloud.reads.fetch_add(1, Ordering::SeqCst);
        self.cloud.check_available()?;

        let mut state = self.cloud.lock();
        let entry = state
            .caches
            .get_mut(&cache_key(&self.subscription, resource_group, name))
            .ok_or_else(|| AzureError::not_found("Redis", name))?;
        let observed = entry.cache.clone();
        if entry.pending_reads > 0 {
            entry.pending_reads -= 1;
            if entry.pending_reads == 0 {
                entry.cache.provisioning_state = PROVISIONING_STATE_SUCCEEDED.to_string();
            }
        }
        Ok(observed)
    }

    async fn create(
        &self,
        resource_group: &str,
        name: &str,
        parameters: RedisCreateParameters,
    ) -> Result<AzureRedis, AzureError> {
        self.cloud.writes.fetch_add(1, Ordering::SeqCst);
        self.cloud.check_available()?;

        let mut state = self.cloud.lock();
        let key = cache_key(&self.subscription, resource_group, name);
        if let Some(existing) = state.caches.get(&key) {
            return Ok(existing.cache.clone());
        }

        let revision = state.next_revision();
        let mut configuration = BTreeMap::from([
            ("maxclients".to_string(), "1000".to_string()),
            ("maxmemory-reserved".to_string(), "50".to_string()),
        ]);
        configuration.extend(parameters.redis_configuration);
        let cache = AzureRedis {
            id: format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Cache/Redis/{}",
                self.subscription, resource_group, name
            ),
            name: name.to_string(),
            location: parameters.location,
            sku: parameters.sku,
            subnet_id: parameters.subnet_id,
            static_ip: parameters.static_ip,
            enable_non_ssl_port: parameters.enable_non_ssl_port,
            redis_configuration: configuration,
            shard_count: parameters.shard_count,
            provisioning_state: PROVISIONING_STATE_CREATING.to_string(),
            host_name: format!("{}.redis.cache.windows.net", name),
            port: 6379,
            ssl_port: 6380,
            redis_version: "3.2.7".to_string(),
        };
        state.caches.insert(
            key,
            CacheEntry {
                cache: cache.clone(),
                keys: AccessKeys {
                    primary_key: format!("{:016x}", revision.wrapping_mul(0x9e37_79b9_7f4a_7c15)),
                    secondary_key: format!("{:016x}", revision.wrapping_mul(0xc2b2_ae3d_27d4_eb4f)),
                },
                pending_reads: DEFAULT_PROVISIONING_READS,
            },
        );
        debug!(resource_group, name, "Simulated cache created");
        Ok(cache)
    }

    async fn update(
        &self,
        resource_group: &str,
        name: &str,
        parameters: RedisUpdateParameters,
    ) -> Result<AzureRedis, AzureError> {
        self.cloud.writes.fetch_add(1, Ordering::SeqCst);
        self.cloud.check_available()?;

        let mut state = self.cloud.lock();
        let entry = state
            .caches
            .get_mut(&cache_key(&self.subscription, resource_group, name))
            .ok_or_else(|| AzureError::not_found("Redis", name))?;
        let cache = &mut entry.cache;
        cache.sku = parameters.sku;
        cache.enable_non_ssl_port = parameters.enable_non_ssl_port;
        cache.shard_count = parameters.shard_count;
        cache.redis_configuration.extend(parameters.redis_configuration);
        debug!(resource_group, name, "Simulated cache updated");
        Ok(cache.clone())
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError> {
        self.cloud.deletes.fetch_add(1, Ordering::SeqCst);
        self.cloud.check_available()?;
        self.cloud
            .lock()
            .caches
            .remove(&cache_key(&self.subscription, resource_group, name))
            .map(|_| ())
            .ok_or_else(|| AzureError::not_found("Redis", name))
    }

    async fn list_keys(&self, resource_group: &str, name: &str) -> Result<AccessKeys, AzureError> {
        self.cloud.reads.fetch_add(1, Ordering::SeqCst);
        self.cloud.check_available()?;
        self.cloud
            .lock()
            .caches
            .get(&cache_key(&self.subscription, resource_group, name))
            .map(|e| e.keys.clone())
            .ok_or_else(|| AzureError::not_found("Redis", name))
    }
}
