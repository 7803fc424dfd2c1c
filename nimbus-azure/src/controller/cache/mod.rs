//! Controllers for Azure Cache for Redis and the RedisCluster claims it satisfies.

pub mod claim;
pub mod redis;

pub use claim::configure_redis;

use nimbus_runtime::Manager;

use super::{Clients, Settings, Stores};

pub fn setup(manager: &mut Manager, stores: &Stores, settings: &Settings, clients: &Clients) {
    redis::setup(manager, stores, settings, clients);
    claim::setup(manager, stores, settings);
}
