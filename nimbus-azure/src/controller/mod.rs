//! Controller wiring.
//!
//! Every managed kind shares one store of [`AzureManaged`] records; each
//! controller filters it down to the kind it handles.

pub mod cache;
pub mod network;

use std::sync::Arc;
use std::time::Duration;

use nimbus_runtime::managed::{DEFAULT_LONG_WAIT, DEFAULT_SHORT_WAIT};
use nimbus_runtime::{ControllerOptions, CredentialResolver, Manager, Provider, Secret, Store};

use crate::apis::{AzureManaged, RedisClass, RedisCluster};
use crate::clients::network::NewSubnetsClientFn;
use crate::clients::redis::NewRedisClientFn;
use crate::clients::sim::SimulatedAzure;

/// Record stores shared by all controllers.
#[derive(Default)]
pub struct Stores {
    pub providers: Arc<Store<Provider>>,
    pub secrets: Arc<Store<Secret>>,
    pub managed: Arc<Store<AzureManaged>>,
    pub redis_classes: Arc<Store<RedisClass>>,
    pub redis_clusters: Arc<Store<RedisCluster>>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolver(&self) -> CredentialResolver {
        CredentialResolver::new(Arc::clone(&self.providers), Arc::clone(&self.secrets))
    }
}

/// Timing and concurrency shared by all controllers.
#[derive(Debug, Clone)]
pub struct Settings {
    pub options: ControllerOptions,
    /// Wait after requesting a change before observing again.
    pub short_wait: Duration,
    /// Wait between drift checks of an up-to-date resource.
    pub long_wait: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            options: ControllerOptions::default(),
            short_wait: DEFAULT_SHORT_WAIT,
            long_wait: DEFAULT_LONG_WAIT,
        }
    }
}

/// Azure client factories, one per resource kind.
#[derive(Clone)]
pub struct Clients {
    pub subnets: NewSubnetsClientFn,
    pub redis: NewRedisClientFn,
}

impl Clients {
    pub fn simulated(cloud: &Arc<SimulatedAzure>) -> Self {
        Self {
            subnets: cloud.subnets_factory(),
            redis: cloud.redis_factory(),
        }
    }
}

/// Register every controller of this provider.
pub fn setup(manager: &mut Manager, stores: &Stores, settings: &Settings, clients: &Clients) {
    network::setup(manager, stores, settings, clients);
    cache::setup(manager, stores, settings, clients);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_registers_all_controllers() {
        let cloud = SimulatedAzure::new();
        let mut manager = Manager::new();
        setup(
            &mut manager,
            &Stores::new(),
            &Settings::default(),
            &Clients::simulated(&cloud),
        );

        assert_eq!(
            manager.controller_names(),
            vec![
                network::CONTROLLER_NAME,
                cache::redis::CONTROLLER_NAME,
                cache::claim::SCHEDULER_NAME,
                cache::claim::DEFAULTER_NAME,
                cache::claim::BINDER_NAME,
            ]
        );
    }
}
