//! Shared harness: seeded stores, the simulated cloud and a running manager.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nimbus_azure::apis::cache::{RedisClass, RedisCluster, Sku};
use nimbus_azure::apis::network::{ServiceEndpoint, Subnet};
use nimbus_azure::clients::sim::SimulatedAzure;
use nimbus_azure::controller::{self, Clients, Settings, Stores};
use nimbus_runtime::credentials::ProviderSpec;
use nimbus_runtime::meta::{LabelSelector, ObjectMeta, Reference};
use nimbus_runtime::resource::{DEFAULT_CLASS_ANNOTATION, SecretKeySelector};
use nimbus_runtime::{ControllerOptions, Manager, Provider, ReclaimPolicy, Secret};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const SUBSCRIPTION: &str = "sub-0001";
pub const PROVIDER_NAME: &str = "azure";
pub const SYSTEM_NAMESPACE: &str = "nimbus-system";
pub const CLAIM_NAMESPACE: &str = "default";
pub const RESOURCE_GROUP: &str = "rg-nimbus";

pub fn credentials() -> String {
    format!(
        r#"{{"clientId":"client","clientSecret":"secret","tenantId":"tenant","subscriptionId":"{}"}}"#,
        SUBSCRIPTION
    )
}

pub fn provider() -> Provider {
    Provider {
        metadata: ObjectMeta::named(None, PROVIDER_NAME),
        spec: ProviderSpec {
            credentials_secret_ref: SecretKeySelector {
                namespace: SYSTEM_NAMESPACE.to_string(),
                name: "azure-creds".to_string(),
                key: "credentials".to_string(),
            },
        },
    }
}

pub fn credentials_secret() -> Secret {
    let mut secret = Secret::new(SYSTEM_NAMESPACE, "azure-creds");
    secret
        .data
        .insert("credentials".to_string(), credentials().into_bytes());
    secret
}

pub fn subnet(name: &str, policy: ReclaimPolicy) -> Subnet {
    let mut s = Subnet::default();
    s.metadata = ObjectMeta::named(None, name);
    s.spec.name = name.to_string();
    s.spec.virtual_network_name = "vnet-nimbus".to_string();
    s.spec.resource_group_name = RESOURCE_GROUP.to_string();
    s.spec.properties.address_prefix = "10.10.1.0/24".to_string();
    s.spec.properties.service_endpoints = vec![ServiceEndpoint {
        service: "Microsoft.Storage".to_string(),
    }];
    s.spec.resource.provider_ref = Reference::new(None, PROVIDER_NAME);
    s.spec.resource.reclaim_policy = policy;
    s
}

pub fn redis_class(name: &str, labels: &[(&str, &str)], policy: ReclaimPolicy) -> RedisClass {
    let mut class = RedisClass {
        metadata: ObjectMeta::named(None, name),
        ..Default::default()
    };
    class.metadata.labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let template = &mut class.spec_template;
    template.class.write_connection_secrets_to_namespace = SYSTEM_NAMESPACE.to_string();
    template.class.provider_ref = Reference::new(None, PROVIDER_NAME);
    template.class.reclaim_policy = policy;
    template.for_provider.resource_group_name = RESOURCE_GROUP.to_string();
    template.for_provider.location = "westeurope".to_string();
    template.for_provider.sku = Sku {
        name: "Basic".to_string(),
        family: "C".to_string(),
        capacity: 1,
    };
    template.for_provider.redis_configuration =
        BTreeMap::from([("maxmemory-policy".to_string(), "allkeys-lru".to_string())]);
    class
}

pub fn default_class(name: &str, policy: ReclaimPolicy) -> RedisClass {
    let mut class = redis_class(name, &[], policy);
    class
        .metadata
        .annotations
        .insert(DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string());
    class
}

pub fn claim(name: &str) -> RedisCluster {
    RedisCluster {
        metadata: ObjectMeta::named(Some(CLAIM_NAMESPACE), name),
        ..Default::default()
    }
}

pub fn claim_selecting(name: &str, labels: &[(&str, &str)]) -> RedisCluster {
    let mut c = claim(name);
    c.spec.claim.class_selector = Some(LabelSelector::new(labels.iter().copied()));
    c
}

/// Stores holding the provider and its credentials secret.
pub async fn seeded_stores() -> Stores {
    let stores = Stores::new();
    stores.providers.create(provider()).await.unwrap();
    stores.secrets.create(credentials_secret()).await.unwrap();
    stores
}

pub fn fast_settings() -> Settings {
    Settings {
        options: ControllerOptions {
            workers: 2,
            resync_period: Duration::from_secs(1),
            reconcile_timeout: Duration::from_secs(5),
        },
        short_wait: Duration::from_millis(50),
        long_wait: Duration::from_millis(200),
    }
}

/// Every controller running against a fresh simulated cloud.
pub struct TestEnv {
    pub stores: Stores,
    pub cloud: Arc<SimulatedAzure>,
    shutdown: watch::Sender<bool>,
    manager: JoinHandle<()>,
}

impl TestEnv {
    pub async fn spawn() -> Self {
        let stores = seeded_stores().await;
        let cloud = SimulatedAzure::new();

        let mut manager = Manager::new();
        controller::setup(
            &mut manager,
            &stores,
            &fast_settings(),
            &Clients::simulated(&cloud),
        );
        let (shutdown, rx) = watch::channel(false);
        let manager = tokio::spawn(manager.run(rx));

        Self {
            stores,
            cloud,
            shutdown,
            manager,
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.manager.await.unwrap();
    }
}

/// Poll until the condition holds. Panics after 30 seconds.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}
