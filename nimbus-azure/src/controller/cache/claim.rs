//! RedisCluster claims: scheduling, defaulting and binding to Azure caches.

use std::sync::Arc;

use nimbus_runtime::claims::binding::ManagedFactory;
use nimbus_runtime::claims::{
    ClaimBindingReconciler, ClaimDefaultingReconciler, ClaimSchedulingReconciler, bindable,
    configure_names, configure_reclaim_policy, defaultable, schedulable,
};
use nimbus_runtime::resource::SecretReference;
use nimbus_runtime::{Controller, Error, Managed, Manager, Result};

use crate::apis::cache::RedisSpec;
use crate::apis::{
    AzureManaged, REDIS_CLASS_GVK, REDIS_CLUSTER_GVK, REDIS_GVK, Redis, RedisClass,
    RedisCluster, SUPPORTED_REDIS_VERSION,
};
use crate::controller::{Settings, Stores};

pub const SCHEDULER_NAME: &str = "scheduler.rediscluster.cache.azure.nimbus.io";
pub const DEFAULTER_NAME: &str = "defaulter.rediscluster.cache.azure.nimbus.io";
pub const BINDER_NAME: &str = "rediscluster.cache.azure.nimbus.io";

/// Fill a Redis stub from a RedisCluster claim and a RedisClass.
///
/// The stub is left untouched when the claim cannot be satisfied.
pub fn configure_redis(
    claim: &RedisCluster,
    class: &RedisClass,
    mg: &mut AzureManaged,
) -> Result<()> {
    let redis = mg.redis_mut()?;

    let version = &claim.spec.engine_version;
    if !version.is_empty() && version != SUPPORTED_REDIS_VERSION {
        return Err(Error::UnsupportedOption {
            option: "engine version",
            value: version.clone(),
            supported: SUPPORTED_REDIS_VERSION.to_string(),
        });
    }

    let template = &class.spec_template;
    let mut spec = RedisSpec {
        for_provider: template.for_provider.clone(),
        ..Default::default()
    };
    spec.resource.write_connection_secret_to_ref = Some(SecretReference {
        namespace: template.class.write_connection_secrets_to_namespace.clone(),
        name: claim.metadata.uid.clone(),
    });
    spec.resource.provider_ref = template.class.provider_ref.clone();
    spec.resource.reclaim_policy = template.class.reclaim_policy;

    redis.spec = spec;
    Ok(())
}

fn is_claimed_redis(mg: &AzureManaged) -> bool {
    mg.is_kind(REDIS_GVK)
        && mg
            .resource_spec()
            .claim_ref
            .as_ref()
            .is_some_and(|r| r.is_kind(REDIS_CLUSTER_GVK))
}

/// Register the scheduling, defaulting and binding controllers for RedisCluster claims.
pub fn setup(manager: &mut Manager, stores: &Stores, settings: &Settings) {
    let scheduler = ClaimSchedulingReconciler::new(
        Arc::clone(&stores.redis_clusters),
        Arc::clone(&stores.redis_classes),
    )
    .with_long_wait(settings.long_wait);
    manager.add(
        Controller::new(SCHEDULER_NAME, Arc::new(scheduler))
            .for_store(
                Arc::clone(&stores.redis_clusters),
                schedulable::<RedisCluster>(),
            )
            .with_options(settings.options.clone()),
    );

    let defaulter = ClaimDefaultingReconciler::new(
        Arc::clone(&stores.redis_clusters),
        Arc::clone(&stores.redis_classes),
    )
    .with_long_wait(settings.long_wait);
    manager.add(
        Controller::new(DEFAULTER_NAME, Arc::new(defaulter))
            .for_store(
                Arc::clone(&stores.redis_clusters),
                defaultable::<RedisCluster>(),
            )
            .with_options(settings.options.clone()),
    );

    let new_redis: ManagedFactory<AzureManaged> =
        Arc::new(|| AzureManaged::Redis(Redis::default()));
    let binder = ClaimBindingReconciler::new(
        Arc::clone(&stores.redis_clusters),
        Arc::clone(&stores.redis_classes),
        Arc::clone(&stores.managed),
        Arc::clone(&stores.secrets),
        new_redis,
    )
    .with_configurator(Arc::new(configure_redis))
    .with_configurator(Arc::new(
        configure_reclaim_policy::<RedisCluster, RedisClass, AzureManaged>,
    ))
    .with_configurator(Arc::new(
        configure_names::<RedisCluster, RedisClass, AzureManaged>,
    ));
    manager.add(
        Controller::new(BINDER_NAME, Arc::new(binder))
            .for_store(
                Arc::clone(&stores.redis_clusters),
                bindable::<RedisCluster>(REDIS_CLASS_GVK, REDIS_GVK),
            )
            .watches(
                Arc::clone(&stores.managed),
                Arc::new(is_claimed_redis),
                Arc::new(|mg: &AzureManaged| mg.resource_spec().claim_ref.clone()),
            )
            .with_options(settings.options.clone()),
    );
}
