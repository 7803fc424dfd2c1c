//! Redis controller: drives Azure Cache for Redis instances from `Redis` records.

use std::sync::Arc;

use async_trait::async_trait;
use nimbus_runtime::connection::SecretPublisher;
use nimbus_runtime::external::{
    CONNECTION_ENDPOINT_KEY, CONNECTION_PASSWORD_KEY, CONNECTION_PORT_KEY,
};
use nimbus_runtime::{
    Condition, Connecter, ConnectionDetails, Controller, CredentialResolver, Error,
    ExternalClient, ExternalCreation, ExternalObservation, ExternalUpdate, Managed,
    ManagedReconciler, Manager, Operation, Result,
};
use tracing::{debug, info};

use crate::apis::cache::{
    PROVISIONING_STATE_CREATING, PROVISIONING_STATE_DELETING, PROVISIONING_STATE_SUCCEEDED,
};
use crate::apis::{AzureManaged, REDIS_GVK};
use crate::clients::redis::{
    AccessKeys, AzureRedis, NewRedisClientFn, RedisClient, generate_observation,
    late_initialize, new_create_parameters, new_update_parameters, redis_needs_update,
};
use crate::controller::{Clients, Settings, Stores};

pub const CONTROLLER_NAME: &str = "redis.cache.azure.nimbus.io";

const KIND: &str = "Redis";

/// Builds a [`RedisExternal`] from the credentials of a cache's provider.
pub struct RedisConnecter {
    resolver: CredentialResolver,
    new_client: NewRedisClientFn,
}

impl RedisConnecter {
    pub fn new(resolver: CredentialResolver, new_client: NewRedisClientFn) -> Self {
        Self {
            resolver,
            new_client,
        }
    }
}

#[async_trait]
impl Connecter<AzureManaged> for RedisConnecter {
    async fn connect(&self, mg: &AzureManaged) -> Result<Box<dyn ExternalClient<AzureManaged>>> {
        let redis = mg.redis()?;
        let creds = self
            .resolver
            .resolve(&redis.spec.resource.provider_ref)
            .await?;
        let client = (self.new_client)(&creds).map_err(|e| Error::ClientConstruction {
            kind: KIND,
            source: e.into(),
        })?;
        Ok(Box::new(RedisExternal::new(client)))
    }
}

pub struct RedisExternal {
    client: Box<dyn RedisClient>,
}

impl RedisExternal {
    pub fn new(client: Box<dyn RedisClient>) -> Self {
        Self { client }
    }
}

fn connection_details(az: &AzureRedis, keys: &AccessKeys) -> ConnectionDetails {
    ConnectionDetails::from([
        (
            CONNECTION_ENDPOINT_KEY.to_string(),
            az.host_name.clone().into_bytes(),
        ),
        (
            CONNECTION_PORT_KEY.to_string(),
            az.ssl_port.to_string().into_bytes(),
        ),
        (
            CONNECTION_PASSWORD_KEY.to_string(),
            keys.primary_key.clone().into_bytes(),
        ),
    ])
}

#[async_trait]
impl ExternalClient<AzureManaged> for RedisExternal {
    async fn observe(&self, mg: &mut AzureManaged) -> Result<ExternalObservation> {
        let redis = mg.redis_mut()?;
        let name = redis.metadata.external_name().to_string();
        let group = redis.spec.for_provider.resource_group_name.clone();

        let az = match self.client.get(&group, &name).await {
            Ok(az) => az,
            Err(e) if e.is_not_found() => {
                debug!(redis = %name, "Cache does not exist");
                return Ok(ExternalObservation::absent());
            }
            Err(e) => return Err(Error::provider(Operation::Get, KIND, name, e)),
        };

        late_initialize(&mut redis.spec.for_provider, &az);
        redis.status.at_provider = generate_observation(&az);

        let mut observation = ExternalObservation::exists();
        match az.provisioning_state.as_str() {
            PROVISIONING_STATE_SUCCEEDED => {
                let keys = self
                    .client
                    .list_keys(&group, &name)
                    .await
                    .map_err(|e| Error::provider(Operation::ListKeys, KIND, &name, e))?;
                observation.connection_details = connection_details(&az, &keys);
                redis.set_conditions([Condition::available()]);
            }
            PROVISIONING_STATE_CREATING => redis.set_conditions([Condition::creating()]),
            PROVISIONING_STATE_DELETING => redis.set_conditions([Condition::deleting()]),
            state => {
                debug!(redis = %name, state, "Cache is unavailable");
                redis.set_conditions([Condition::unavailable()]);
            }
        }
        Ok(observation)
    }

    async fn create(&self, mg: &mut AzureManaged) -> Result<ExternalCreation> {
        let redis = mg.redis_mut()?;
        redis.set_conditions([Condition::creating()]);

        let name = redis.metadata.external_name().to_string();
        self.client
            .create(
                &redis.spec.for_provider.resource_group_name,
                &name,
                new_create_parameters(redis),
            )
            .await
            .map_err(|e| Error::provider(Operation::Create, KIND, &name, e))?;
        info!(redis = %name, location = %redis.spec.for_provider.location, "Creating cache");
        Ok(ExternalCreation::default())
    }

    async fn update(&self, mg: &mut AzureManaged) -> Result<ExternalUpdate> {
        let redis = mg.redis_mut()?;
        // Azure rejects updates while a cache is provisioning.
        if redis.status.at_provider.provisioning_state != PROVISIONING_STATE_SUCCEEDED {
            return Ok(ExternalUpdate::default());
        }

        let name = redis.metadata.external_name().to_string();
        let group = &redis.spec.for_provider.resource_group_name;
        let az = self
            .client
            .get(group, &name)
            .await
            .map_err(|e| Error::provider(Operation::Get, KIND, &name, e))?;
        if !redis_needs_update(&redis.spec.for_provider, &az) {
            return Ok(ExternalUpdate::default());
        }

        self.client
            .update(group, &name, new_update_parameters(redis))
            .await
            .map_err(|e| Error::provider(Operation::Update, KIND, &name, e))?;
        info!(redis = %name, "Updated drifted cache");
        Ok(ExternalUpdate::default())
    }

    async fn delete(&self, mg: &mut AzureManaged) -> Result<()> {
        let redis = mg.redis_mut()?;
        redis.set_conditions([Condition::deleting()]);
        if redis.status.at_provider.provisioning_state == PROVISIONING_STATE_DELETING {
            return Ok(());
        }

        let name = redis.metadata.external_name().to_string();
        match self
            .client
            .delete(&redis.spec.for_provider.resource_group_name, &name)
            .await
        {
            Err(e) if !e.is_not_found() => Err(Error::provider(Operation::Delete, KIND, name, e)),
            _ => Ok(()),
        }
    }
}

/// Register the managed Redis controller. Connection details are published
/// to the secret each cache points at.
pub fn setup(manager: &mut Manager, stores: &Stores, settings: &Settings, clients: &Clients) {
    let connecter: Arc<dyn Connecter<AzureManaged>> = Arc::new(RedisConnecter::new(
        stores.resolver(),
        Arc::clone(&clients.redis),
    ));
    let reconciler = ManagedReconciler::new(Arc::clone(&stores.managed), connecter)
        .with_publisher(Arc::new(SecretPublisher::new(Arc::clone(&stores.secrets))))
        .with_waits(settings.short_wait, settings.long_wait);

    manager.add(
        Controller::new(CONTROLLER_NAME, Arc::new(reconciler))
            .for_store(
                Arc::clone(&stores.managed),
                Arc::new(|mg: &AzureManaged| mg.is_kind(REDIS_GVK)),
            )
            .with_options(settings.options.clone()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::Redis;
    use crate::apis::cache::Sku;
    use crate::clients::sim::SimulatedAzure;
    use nimbus_runtime::ConditionReason;
    use nimbus_runtime::ConditionType;

    const CREDS: &[u8] =
        br#"{"clientId":"c","clientSecret":"s","tenantId":"t","subscriptionId":"sub"}"#;

    fn redis() -> AzureManaged {
        let mut r = Redis::default();
        r.metadata.name = "cache".to_string();
        r.spec.for_provider.resource_group_name = "rg".to_string();
        r.spec.for_provider.location = "westeurope".to_string();
        r.spec.for_provider.sku = Sku {
            name: "Basic".to_string(),
            family: "C".to_string(),
            capacity: 0,
        };
        r.spec
            .for_provider
            .redis_configuration
            .insert("maxmemory-policy".to_string(), "allkeys-lru".to_string());
        AzureManaged::Redis(r)
    }

    fn external(cloud: &Arc<SimulatedAzure>) -> RedisExternal {
        RedisExternal::new((cloud.redis_factory())(CREDS).unwrap())
    }

    fn ready_reason(mg: &AzureManaged) -> ConditionReason {
        Managed::status(mg)
            .get_condition(ConditionType::Ready)
            .unwrap()
            .reason
    }

    #[tokio::test]
    async fn test_observe_follows_provisioning_state() {
        let cloud = SimulatedAzure::new();
        let ext = external(&cloud);
        let mut mg = redis();

        assert!(!ext.observe(&mut mg).await.unwrap().resource_exists);
        ext.create(&mut mg).await.unwrap();
        assert_eq!(ready_reason(&mg), ConditionReason::Creating);

        let observation = ext.observe(&mut mg).await.unwrap();
        assert!(observation.resource_exists);
        assert!(observation.connection_details.is_empty());
        assert_eq!(ready_reason(&mg), ConditionReason::Creating);

        let observation = ext.observe(&mut mg).await.unwrap();
        assert_eq!(ready_reason(&mg), ConditionReason::Available);
        assert_eq!(
            observation.connection_details[CONNECTION_ENDPOINT_KEY],
            b"cache.redis.cache.windows.net".to_vec()
        );
        assert_eq!(observation.connection_details[CONNECTION_PORT_KEY], b"6380".to_vec());
        assert!(!observation.connection_details[CONNECTION_PASSWORD_KEY].is_empty());

        let r = mg.redis().unwrap();
        assert_eq!(r.status.at_provider.redis_version, "3.2.7");
        assert_eq!(r.spec.for_provider.enable_non_ssl_port, Some(false));
    }

    #[tokio::test]
    async fn test_update_skipped_while_provisioning() {
        let cloud = SimulatedAzure::new();
        let ext = external(&cloud);
        let mut mg = redis();
        ext.create(&mut mg).await.unwrap();
        let before = cloud.calls();

        ext.update(&mut mg).await.unwrap();
        assert_eq!(cloud.calls(), before);
    }

    #[tokio::test]
    async fn test_update_writes_only_on_drift() {
        let cloud = SimulatedAzure::new();
        let ext = external(&cloud);
        let mut mg = redis();
        ext.create(&mut mg).await.unwrap();
        ext.observe(&mut mg).await.unwrap();
        ext.observe(&mut mg).await.unwrap();
        let writes = cloud.calls().writes;

        ext.update(&mut mg).await.unwrap();
        assert_eq!(cloud.calls().writes, writes);

        cloud.modify_redis("sub", "rg", "cache", |c| c.sku.capacity = 2);
        ext.update(&mut mg).await.unwrap();
        assert_eq!(cloud.calls().writes, writes + 1);
        assert_eq!(cloud.redis("sub", "rg", "cache").unwrap().sku.capacity, 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cloud = SimulatedAzure::new();
        let ext = external(&cloud);
        let mut mg = redis();
        ext.delete(&mut mg).await.unwrap();
        assert_eq!(ready_reason(&mg), ConditionReason::Deleting);

        ext.create(&mut mg).await.unwrap();
        ext.delete(&mut mg).await.unwrap();
        assert!(cloud.redis("sub", "rg", "cache").is_none());
    }

    #[tokio::test]
    async fn test_delete_skipped_while_deleting() {
        let cloud = SimulatedAzure::new();
        let ext = external(&cloud);
        let mut mg = redis();
        mg.redis_mut().unwrap().status.at_provider.provisioning_state =
            PROVISIONING_STATE_DELETING.to_string();

        ext.delete(&mut mg).await.unwrap();
        assert_eq!(cloud.calls().deletes, 0);
    }

    #[tokio::test]
    async fn test_wrong_kind_makes_no_calls() {
        let cloud = SimulatedAzure::new();
        let ext = external(&cloud);
        let mut mg = AzureManaged::Subnet(Default::default());

        for err in [
            ext.observe(&mut mg).await.err(),
            ext.create(&mut mg).await.err(),
            ext.update(&mut mg).await.err(),
            ext.delete(&mut mg).await.err(),
        ] {
            assert!(matches!(err, Some(Error::TypeMismatch { .. })));
        }
        assert_eq!(cloud.calls(), Default::default());
    }
}
