//! Subnet controller: keeps Azure subnets in line with `Subnet` records.

use std::sync::Arc;

use async_trait::async_trait;
use nimbus_runtime::{
    Condition, Connecter, Controller, CredentialResolver, Error, ExternalClient,
    ExternalCreation, ExternalObservation, ExternalUpdate, Managed, ManagedReconciler, Manager,
    Operation, Result,
};
use tracing::{debug, info};

use super::{Clients, Settings, Stores};
use crate::apis::{AzureManaged, SUBNET_GVK};
use crate::clients::network::{
    NewSubnetsClientFn, SubnetsClient, new_subnet_parameters, subnet_needs_update,
    update_subnet_status_from_azure,
};

pub const CONTROLLER_NAME: &str = "subnet.network.azure.nimbus.io";

const KIND: &str = "Subnet";

/// Builds a [`SubnetExternal`] from the credentials of a subnet's provider.
pub struct SubnetConnecter {
    resolver: CredentialResolver,
    new_client: NewSubnetsClientFn,
}

impl SubnetConnecter {
    pub fn new(resolver: CredentialResolver, new_client: NewSubnetsClientFn) -> Self {
        Self {
            resolver,
            new_client,
        }
    }
}

#[async_trait]
impl Connecter<AzureManaged> for SubnetConnecter {
    async fn connect(&self, mg: &AzureManaged) -> Result<Box<dyn ExternalClient<AzureManaged>>> {
        let subnet = mg.subnet()?;
        let creds = self
            .resolver
            .resolve(&subnet.spec.resource.provider_ref)
            .await?;
        let client = (self.new_client)(&creds).map_err(|e| Error::ClientConstruction {
            kind: KIND,
            source: e.into(),
        })?;
        Ok(Box::new(SubnetExternal::new(client)))
    }
}

pub struct SubnetExternal {
    client: Box<dyn SubnetsClient>,
}

impl SubnetExternal {
    pub fn new(client: Box<dyn SubnetsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExternalClient<AzureManaged> for SubnetExternal {
    async fn observe(&self, mg: &mut AzureManaged) -> Result<ExternalObservation> {
        let subnet = mg.subnet_mut()?;
        let spec = &subnet.spec;
        let az = match self
            .client
            .get(&spec.resource_group_name, &spec.virtual_network_name, &spec.name)
            .await
        {
            Ok(az) => az,
            Err(e) if e.is_not_found() => {
                debug!(subnet = %spec.name, "Subnet does not exist");
                return Ok(ExternalObservation::absent());
            }
            Err(e) => return Err(Error::provider(Operation::Get, KIND, &spec.name, e)),
        };

        update_subnet_status_from_azure(subnet, &az);
        subnet.set_conditions([Condition::available()]);
        Ok(ExternalObservation::exists())
    }

    async fn create(&self, mg: &mut AzureManaged) -> Result<ExternalCreation> {
        let subnet = mg.subnet_mut()?;
        subnet.set_conditions([Condition::creating()]);

        let spec = &subnet.spec;
        self.client
            .create_or_update(
                &spec.resource_group_name,
                &spec.virtual_network_name,
                &spec.name,
                new_subnet_parameters(subnet),
            )
            .await
            .map_err(|e| Error::provider(Operation::Create, KIND, &spec.name, e))?;
        info!(subnet = %spec.name, vnet = %spec.virtual_network_name, "Creating subnet");
        Ok(ExternalCreation::default())
    }

    async fn update(&self, mg: &mut AzureManaged) -> Result<ExternalUpdate> {
        let subnet = mg.subnet_mut()?;
        let spec = &subnet.spec;
        let az = self
            .client
            .get(&spec.resource_group_name, &spec.virtual_network_name, &spec.name)
            .await
            .map_err(|e| Error::provider(Operation::Get, KIND, &spec.name, e))?;

        if !subnet_needs_update(subnet, &az) {
            return Ok(ExternalUpdate::default());
        }

        self.client
            .create_or_update(
                &spec.resource_group_name,
                &spec.virtual_network_name,
                &spec.name,
                new_subnet_parameters(subnet),
            )
            .await
            .map_err(|e| Error::provider(Operation::Update, KIND, &spec.name, e))?;
        info!(subnet = %spec.name, "Updated drifted subnet");
        Ok(ExternalUpdate::default())
    }

    async fn delete(&self, mg: &mut AzureManaged) -> Result<()> {
        let subnet = mg.subnet_mut()?;
        subnet.set_conditions([Condition::deleting()]);

        let spec = &subnet.spec;
        match self
            .client
            .delete(&spec.resource_group_name, &spec.virtual_network_name, &spec.name)
            .await
        {
            Err(e) if !e.is_not_found() => {
                Err(Error::provider(Operation::Delete, KIND, &spec.name, e))
            }
            _ => Ok(()),
        }
    }
}

/// Register the subnet controller. Subnets publish no connection details.
pub fn setup(manager: &mut Manager, stores: &Stores, settings: &Settings, clients: &Clients) {
    let connecter: Arc<dyn Connecter<AzureManaged>> = Arc::new(SubnetConnecter::new(
        stores.resolver(),
        Arc::clone(&clients.subnets),
    ));
    let reconciler = ManagedReconciler::new(Arc::clone(&stores.managed), connecter)
        .with_waits(settings.short_wait, settings.long_wait);

    manager.add(
        Controller::new(CONTROLLER_NAME, Arc::new(reconciler))
            .for_store(
                Arc::clone(&stores.managed),
                Arc::new(|mg: &AzureManaged| mg.is_kind(SUBNET_GVK)),
            )
            .with_options(settings.options.clone()),
    );
}
