//! Publishing connection details of managed resources.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::credentials::Secret;
use crate::error::Result;
use crate::external::ConnectionDetails;
use crate::resource::Managed;
use crate::store::Store;

/// Annotation on a published secret naming the record that owns it.
pub const OWNER_ANNOTATION: &str = "nimbus.io/owner";

#[async_trait]
pub trait ConnectionPublisher<M: Managed>: Send + Sync {
    async fn publish(&self, mg: &M, details: &ConnectionDetails) -> Result<()>;
    async fn unpublish(&self, mg: &M) -> Result<()>;
}

/// Writes connection details into the secret a managed resource points at.
pub struct SecretPublisher {
    secrets: Arc<Store<Secret>>,
}

impl SecretPublisher {
    pub fn new(secrets: Arc<Store<Secret>>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl<M: Managed> ConnectionPublisher<M> for SecretPublisher {
    async fn publish(&self, mg: &M, details: &ConnectionDetails) -> Result<()> {
        let Some(target) = &mg.resource_spec().write_connection_secret_to_ref else {
            return Ok(());
        };
        if details.is_empty() {
            return Ok(());
        }

        let key = Secret::key_ref(&target.namespace, &target.name);
        let owner = mg.object_ref().to_string();

        match self.secrets.try_get(&key).await {
            Some(mut secret) => {
                let before = secret.data.clone();
                secret
                    .data
                    .extend(details.iter().map(|(k, v)| (k.clone(), v.clone())));
                if secret.data != before {
                    self.secrets.update(secret).await?;
                    debug!(secret = %key, owner = %owner, "Updated connection secret");
                }
            }
            None => {
                let mut secret = Secret::new(&target.namespace, &target.name);
                secret
                    .metadata
                    .annotations
                    .insert(OWNER_ANNOTATION.to_string(), owner.clone());
                secret.data = details.clone();
                self.secrets.create(secret).await?;
                debug!(secret = %key, owner = %owner, "Created connection secret");
            }
        }
        Ok(())
    }

    async fn unpublish(&self, mg: &M) -> Result<()> {
        let Some(target) = &mg.resource_spec().write_connection_secret_to_ref else {
            return Ok(());
        };
        let key = Secret::key_ref(&target.namespace, &target.name);
        let owner = mg.object_ref().to_string();

        // Secrets created by someone else are left alone.
        let owned = self
            .secrets
            .try_get(&key)
            .await
            .is_some_and(|s| s.metadata.annotations.get(OWNER_ANNOTATION) == Some(&owner));
        if owned {
            match self.secrets.delete(&key).await {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => debug!(secret = %key, "Deleted connection secret"),
            }
        }
        Ok(())
    }
}
