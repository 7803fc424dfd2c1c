//! Binds claims to managed resources, provisioning them from classes when needed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::claims::ManagedConfigurator;
use crate::condition::{BindingPhase, Condition};
use crate::connection::OWNER_ANNOTATION;
use crate::controller::{Action, Reconciler};
use crate::credentials::Secret;
use crate::error::{Error, Result};
use crate::meta::{Object, ObjectRef};
use crate::resource::{CLAIM_FINALIZER, Claim, Class, Managed, ReclaimPolicy};
use crate::store::Store;

/// Builds an empty managed resource of the kind a claim provisions.
pub type ManagedFactory<M> = Arc<dyn Fn() -> M + Send + Sync>;

/// Records the binding between a claim and a managed resource.
#[async_trait]
pub trait Binder<C: Claim, M: Managed>: Send + Sync {
    async fn bind(&self, claim: &mut C, managed: &mut M) -> Result<()>;
    async fn unbind(&self, claim: &mut C, managed: &mut M) -> Result<()>;
}

/// Binder that writes the managed side to its store. The caller persists the claim.
pub struct ApiBinder<M: Managed> {
    managed: Arc<Store<M>>,
}

impl<M: Managed> ApiBinder<M> {
    pub fn new(managed: Arc<Store<M>>) -> Self {
        Self { managed }
    }
}

#[async_trait]
impl<C: Claim, M: Managed> Binder<C, M> for ApiBinder<M> {
    async fn bind(&self, claim: &mut C, managed: &mut M) -> Result<()> {
        managed.resource_spec_mut().claim_ref = Some(claim.object_ref());
        managed.status_mut().binding_phase = BindingPhase::Bound;
        *managed = self.managed.update(managed.clone()).await?;
        claim.status_mut().binding_phase = BindingPhase::Bound;
        Ok(())
    }

    async fn unbind(&self, claim: &mut C, managed: &mut M) -> Result<()> {
        managed.resource_spec_mut().claim_ref = None;
        managed.status_mut().binding_phase = BindingPhase::Released;
        *managed = self.managed.update(managed.clone()).await?;

        if managed.resource_spec().reclaim_policy == ReclaimPolicy::Delete {
            match self.managed.delete(&managed.object_ref()).await {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => {}
            }
        }
        claim.status_mut().binding_phase = BindingPhase::Unbound;
        Ok(())
    }
}

pub struct ClaimBindingReconciler<C: Claim, K: Class, M: Managed> {
    claims: Arc<Store<C>>,
    classes: Arc<Store<K>>,
    managed: Arc<Store<M>>,
    secrets: Arc<Store<Secret>>,
    new_managed: ManagedFactory<M>,
    configurators: Vec<Arc<dyn ManagedConfigurator<C, K, M>>>,
    binder: Arc<dyn Binder<C, M>>,
}

impl<C: Claim, K: Class, M: Managed> ClaimBindingReconciler<C, K, M> {
    pub fn new(
        claims: Arc<Store<C>>,
        classes: Arc<Store<K>>,
        managed: Arc<Store<M>>,
        secrets: Arc<Store<Secret>>,
        new_managed: ManagedFactory<M>,
    ) -> Self {
        let binder = Arc::new(ApiBinder::new(Arc::clone(&managed)));
        Self {
            claims,
            classes,
            managed,
            secrets,
            new_managed,
            configurators: Vec::new(),
            binder,
        }
    }

    /// Configurators run in the order they were added.
    pub fn with_configurator(mut self, configurator: Arc<dyn ManagedConfigurator<C, K, M>>) -> Self {
        self.configurators.push(configurator);
        self
    }

    pub fn with_binder(mut self, binder: Arc<dyn Binder<C, M>>) -> Self {
        self.binder = binder;
        self
    }

    async fn fail(&self, mut claim: C, err: Error) -> Result<Action> {
        claim.set_conditions([Condition::reconcile_error(&err)]);
        if let Err(store_err) = self.claims.update(claim).await {
            warn!(error = %store_err, "Cannot persist claim reconcile error");
        }
        Err(err)
    }

    /// Managed resource left behind by an earlier tick that created it but
    /// failed to record it on the claim.
    async fn find_provisioned(&self, claim_ref: &ObjectRef) -> Option<M> {
        self.managed.list().await.into_iter().find(|mg| {
            !mg.meta().is_deleting() && mg.resource_spec().claim_ref.as_ref() == Some(claim_ref)
        })
    }

    /// Create a managed resource for a claim from the class it references.
    async fn provision(&self, mut claim: C) -> Result<Action> {
        let Some(class_ref) = claim.claim_spec().class_ref.clone() else {
            return Ok(Action::await_change());
        };

        let claim_ref = claim.object_ref();
        if let Some(existing) = self.find_provisioned(&claim_ref).await {
            info!(
                claim = %claim_ref,
                managed = %existing.object_ref(),
                "Adopting previously provisioned managed resource"
            );
            claim.claim_spec_mut().resource_ref = Some(existing.object_ref());
            claim.set_conditions([Condition::creating(), Condition::reconcile_success()]);
            self.claims.update(claim).await?;
            return Ok(Action::await_change());
        }

        let class = match self.classes.get(&class_ref).await {
            Ok(class) => class,
            Err(e) => return self.fail(claim, Error::lookup("resource class", &class_ref, e)).await,
        };

        let mut managed = (self.new_managed)();
        for configurator in &self.configurators {
            if let Err(e) = configurator.configure(&claim, &class, &mut managed) {
                return self.fail(claim, e).await;
            }
        }
        let spec = managed.resource_spec_mut();
        spec.claim_ref = Some(claim_ref.clone());
        spec.class_ref = Some(class_ref.clone());

        let managed = match self.managed.create(managed).await {
            Ok(managed) => managed,
            Err(e) => return self.fail(claim, e).await,
        };
        info!(
            claim = %claim_ref,
            class = %class_ref,
            managed = %managed.object_ref(),
            "Provisioned managed resource"
        );

        claim.claim_spec_mut().resource_ref = Some(managed.object_ref());
        claim.set_conditions([Condition::creating(), Condition::reconcile_success()]);
        self.claims.update(claim).await?;
        Ok(Action::await_change())
    }

    /// Copy the managed resource's connection secret next to the claim.
    async fn propagate_connection(&self, claim: &C, managed: &M) -> Result<()> {
        let Some(from) = &managed.resource_spec().write_connection_secret_to_ref else {
            return Ok(());
        };
        let from_key = Secret::key_ref(&from.namespace, &from.name);
        let source = self
            .secrets
            .get(&from_key)
            .await
            .map_err(|e| Error::lookup("managed connection secret", &from_key, e))?;

        let to_key = self.claim_secret_key(claim, &from.namespace);
        match self.secrets.try_get(&to_key).await {
            Some(mut target) => {
                if target.data != source.data {
                    target.data = source.data;
                    self.secrets.update(target).await?;
                    debug!(secret = %to_key, "Refreshed claim connection secret");
                }
            }
            None => {
                let namespace = to_key.namespace.as_deref().unwrap_or_default();
                let mut target = Secret::new(namespace, &to_key.name);
                target
                    .metadata
                    .annotations
                    .insert(OWNER_ANNOTATION.to_string(), claim.object_ref().to_string());
                target.data = source.data;
                self.secrets.create(target).await?;
                debug!(secret = %to_key, "Created claim connection secret");
            }
        }
        Ok(())
    }

    fn claim_secret_key(&self, claim: &C, fallback_namespace: &str) -> ObjectRef {
        let meta = claim.meta();
        let namespace = meta.namespace.as_deref().unwrap_or(fallback_namespace);
        let name = claim
            .claim_spec()
            .write_connection_secret_to_ref
            .as_ref()
            .map_or(meta.name.as_str(), |r| r.name.as_str());
        Secret::key_ref(namespace, name)
    }

    /// Unbind a deleted claim and release its finalizer.
    async fn release(&self, mut claim: C) -> Result<Action> {
        let claim_ref = claim.object_ref();
        if let Some(resource_ref) = claim.claim_spec().resource_ref.clone() {
            if let Some(mut managed) = self.managed.try_get(&resource_ref).await {
                if managed.resource_spec().claim_ref.as_ref() == Some(&claim_ref) {
                    if let Err(e) = self.binder.unbind(&mut claim, &mut managed).await {
                        return self.fail(claim, e).await;
                    }
                    info!(claim = %claim_ref, managed = %resource_ref, "Unbound managed resource");
                }
            }
        }

        let fallback = claim.meta().namespace.clone().unwrap_or_default();
        let secret_key = self.claim_secret_key(&claim, &fallback);
        let owned = self.secrets.try_get(&secret_key).await.is_some_and(|s| {
            s.metadata.annotations.get(OWNER_ANNOTATION) == Some(&claim_ref.to_string())
        });
        if owned {
            match self.secrets.delete(&secret_key).await {
                Err(e) if !e.is_not_found() => return self.fail(claim, e).await,
                _ => {}
            }
        }

        claim.meta_mut().remove_finalizer(CLAIM_FINALIZER);
        self.claims.update(claim).await?;
        Ok(Action::await_change())
    }
}

#[async_trait]
impl<C: Claim, K: Class, M: Managed> Reconciler for ClaimBindingReconciler<C, K, M> {
    async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let Some(mut claim) = self.claims.try_get(key).await else {
            return Ok(Action::await_change());
        };

        if claim.meta().is_deleting() {
            return self.release(claim).await;
        }

        if claim.meta_mut().add_finalizer(CLAIM_FINALIZER) {
            claim = self.claims.update(claim).await?;
        }

        let Some(resource_ref) = claim.claim_spec().resource_ref.clone() else {
            return self.provision(claim).await;
        };

        let mut managed = match self.managed.get(&resource_ref).await {
            Ok(managed) => managed,
            Err(e) => {
                return self
                    .fail(claim, Error::lookup("managed resource", &resource_ref, e))
                    .await;
            }
        };

        if let Some(owner) = &managed.resource_spec().claim_ref {
            if *owner != claim.object_ref() {
                let err = Error::Invalid(format!("{} is bound to {}", resource_ref, owner));
                return self.fail(claim, err).await;
            }
        }

        if !managed.status().is_available() {
            debug!(claim = %key, managed = %resource_ref, "Managed resource not yet available");
            claim.set_conditions([Condition::creating(), Condition::reconcile_success()]);
            self.claims.update(claim).await?;
            return Ok(Action::await_change());
        }

        if let Err(e) = self.propagate_connection(&claim, &managed).await {
            return self.fail(claim, e).await;
        }
        let was_bound = claim.binding_phase() == BindingPhase::Bound;
        if let Err(e) = self.binder.bind(&mut claim, &mut managed).await {
            return self.fail(claim, e).await;
        }
        if !was_bound {
            info!(claim = %key, managed = %resource_ref, "Bound claim");
        }

        claim.set_conditions([Condition::available(), Condition::reconcile_success()]);
        self.claims.update(claim).await?;
        Ok(Action::await_change())
    }
}
