//! Assigns the default class to claims that name no class at all.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::condition::Condition;
use crate::controller::{Action, Reconciler};
use crate::error::{Error, Result};
use crate::managed::DEFAULT_LONG_WAIT;
use crate::meta::{Object, ObjectRef};
use crate::resource::{Claim, Class};
use crate::store::Store;

pub struct ClaimDefaultingReconciler<C: Claim, K: Class> {
    claims: Arc<Store<C>>,
    classes: Arc<Store<K>>,
    long_wait: Duration,
    _kinds: PhantomData<fn() -> (C, K)>,
}

impl<C: Claim, K: Class> ClaimDefaultingReconciler<C, K> {
    pub fn new(claims: Arc<Store<C>>, classes: Arc<Store<K>>) -> Self {
        Self {
            claims,
            classes,
            long_wait: DEFAULT_LONG_WAIT,
            _kinds: PhantomData,
        }
    }

    pub fn with_long_wait(mut self, long_wait: Duration) -> Self {
        self.long_wait = long_wait;
        self
    }
}

#[async_trait]
impl<C: Claim, K: Class> Reconciler for ClaimDefaultingReconciler<C, K> {
    async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let Some(mut claim) = self.claims.try_get(key).await else {
            return Ok(Action::await_change());
        };
        let spec = claim.claim_spec();
        if spec.class_selector.is_some() || spec.class_ref.is_some() || spec.resource_ref.is_some() {
            return Ok(Action::await_change());
        }

        let defaults: Vec<ObjectRef> = self
            .classes
            .list()
            .await
            .iter()
            .filter(|class| class.is_default())
            .map(Object::object_ref)
            .collect();

        // Zero or several defaults is ambiguous; leave the claim alone.
        let [class_ref] = defaults.as_slice() else {
            debug!(claim = %key, defaults = defaults.len(), "No unique default class");
            let err = Error::Invalid(format!(
                "expected exactly one default class, found {}",
                defaults.len()
            ));
            claim.set_conditions([Condition::reconcile_error(&err)]);
            self.claims.update(claim).await?;
            return Ok(Action::requeue(self.long_wait));
        };

        info!(claim = %key, class = %class_ref, "Defaulted claim class");
        claim.claim_spec_mut().class_ref = Some(class_ref.clone());
        claim.set_conditions([Condition::reconcile_success()]);
        self.claims.update(claim).await?;
        Ok(Action::await_change())
    }
}
