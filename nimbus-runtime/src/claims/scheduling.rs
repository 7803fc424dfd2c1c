//! Picks a class for claims that select classes by label.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::condition::Condition;
use crate::controller::{Action, Reconciler};
use crate::error::{Error, Result};
use crate::managed::DEFAULT_LONG_WAIT;
use crate::meta::{Object, ObjectRef};
use crate::resource::{Claim, Class};
use crate::store::Store;

pub struct ClaimSchedulingReconciler<C: Claim, K: Class> {
    claims: Arc<Store<C>>,
    classes: Arc<Store<K>>,
    long_wait: Duration,
    _kinds: PhantomData<fn() -> (C, K)>,
}

impl<C: Claim, K: Class> ClaimSchedulingReconciler<C, K> {
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
impl<C: Claim, K: Class> Reconciler for ClaimSchedulingReconciler<C, K> {
    async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let Some(mut claim) = self.claims.try_get(key).await else {
            return Ok(Action::await_change());
        };
        let spec = claim.claim_spec();
        if spec.class_ref.is_some() || spec.resource_ref.is_some() {
            return Ok(Action::await_change());
        }
        let Some(selector) = spec.class_selector.clone() else {
            return Ok(Action::await_change());
        };

        let matching: Vec<ObjectRef> = self
            .classes
            .list()
            .await
            .iter()
            .filter(|class| selector.matches(&class.meta().labels))
            .map(Object::object_ref)
            .collect();
        let chosen = matching.choose(&mut rand::thread_rng()).cloned();

        let Some(class_ref) = chosen else {
            debug!(claim = %key, selector = %selector, "No class matches selector");
            let err = Error::not_found("resource class", format!("matching {}", selector));
            claim.set_conditions([Condition::reconcile_error(&err)]);
            self.claims.update(claim).await?;
            return Ok(Action::requeue(self.long_wait));
        };

        info!(claim = %key, class = %class_ref, candidates = matching.len(), "Scheduled claim");
        claim.claim_spec_mut().class_ref = Some(class_ref);
        claim.set_conditions([Condition::reconcile_success()]);
        self.claims.update(claim).await?;
        Ok(Action::await_change())
    }
}
