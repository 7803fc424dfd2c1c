//! Generic reconciler for managed resources.
//!
//! One tick: connect, observe, then create, update or delete the external
//! resource depending on what was observed and whether the record is being
//! deleted. Retry and backoff belong to the calling controller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::condition::Condition;
use crate::connection::ConnectionPublisher;
use crate::controller::{Action, Reconciler};
use crate::error::{Error, Result};
use crate::external::{ConnectionDetails, Connecter};
use crate::meta::{Object, ObjectRef};
use crate::resource::{MANAGED_FINALIZER, Managed, ReclaimPolicy};
use crate::store::Store;

/// Wait before observing again after an external change was requested.
pub const DEFAULT_SHORT_WAIT: Duration = Duration::from_secs(30);

/// Wait before checking an up-to-date resource for drift again.
pub const DEFAULT_LONG_WAIT: Duration = Duration::from_secs(60);

pub struct ManagedReconciler<M: Managed> {
    store: Arc<Store<M>>,
    connecter: Arc<dyn Connecter<M>>,
    publishers: Vec<Arc<dyn ConnectionPublisher<M>>>,
    short_wait: Duration,
    long_wait: Duration,
}

impl<M: Managed> ManagedReconciler<M> {
    pub fn new(store: Arc<Store<M>>, connecter: Arc<dyn Connecter<M>>) -> Self {
        Self {
            store,
            connecter,
            publishers: Vec::new(),
            short_wait: DEFAULT_SHORT_WAIT,
            long_wait: DEFAULT_LONG_WAIT,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ConnectionPublisher<M>>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn with_waits(mut self, short_wait: Duration, long_wait: Duration) -> Self {
        self.short_wait = short_wait;
        self.long_wait = long_wait;
        self
    }

    async fn publish(&self, mg: &M, details: &ConnectionDetails) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(mg, details).await?;
        }
        Ok(())
    }

    async fn unpublish(&self, mg: &M) -> Result<()> {
        for publisher in &self.publishers {
            publisher.unpublish(mg).await?;
        }
        Ok(())
    }

    /// Record the error on the record and hand it back to the controller.
    async fn fail(&self, mut mg: M, err: Error) -> Result<Action> {
        mg.set_conditions([Condition::reconcile_error(&err)]);
        if let Err(store_err) = self.store.update(mg).await {
            warn!(error = %store_err, "Cannot persist reconcile error");
        }
        Err(err)
    }

    /// Release the record once the external resource is handled.
    async fn finalize(&self, mut mg: M) -> Result<Action> {
        if let Err(e) = self.unpublish(&mg).await {
            return self.fail(mg, e).await;
        }
        let key = mg.object_ref();
        mg.meta_mut().remove_finalizer(MANAGED_FINALIZER);
        self.store.update(mg).await?;
        info!(record = %key, "Released managed resource");
        Ok(Action::await_change())
    }
}

#[async_trait]
impl<M: Managed> Reconciler for ManagedReconciler<M> {
    async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let mut mg = match self.store.get(key).await {
            Ok(mg) => mg,
            Err(e) if e.is_not_found() => {
                debug!(record = %key, "Managed resource is gone");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };

        let external = match self.connecter.connect(&mg).await {
            Ok(external) => external,
            Err(e) => return self.fail(mg, e).await,
        };

        let observation = match external.observe(&mut mg).await {
            Ok(observation) => observation,
            Err(e) => return self.fail(mg, e).await,
        };

        if mg.meta().is_deleting() {
            if !mg.meta().has_finalizer(MANAGED_FINALIZER) {
                return Ok(Action::await_change());
            }
            if observation.resource_exists
                && mg.resource_spec().reclaim_policy == ReclaimPolicy::Delete
            {
                if let Err(e) = external.delete(&mut mg).await {
                    return self.fail(mg, e).await;
                }
                info!(record = %key, "Requested deletion of external resource");
                mg.set_conditions([Condition::reconcile_success()]);
                self.store.update(mg).await?;
                // Observe again until the resource is gone.
                return Ok(Action::requeue(self.short_wait));
            }
            return self.finalize(mg).await;
        }

        if let Err(e) = self.publish(&mg, &observation.connection_details).await {
            return self.fail(mg, e).await;
        }

        if mg.meta_mut().add_finalizer(MANAGED_FINALIZER) {
            mg = self.store.update(mg).await?;
        }

        if !observation.resource_exists {
            let creation = match external.create(&mut mg).await {
                Ok(creation) => creation,
                Err(e) => return self.fail(mg, e).await,
            };
            if let Err(e) = self.publish(&mg, &creation.connection_details).await {
                return self.fail(mg, e).await;
            }
            info!(record = %key, "Created external resource");
            mg.set_conditions([Condition::reconcile_success()]);
            self.store.update(mg).await?;
            return Ok(Action::requeue(self.short_wait));
        }

        let update = match external.update(&mut mg).await {
            Ok(update) => update,
            Err(e) => return self.fail(mg, e).await,
        };
        if let Err(e) = self.publish(&mg, &update.connection_details).await {
            return self.fail(mg, e).await;
        }

        mg.set_conditions([Condition::reconcile_success()]);
        self.store.update(mg).await?;
        Ok(Action::requeue(self.long_wait))
    }
}
