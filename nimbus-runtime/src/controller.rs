//! Controllers: watch sources feeding a work queue drained by a worker pool.
//!
//! A controller owns the retry policy and the per-record exclusivity, so
//! reconcilers only express what one reconcile tick of a record does.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::meta::{Object, ObjectRef};
use crate::queue::{Lease, WorkQueue};
use crate::retry::{RetryTracker, compute_backoff};
use crate::store::Store;

/// What to do with a record after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Reconcile again after the given delay.
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    /// Do nothing until a watched record changes.
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// One reconcile tick for one record identity.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ObjectRef) -> Result<Action>;
}

/// Event filter applied to watched records.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Maps a watched record to the identity that should be reconciled.
pub type Mapper<T> = Arc<dyn Fn(&T) -> Option<ObjectRef> + Send + Sync>;

/// Runtime options for a controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Number of concurrent workers. Distinct records only.
    pub workers: usize,
    /// Interval at which every watched record is enqueued again.
    pub resync_period: Duration,
    /// Upper bound for one reconcile tick.
    pub reconcile_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_period: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
trait Source: Send + Sync {
    async fn run(
        self: Arc<Self>,
        queue: Arc<WorkQueue<ObjectRef>>,
        shutdown: watch::Receiver<bool>,
        resync: Duration,
    );

    /// Identities the watched records currently map to.
    async fn keys(&self) -> Vec<ObjectRef>;
}

struct Watch<T: Object> {
    store: Arc<Store<T>>,
    filter: Predicate<T>,
    map: Mapper<T>,
}

impl<T: Object> Watch<T> {
    fn key_of(&self, obj: &T) -> Option<ObjectRef> {
        if !(self.filter)(obj) {
            return None;
        }
        (self.map)(obj)
    }

    fn offer(&self, queue: &WorkQueue<ObjectRef>, obj: &T) {
        if let Some(key) = self.key_of(obj) {
            queue.enqueue(key);
        }
    }

    async fn relist(&self, queue: &WorkQueue<ObjectRef>) {
        for obj in self.store.list().await {
            self.offer(queue, &obj);
        }
    }
}

#[async_trait]
impl<T: Object> Source for Watch<T> {
    async fn run(
        self: Arc<Self>,
        queue: Arc<WorkQueue<ObjectRef>>,
        mut shutdown: watch::Receiver<bool>,
        resync: Duration,
    ) {
        // Subscribe before listing so nothing between the two is missed.
        let mut events = self.store.subscribe();
        self.relist(&queue).await;

        let mut ticker = tokio::time::interval_at(Instant::now() + resync, resync);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => self.relist(&queue).await,
                event = events.recv() => match event {
                    Ok(event) => self.offer(&queue, event.object()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch lagged behind, relisting");
                        self.relist(&queue).await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    async fn keys(&self) -> Vec<ObjectRef> {
        let objects = self.store.list().await;
        objects.iter().filter_map(|obj| self.key_of(obj)).collect()
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone
/// without signalling.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Wires watch sources to a reconciler.
pub struct Controller {
    name: String,
    reconciler: Arc<dyn Reconciler>,
    sources: Vec<Arc<dyn Source>>,
    options: ControllerOptions,
}

impl Controller {
    pub fn new(name: impl Into<String>, reconciler: Arc<dyn Reconciler>) -> Self {
        Self {
            name: name.into(),
            reconciler,
            sources: Vec::new(),
            options: ControllerOptions::default(),
        }
    }

    /// Reconcile records of this store that pass the filter.
    pub fn for_store<T: Object>(mut self, store: Arc<Store<T>>, filter: Predicate<T>) -> Self {
        self.sources.push(Arc::new(Watch {
            store,
            filter,
            map: Arc::new(|obj: &T| Some(obj.object_ref())),
        }));
        self
    }

    /// Reconcile the records that changes to another store map to.
    pub fn watches<T: Object>(
        mut self,
        store: Arc<Store<T>>,
        filter: Predicate<T>,
        map: Mapper<T>,
    ) -> Self {
        self.sources.push(Arc::new(Watch { store, filter, map }));
        self
    }

    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until shutdown is signalled. In-flight reconciles are cancelled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Controller {
            name,
            reconciler,
            sources,
            options,
        } = self;
        let name: Arc<str> = name.into();
        let queue = Arc::new(WorkQueue::new());
        let retries = Arc::new(RetryTracker::new());

        info!(controller = %name, workers = options.workers, "Starting controller");

        let mut tasks = JoinSet::new();
        for source in &sources {
            tasks.spawn(Arc::clone(source).run(
                Arc::clone(&queue),
                shutdown.clone(),
                options.resync_period,
            ));
        }
        tasks.spawn(prune_retries(
            sources,
            Arc::clone(&retries),
            shutdown.clone(),
            options.resync_period,
        ));

        for _ in 0..options.workers.max(1) {
            let worker = Worker {
                controller: Arc::clone(&name),
                reconciler: Arc::clone(&reconciler),
                queue: Arc::clone(&queue),
                retries: Arc::clone(&retries),
                timeout: options.reconcile_timeout,
            };
            tasks.spawn(worker.run(shutdown.clone()));
        }

        wait_for_shutdown(&mut shutdown).await;
        queue.shutdown();
        while tasks.join_next().await.is_some() {}

        info!(controller = %name, "Controller stopped");
    }
}

/// Drops retry state of identities no source maps to anymore, once per resync.
async fn prune_retries(
    sources: Vec<Arc<dyn Source>>,
    retries: Arc<RetryTracker>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = ticker.tick() => {
                let mut active = HashSet::new();
                for source in &sources {
                    active.extend(source.keys().await.iter().map(ObjectRef::to_string));
                }
                retries.cleanup(&active).await;
            }
        }
    }
}

/// Runs a set of controllers until shutdown.
#[derive(Default)]
pub struct Manager {
    controllers: Vec<Controller>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, controller: Controller) -> &mut Self {
        self.controllers.push(controller);
        self
    }

    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(Controller::name).collect()
    }

    /// Start every controller and wait until all of them have stopped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(controllers = self.controllers.len(), "Starting manager");
        let mut tasks = JoinSet::new();
        for controller in self.controllers {
            tasks.spawn(controller.run(shutdown.clone()));
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Controller task failed");
            }
        }
        info!("Manager stopped");
    }
}

struct Worker {
    controller: Arc<str>,
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue<ObjectRef>>,
    retries: Arc<RetryTracker>,
    timeout: Duration,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        while let Some(lease) = self.queue.acquire().await {
            self.process(lease, &mut shutdown).await;
        }
    }

    async fn process(&self, lease: Lease<ObjectRef>, shutdown: &mut watch::Receiver<bool>) {
        let key = lease.key().clone();
        let started = Instant::now();

        let result = tokio::select! {
            _ = wait_for_shutdown(shutdown) => Err(Error::Cancelled),
            r = tokio::time::timeout(self.timeout, self.reconciler.reconcile(&key)) => {
                r.unwrap_or(Err(Error::Timeout(self.timeout)))
            }
        };

        let retry_key = key.to_string();
        let action = match result {
            Ok(action) => {
                self.retries.reset(&retry_key).await;
                debug!(
                    controller = %self.controller,
                    record = %key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    requeue_after = ?action.requeue_after(),
                    "Reconciled"
                );
                action
            }
            Err(Error::Cancelled) => return,
            Err(e) => {
                let attempt = self.retries.increment(&retry_key).await;
                warn!(
                    controller = %self.controller,
                    record = %key,
                    attempt,
                    error = %e,
                    "Reconcile failed"
                );
                compute_backoff(attempt, e.kind())
            }
        };

        // Release the key before scheduling so a zero delay is not swallowed.
        drop(lease);
        if let Some(after) = action.requeue_after() {
            if after.is_zero() {
                self.queue.enqueue(key);
            } else {
                self.queue.enqueue_after(key, after);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{WIDGET, Widget, widget};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReconciler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Reconciler for CountingReconciler {
        async fn reconcile(&self, _key: &ObjectRef) -> Result<Action> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Invalid("always fails".to_string()));
            }
            Ok(Action::await_change())
        }
    }

    /// Never finishes a reconcile.
    #[derive(Default)]
    struct HangingReconciler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for HangingReconciler {
        async fn reconcile(&self, _key: &ObjectRef) -> Result<Action> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<Result<Action>>().await
        }
    }

    #[derive(Default)]
    struct RecordingReconciler {
        seen: Mutex<HashSet<String>>,
    }

    impl RecordingReconciler {
        fn seen(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Reconciler for RecordingReconciler {
        async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
            self.seen.lock().unwrap().insert(key.name.clone());
            Ok(Action::await_change())
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_controller_reconciles_filtered_records() {
        let store = Arc::new(Store::new());
        store.create(widget("big")).await.unwrap();
        let mut small = widget("small");
        small.size = 0;
        store.create(small).await.unwrap();

        let reconciler = Arc::new(CountingReconciler {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let (tx, rx) = watch::channel(false);
        let controller = Controller::new("widgets", reconciler.clone())
            .for_store(Arc::clone(&store), Arc::new(|w: &Widget| w.size > 0));
        let handle = tokio::spawn(controller.run(rx));

        wait_until(|| reconciler.calls.load(Ordering::SeqCst) == 1).await;

        // A change to a matching record triggers another tick.
        store.create(widget("other")).await.unwrap();
        wait_until(|| reconciler.calls.load(Ordering::SeqCst) == 2).await;

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let store = Arc::new(Store::new());
        store.create(widget("a")).await.unwrap();

        let reconciler = Arc::new(CountingReconciler {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let (tx, rx) = watch::channel(false);
        let controller = Controller::new("widgets", reconciler.clone())
            .for_store(Arc::clone(&store), Arc::new(|_: &Widget| true));
        let handle = tokio::spawn(controller.run(rx));

        wait_until(|| reconciler.calls.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_manager_stops_all_controllers() {
        let store = Arc::new(Store::new());
        store.create(widget("a")).await.unwrap();

        let first = Arc::new(CountingReconciler {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let second = Arc::new(CountingReconciler {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let mut manager = Manager::new();
        manager
            .add(
                Controller::new("first", first.clone())
                    .for_store(Arc::clone(&store), Arc::new(|_: &Widget| true)),
            )
            .add(
                Controller::new("second", second.clone())
                    .for_store(Arc::clone(&store), Arc::new(|_: &Widget| true)),
            );
        assert_eq!(manager.controller_names(), vec!["first", "second"]);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(manager.run(rx));
        wait_until(|| {
            first.calls.load(Ordering::SeqCst) == 1 && second.calls.load(Ordering::SeqCst) == 1
        })
        .await;

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_reconcile_times_out_and_retries() {
        let store = Arc::new(Store::new());
        store.create(widget("a")).await.unwrap();

        let reconciler = Arc::new(HangingReconciler::default());
        let (tx, rx) = watch::channel(false);
        let controller = Controller::new("widgets", reconciler.clone())
            .for_store(Arc::clone(&store), Arc::new(|_: &Widget| true))
            .with_options(ControllerOptions {
                workers: 1,
                reconcile_timeout: Duration::from_millis(50),
                ..Default::default()
            });
        let handle = tokio::spawn(controller.run(rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 1);

        // A timeout is transient: the first retry follows after 5s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_reconcile() {
        let store = Arc::new(Store::new());
        store.create(widget("a")).await.unwrap();

        let reconciler = Arc::new(HangingReconciler::default());
        let (tx, rx) = watch::channel(false);
        let controller = Controller::new("widgets", reconciler.clone())
            .for_store(Arc::clone(&store), Arc::new(|_: &Widget| true));
        let handle = tokio::spawn(controller.run(rx));

        wait_until(|| reconciler.calls.load(Ordering::SeqCst) == 1).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("controller did not stop")
            .unwrap();
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lagged_watch_relists() {
        let store = Arc::new(Store::with_event_capacity(2));
        store.create(widget("first")).await.unwrap();

        let reconciler = Arc::new(RecordingReconciler::default());
        let (tx, rx) = watch::channel(false);
        let controller = Controller::new("widgets", reconciler.clone())
            .for_store(Arc::clone(&store), Arc::new(|_: &Widget| true));
        let handle = tokio::spawn(controller.run(rx));
        wait_until(|| reconciler.seen() == 1).await;

        // More changes than the event channel holds, without yielding to the watch.
        for i in 0..10 {
            store.create(widget(&format!("w{i}"))).await.unwrap();
        }
        wait_until(|| reconciler.seen() == 11).await;

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_keys_follow_filter_and_map() {
        let store = Arc::new(Store::new());
        store.create(widget("big")).await.unwrap();
        let mut small = widget("small");
        small.size = 0;
        store.create(small).await.unwrap();

        let source = Watch {
            store,
            filter: Arc::new(|w: &Widget| w.size > 0),
            map: Arc::new(|w: &Widget| {
                Some(ObjectRef::new(WIDGET, None, &format!("owner-{}", w.meta.name)))
            }),
        };
        assert_eq!(source.keys().await, vec![ObjectRef::new(WIDGET, None, "owner-big")]);
    }

    #[test]
    fn test_action_constructors() {
        assert_eq!(
            Action::requeue(Duration::from_secs(3)).requeue_after(),
            Some(Duration::from_secs(3))
        );
        assert_eq!(Action::await_change().requeue_after(), None);
    }
}
