//! In-memory record store with watch events.
//!
//! The store gives each record kind the same semantics the reconcilers rely on:
//! - optimistic concurrency via `resource_version`
//! - deletion that waits for finalizers to be released
//! - a broadcast of every change to subscribers

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::{Error, Result};
use crate::meta::{Object, ObjectRef};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Change notification for one record.
#[derive(Debug, Clone)]
pub enum StoreEvent<T> {
    /// Created or updated. Records with a deletion timestamp are also reported here.
    Applied(T),
    /// Removed from the store.
    Deleted(T),
}

impl<T: Object> StoreEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            StoreEvent::Applied(o) | StoreEvent::Deleted(o) => o,
        }
    }
}

/// Watchable store for one record type.
pub struct Store<T: Object> {
    objects: RwLock<HashMap<ObjectRef, T>>,
    events: broadcast::Sender<StoreEvent<T>>,
}

impl<T: Object> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Object> Store<T> {
    pub fn new() -> Self {
        Self::with_event_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Store whose watchers lag once more than `capacity` events are unread.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            objects: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent<T>> {
        self.events.subscribe()
    }

    pub async fn get(&self, key: &ObjectRef) -> Result<T> {
        self.try_get(key)
            .await
            .ok_or_else(|| Error::not_found(&key.kind, key))
    }

    pub async fn try_get(&self, key: &ObjectRef) -> Option<T> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<T> {
        self.objects.read().await.values().cloned().collect()
    }

    /// Insert a new record. Assigns uid, creation time and the first resource version.
    pub async fn create(&self, mut obj: T) -> Result<T> {
        let key = obj.object_ref();
        if key.name.is_empty() {
            return Err(Error::Invalid(format!("{} has no name", key.kind)));
        }

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(Error::Conflict {
                key: key.to_string(),
                reason: "already exists".to_string(),
            });
        }

        let meta = obj.meta_mut();
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;
        meta.resource_version = 1;

        objects.insert(key.clone(), obj.clone());
        drop(objects);

        debug!(record = %key, "Created record");
        let _ = self.events.send(StoreEvent::Applied(obj.clone()));
        Ok(obj)
    }

    /// Replace an existing record.
    ///
    /// Fails with `Conflict` if the caller's resource version is stale. A record
    /// marked for deletion whose last finalizer is released is removed.
    pub async fn update(&self, mut obj: T) -> Result<T> {
        let key = obj.object_ref();
        let mut objects = self.objects.write().await;
        let current = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(&key.kind, &key))?;

        let current_meta = current.meta();
        if current_meta.resource_version != obj.meta().resource_version {
            return Err(Error::Conflict {
                key: key.to_string(),
                reason: format!(
                    "resource version {} is stale, current is {}",
                    obj.meta().resource_version,
                    current_meta.resource_version
                ),
            });
        }

        // Identity and lifecycle fields are owned by the store.
        let uid = current_meta.uid.clone();
        let created = current_meta.creation_timestamp;
        let deleting = current_meta.deletion_timestamp;
        let meta = obj.meta_mut();
        meta.uid = uid;
        meta.creation_timestamp = created;
        meta.deletion_timestamp = deleting;

        // Unchanged records are not written and produce no event.
        if *current == obj {
            return Ok(obj);
        }
        obj.meta_mut().resource_version += 1;
        let meta = obj.meta();

        if meta.is_deleting() && meta.finalizers.is_empty() {
            objects.remove(&key);
            drop(objects);
            debug!(record = %key, "Finalizers released, removed record");
            let _ = self.events.send(StoreEvent::Deleted(obj.clone()));
            return Ok(obj);
        }

        objects.insert(key, obj.clone());
        drop(objects);

        let _ = self.events.send(StoreEvent::Applied(obj.clone()));
        Ok(obj)
    }

    /// Request deletion. Records without finalizers are removed immediately,
    /// others get a deletion timestamp and stay until their finalizers are gone.
    pub async fn delete(&self, key: &ObjectRef) -> Result<()> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| Error::not_found(&key.kind, key))?;

        if obj.meta().finalizers.is_empty() {
            let removed = objects.remove(key);
            drop(objects);
            debug!(record = %key, "Deleted record");
            if let Some(removed) = removed {
                let _ = self.events.send(StoreEvent::Deleted(removed));
            }
            return Ok(());
        }

        if obj.meta().is_deleting() {
            return Ok(());
        }

        let meta = obj.meta_mut();
        meta.deletion_timestamp = Some(Utc::now());
        meta.resource_version += 1;
        let snapshot = obj.clone();
        drop(objects);

        debug!(record = %key, "Marked record for deletion");
        let _ = self.events.send(StoreEvent::Applied(snapshot));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::meta::{Gvk, ObjectMeta};

    pub const WIDGET: Gvk = Gvk::new("test.nimbus.io", "v1", "Widget");

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Widget {
        pub meta: ObjectMeta,
        pub size: u32,
    }

    impl Object for Widget {
        fn gvk(&self) -> Gvk {
            WIDGET
        }
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    pub fn widget(name: &str) -> Widget {
        Widget {
            meta: ObjectMeta::named(Some("default"), name),
            size: 1,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = Store::new();
        let created = store.create(widget("a")).await.unwrap();
        assert!(!created.meta.uid.is_empty());
        assert_eq!(created.meta.resource_version, 1);
        assert!(created.meta.creation_timestamp.is_some());

        let err = store.create(widget("a")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = Store::new();
        let created = store.create(widget("a")).await.unwrap();

        let mut first = created.clone();
        first.size = 2;
        let updated = store.update(first).await.unwrap();
        assert_eq!(updated.meta.resource_version, 2);

        let mut stale = created;
        stale.size = 3;
        let err = store.update(stale).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(store.get(&updated.object_ref()).await.unwrap().size, 2);
    }

    #[tokio::test]
    async fn test_unchanged_update_is_silent() {
        let store = Store::new();
        let created = store.create(widget("a")).await.unwrap();
        let mut events = store.subscribe();

        let same = store.update(created.clone()).await.unwrap();
        assert_eq!(same.meta.resource_version, 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = Store::new();
        let mut w = widget("a");
        w.meta.add_finalizer("test/finalizer");
        let created = store.create(w).await.unwrap();
        let key = created.object_ref();

        store.delete(&key).await.unwrap();
        let mut marked = store.get(&key).await.unwrap();
        assert!(marked.meta.is_deleting());

        marked.meta.remove_finalizer("test/finalizer");
        store.update(marked).await.unwrap();
        assert!(store.try_get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_removes() {
        let store = Store::new();
        let mut events = store.subscribe();
        let created = store.create(widget("a")).await.unwrap();
        store.delete(&created.object_ref()).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), StoreEvent::Applied(_)));
        assert!(matches!(events.recv().await.unwrap(), StoreEvent::Deleted(_)));
        assert!(store.get(&created.object_ref()).await.unwrap_err().is_not_found());
    }
}
