//! In-process resource store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{ResourceStore, Result, StoreError, WatchEvent, WatchStream};
use crate::resource::{
    object_key, AnyResource, Layer, Repository, ResourceKind, Run, StoreObject,
    DEFAULT_NAMESPACE,
};

/// Default capacity of each per-kind event channel.
pub const DEFAULT_WATCH_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    objects: HashMap<ResourceKind, BTreeMap<String, AnyResource>>,
    last_version: u64,
}

impl Inner {
    fn bucket(&mut self, kind: ResourceKind) -> &mut BTreeMap<String, AnyResource> {
        self.objects.entry(kind).or_default()
    }

    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

/// Resource store kept in memory, with one bounded event channel per kind.
///
/// Writes publish their event while still holding the write lock, so a
/// watcher that lists and subscribes under the read lock never misses or
/// double-sees a change.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    channels: HashMap<ResourceKind, broadcast::Sender<WatchEvent>>,
}

impl InMemoryStore {
    /// Creates an empty store with the default watch capacity.
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Creates a store whose event channels hold `capacity` events. Watchers
    /// that fall further behind observe a lag and must relist.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let channels = ResourceKind::all()
            .iter()
            .map(|kind| (*kind, broadcast::channel(capacity).0))
            .collect();
        Self {
            inner: RwLock::new(Inner::default()),
            channels,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn publish(&self, event: WatchEvent) {
        if let Some(sender) = self.channels.get(&event.resource().kind()) {
            // No watchers is fine
            let _ = sender.send(event);
        }
    }

    fn get_typed<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K> {
        let key = object_key(namespace, name);
        let inner = self.read();
        inner
            .objects
            .get(&K::KIND)
            .and_then(|bucket| bucket.get(&key))
            .cloned()
            .and_then(K::from_any)
            .ok_or(StoreError::NotFound { kind: K::KIND, key })
    }

    fn list_typed<K: StoreObject>(&self) -> Vec<K> {
        let inner = self.read();
        inner
            .objects
            .get(&K::KIND)
            .map(|bucket| bucket.values().cloned().filter_map(K::from_any).collect())
            .unwrap_or_default()
    }

    fn create_any(&self, mut resource: AnyResource) -> Result<AnyResource> {
        validate(&mut resource)?;
        let mut inner = self.write();
        self.insert_new(&mut inner, resource)
    }

    fn update_any(&self, mut resource: AnyResource) -> Result<AnyResource> {
        validate(&mut resource)?;
        let mut inner = self.write();
        self.replace_existing(&mut inner, resource)
    }

    fn insert_new(&self, inner: &mut Inner, mut resource: AnyResource) -> Result<AnyResource> {
        let kind = resource.kind();
        let key = resource.key();
        if inner.bucket(kind).contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind, key });
        }

        let version = inner.next_version();
        let meta = resource.metadata_mut();
        meta.uid = Uuid::new_v4().to_string();
        meta.resource_version = version;
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Utc::now());
        }

        inner.bucket(kind).insert(key, resource.clone());
        self.publish(WatchEvent::Added(resource.clone()));
        Ok(resource)
    }

    fn replace_existing(
        &self,
        inner: &mut Inner,
        mut resource: AnyResource,
    ) -> Result<AnyResource> {
        let kind = resource.kind();
        let key = resource.key();
        let existing = inner
            .bucket(kind)
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                key: key.clone(),
            })?;

        let expected = resource.metadata().resource_version;
        let actual = existing.metadata().resource_version;
        if expected != actual {
            return Err(StoreError::Conflict {
                kind,
                key,
                expected,
                actual,
            });
        }

        let version = inner.next_version();
        let meta = resource.metadata_mut();
        meta.uid = existing.metadata().uid.clone();
        meta.creation_timestamp = existing.metadata().creation_timestamp;
        meta.resource_version = version;

        inner.bucket(kind).insert(key, resource.clone());
        self.publish(WatchEvent::Modified(resource.clone()));
        Ok(resource)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks names and fills in the default namespace.
fn validate(resource: &mut AnyResource) -> Result<()> {
    let meta = resource.metadata_mut();
    if meta.name.is_empty() {
        return Err(StoreError::Invalid("metadata.name is required".to_string()));
    }
    if meta.name.contains('/') || meta.namespace.contains('/') {
        return Err(StoreError::Invalid(format!(
            "name and namespace must not contain '/': {}",
            meta.key()
        )));
    }
    if meta.namespace.is_empty() {
        meta.namespace = DEFAULT_NAMESPACE.to_string();
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_layer(&self, namespace: &str, name: &str) -> Result<Layer> {
        self.get_typed(namespace, name)
    }

    async fn list_layers(&self) -> Result<Vec<Layer>> {
        Ok(self.list_typed())
    }

    async fn update_layer(&self, layer: Layer) -> Result<Layer> {
        self.update_any(layer.into_any()).and_then(expect_kind)
    }

    async fn get_repository(&self, namespace: &str, name: &str) -> Result<Repository> {
        self.get_typed(namespace, name)
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.list_typed())
    }

    async fn get_run(&self, namespace: &str, name: &str) -> Result<Run> {
        self.get_typed(namespace, name)
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        Ok(self.list_typed())
    }

    async fn create_run(&self, run: Run) -> Result<Run> {
        self.create_any(run.into_any()).and_then(expect_kind)
    }

    async fn update_run(&self, run: Run) -> Result<Run> {
        self.update_any(run.into_any()).and_then(expect_kind)
    }

    async fn apply(&self, mut resource: AnyResource) -> Result<AnyResource> {
        validate(&mut resource)?;
        // Lookup and write happen under the same write lock
        let mut inner = self.write();
        let existing = inner.bucket(resource.kind()).get(&resource.key()).cloned();
        match existing {
            None => self.insert_new(&mut inner, resource),
            Some(existing) => {
                resource.keep_status_of(&existing);
                resource.metadata_mut().resource_version = existing.metadata().resource_version;
                self.replace_existing(&mut inner, resource)
            }
        }
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let key = object_key(namespace, name);
        let mut inner = self.write();
        match inner.bucket(kind).remove(&key) {
            Some(removed) => {
                self.publish(WatchEvent::Deleted(removed));
                Ok(())
            }
            None => Err(StoreError::NotFound { kind, key }),
        }
    }

    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream> {
        let inner = self.read();
        let events = self
            .channels
            .get(&kind)
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| StoreError::Invalid(format!("{} is not watchable", kind)))?;
        let initial = inner
            .objects
            .get(&kind)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();
        Ok(WatchStream { initial, events })
    }
}

fn expect_kind<K: StoreObject>(resource: AnyResource) -> Result<K> {
    let kind = resource.kind();
    K::from_any(resource).ok_or_else(|| {
        StoreError::Invalid(format!("expected {} but stored {}", K::KIND, kind))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Action, LayerSpec, ResourceRef, RunSpec, RunState};
    use crate::store::{modify_layer, runs_for_layer};

    fn layer(name: &str) -> Layer {
        Layer::new(
            ResourceKind::Layer,
            "infra",
            name,
            LayerSpec {
                repository: ResourceRef::new("infra", "platform"),
                branch: "main".to_string(),
                path: name.to_string(),
                ..Default::default()
            },
        )
    }

    fn run(name: &str, layer: &str) -> Run {
        Run::new(
            ResourceKind::Run,
            "infra",
            name,
            RunSpec {
                action: Action::Plan,
                layer: ResourceRef::new("infra", layer),
                revision: "abc123".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_create_assigns_identity_and_version() {
        let store = InMemoryStore::new();
        let created = store.create_run(run("r1", "network")).await.unwrap();

        assert!(!created.metadata.uid.is_empty());
        assert!(created.metadata.resource_version > 0);
        assert!(created.metadata.creation_timestamp.is_some());

        let err = store.create_run(run("r1", "network")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = InMemoryStore::new();
        let applied = store.apply(layer("network").into_any()).await.unwrap();
        let stale = Layer::from_any(applied).unwrap();

        let mut fresh = stale.clone();
        fresh.status.state = "Idle".to_string();
        let fresh = store.update_layer(fresh).await.unwrap();
        assert!(fresh.metadata.resource_version > stale.metadata.resource_version);

        let err = store.update_layer(stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_apply_keeps_status() {
        let store = InMemoryStore::new();
        store.apply(layer("network").into_any()).await.unwrap();
        modify_layer(&store, "infra", "network", |l| {
            l.status.state = "PlanNeeded".to_string()
        })
        .await
        .unwrap();

        let mut changed = layer("network");
        changed.spec.branch = "develop".to_string();
        store.apply(changed.into_any()).await.unwrap();

        let stored = store.get_layer("infra", "network").await.unwrap();
        assert_eq!(stored.spec.branch, "develop");
        assert_eq!(stored.status.state, "PlanNeeded");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_apply_never_conflicts() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        store.apply(layer("network").into_any()).await.unwrap();

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    let mut changed = layer("network");
                    changed.spec.branch = format!("branch-{}", i);
                    store.apply(changed.into_any()).await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let stored = store.get_layer("infra", "network").await.unwrap();
        assert_eq!(stored.metadata.resource_version, 65);
    }

    #[tokio::test]
    async fn test_watch_lists_then_streams() {
        let store = InMemoryStore::new();
        store.apply(layer("a").into_any()).await.unwrap();

        let mut stream = store.watch(ResourceKind::Layer).await.unwrap();
        assert_eq!(stream.initial.len(), 1);

        store.apply(layer("b").into_any()).await.unwrap();
        store.delete(ResourceKind::Layer, "infra", "a").await.unwrap();

        match stream.events.recv().await.unwrap() {
            WatchEvent::Added(r) => assert_eq!(r.key(), "infra/b"),
            other => panic!("unexpected event {:?}", other),
        }
        match stream.events.recv().await.unwrap() {
            WatchEvent::Deleted(r) => assert_eq!(r.key(), "infra/a"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_watch_channels_are_per_kind() {
        let store = InMemoryStore::new();
        let mut runs = store.watch(ResourceKind::Run).await.unwrap();
        store.apply(layer("a").into_any()).await.unwrap();
        assert!(runs.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_default_namespace_and_invalid_names() {
        let store = InMemoryStore::new();
        let mut unnamespaced = layer("a");
        unnamespaced.metadata.namespace.clear();
        let stored = store.apply(unnamespaced.into_any()).await.unwrap();
        assert_eq!(stored.key(), "default/a");

        let err = store.apply(layer("bad/name").into_any()).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_runs_for_layer_newest_first() {
        let store = InMemoryStore::new();
        let base = Utc::now();
        for (i, name) in ["old", "mid", "new"].iter().enumerate() {
            let mut r = run(name, "network");
            r.metadata.creation_timestamp = Some(base + chrono::Duration::seconds(i as i64));
            store.create_run(r).await.unwrap();
        }
        store.create_run(run("other", "dns")).await.unwrap();

        let runs = runs_for_layer(&store, &layer("network")).await.unwrap();
        let names: Vec<_> = runs.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["new", "mid", "old"]);
        assert!(runs.iter().all(|r| r.status.state == RunState::Pending));
    }
}
