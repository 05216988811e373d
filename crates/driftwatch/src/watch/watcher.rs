//! Live local mirrors of watched resource kinds.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::error::WatchError;
use crate::resource::{AnyResource, ResourceKind, StoreObject};
use crate::store::{ResourceStore, WatchEvent};

/// The type of change observed on a mirrored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// Posted by a watcher after its mirror changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub kind: ResourceKind,
    pub change_type: ChangeType,
    /// The `namespace/name` key of the resource.
    pub key: String,
}

/// Shared read access to a watcher's cache, keyed by `namespace/name`.
pub struct Mirror<K> {
    inner: Arc<RwLock<HashMap<String, K>>>,
}

impl<K> Clone for Mirror<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: StoreObject> Mirror<K> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, K>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Mirror lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, K>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Mirror lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Returns the object stored under `namespace/name`.
    pub fn get(&self, key: &str) -> Option<K> {
        self.read().get(key).cloned()
    }

    /// Clones every cached object.
    pub fn values(&self) -> Vec<K> {
        self.read().values().cloned().collect()
    }

    /// Clones the whole cache.
    pub fn to_map(&self) -> HashMap<String, K> {
        self.read().clone()
    }

    /// Returns the number of mirrored objects.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if nothing is mirrored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts or replaces an object. Returns the change, or `None` if the
    /// cached copy already had the same resource version.
    fn upsert(&self, object: K) -> Option<ChangeType> {
        let key = object.metadata().key();
        let version = object.metadata().resource_version;
        let mut cache = self.write();
        match cache.insert(key, object) {
            None => Some(ChangeType::Added),
            Some(previous) if previous.metadata().resource_version == version => None,
            Some(_) => Some(ChangeType::Modified),
        }
    }

    fn remove(&self, key: &str) -> Option<ChangeType> {
        self.write().remove(key).map(|_| ChangeType::Deleted)
    }

    /// Replaces the cache with `objects` and returns what changed.
    fn replace(&self, objects: Vec<K>) -> Vec<(String, ChangeType)> {
        let mut fresh: HashMap<String, K> = objects
            .into_iter()
            .map(|object| (object.metadata().key(), object))
            .collect();
        let mut cache = self.write();
        let mut changes = Vec::new();

        for (key, object) in &fresh {
            match cache.get(key) {
                None => changes.push((key.clone(), ChangeType::Added)),
                Some(previous)
                    if previous.metadata().resource_version
                        != object.metadata().resource_version =>
                {
                    changes.push((key.clone(), ChangeType::Modified))
                }
                Some(_) => {}
            }
        }
        for key in cache.keys() {
            if !fresh.contains_key(key) {
                changes.push((key.clone(), ChangeType::Deleted));
            }
        }

        std::mem::swap(&mut *cache, &mut fresh);
        changes
    }
}

/// Keeps a [`Mirror`] of one resource kind in sync with the store and posts
/// a [`ChangeNotice`] for every meaningful change.
pub struct ResourceWatcher<K: StoreObject> {
    store: Arc<dyn ResourceStore>,
    mirror: Mirror<K>,
    notices: mpsc::Sender<ChangeNotice>,
}

impl<K: StoreObject> ResourceWatcher<K> {
    /// Creates a watcher posting its changes to `notices`.
    pub fn new(store: Arc<dyn ResourceStore>, notices: mpsc::Sender<ChangeNotice>) -> Self {
        Self {
            store,
            mirror: Mirror::new(),
            notices,
        }
    }

    /// Returns a handle to the watcher's mirror.
    pub fn mirror(&self) -> Mirror<K> {
        self.mirror.clone()
    }

    /// Loads the initial listing, then keeps following changes in the
    /// background. The mirror is complete when this returns.
    pub async fn start(self) -> Result<JoinHandle<()>, WatchError> {
        let stream = self.store.watch(K::KIND).await?;
        let initial = typed::<K>(stream.initial);
        self.mirror.replace(initial);
        log::info!("{} watcher synced {} objects", K::KIND, self.mirror.len());

        Ok(tokio::spawn(self.run(stream.events)))
    }

    async fn run(self, mut events: broadcast::Receiver<WatchEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.apply(event),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "{} watcher missed {} events, relisting",
                        K::KIND,
                        skipped
                    );
                    match self.resync().await {
                        Ok(fresh) => events = fresh,
                        Err(e) => {
                            log::error!("{} watcher failed to relist: {}", K::KIND, e);
                            break;
                        }
                    }
                }
                Err(RecvError::Closed) => {
                    log::warn!("{} watch stream closed", K::KIND);
                    break;
                }
            }
        }
    }

    fn apply(&self, event: WatchEvent) {
        let change = match event {
            WatchEvent::Added(resource) | WatchEvent::Modified(resource) => {
                let Some(object) = K::from_any(resource) else {
                    return;
                };
                let key = object.metadata().key();
                self.mirror.upsert(object).map(|change| (key, change))
            }
            WatchEvent::Deleted(resource) => {
                let key = resource.key();
                self.mirror.remove(&key).map(|change| (key, change))
            }
        };

        if let Some((key, change_type)) = change {
            self.notify(key, change_type);
        }
    }

    /// Subscribes again and diffs the fresh listing against the mirror.
    async fn resync(&self) -> Result<broadcast::Receiver<WatchEvent>, WatchError> {
        let stream = self.store.watch(K::KIND).await?;
        for (key, change_type) in self.mirror.replace(typed::<K>(stream.initial)) {
            self.notify(key, change_type);
        }
        Ok(stream.events)
    }

    fn notify(&self, key: String, change_type: ChangeType) {
        log::debug!("{} {} {:?}", K::KIND, key, change_type);
        let notice = ChangeNotice {
            kind: K::KIND,
            change_type,
            key,
        };
        match self.notices.try_send(notice) {
            Ok(()) => {}
            // Queued notices already guarantee a rebuild that reads the mirror
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => {
                log::debug!("{} watcher has no listener", K::KIND);
            }
        }
    }
}

fn typed<K: StoreObject>(resources: Vec<AnyResource>) -> Vec<K> {
    resources.into_iter().filter_map(K::from_any).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Action, Layer, LayerSpec, ResourceRef, Run, RunSpec};
    use crate::store::{modify_layer, InMemoryStore};

    fn layer(name: &str) -> Layer {
        Layer::new(ResourceKind::Layer, "infra", name, LayerSpec::default())
    }

    async fn next(rx: &mut mpsc::Receiver<ChangeNotice>) -> ChangeNotice {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_initial_listing_is_ready_after_start() {
        let store = Arc::new(InMemoryStore::new());
        store.apply(layer("a").into_any()).await.unwrap();
        store.apply(layer("b").into_any()).await.unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let watcher = ResourceWatcher::<Layer>::new(store, tx);
        let mirror = watcher.mirror();
        watcher.start().await.unwrap();

        assert_eq!(mirror.len(), 2);
        assert!(mirror.get("infra/a").is_some());
    }

    #[tokio::test]
    async fn test_posts_notices_under_own_kind() {
        let store = Arc::new(InMemoryStore::new());
        let (tx, mut rx) = mpsc::channel(16);
        let watcher = ResourceWatcher::<Layer>::new(store.clone(), tx);
        let mirror = watcher.mirror();
        watcher.start().await.unwrap();

        store.apply(layer("a").into_any()).await.unwrap();
        let notice = next(&mut rx).await;
        assert_eq!(notice.kind, ResourceKind::Layer);
        assert_eq!(notice.change_type, ChangeType::Added);
        assert_eq!(notice.key, "infra/a");

        modify_layer(store.as_ref(), "infra", "a", |l| l.status.state = "Idle".into())
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.change_type, ChangeType::Modified);
        assert_eq!(mirror.get("infra/a").unwrap().status.state, "Idle");

        store.delete(ResourceKind::Layer, "infra", "a").await.unwrap();
        assert_eq!(next(&mut rx).await.change_type, ChangeType::Deleted);
        assert!(mirror.is_empty());
    }

    #[tokio::test]
    async fn test_ignores_other_kinds() {
        let store = Arc::new(InMemoryStore::new());
        let (tx, mut rx) = mpsc::channel(16);
        ResourceWatcher::<Run>::new(store.clone(), tx)
            .start()
            .await
            .unwrap();

        store.apply(layer("a").into_any()).await.unwrap();
        let run = Run::new(
            ResourceKind::Run,
            "infra",
            "a-plan-12345",
            RunSpec {
                action: Action::Plan,
                layer: ResourceRef::new("infra", "a"),
                revision: "abc".into(),
            },
        );
        store.create_run(run).await.unwrap();

        let notice = next(&mut rx).await;
        assert_eq!(notice.kind, ResourceKind::Run);
        assert_eq!(notice.key, "infra/a-plan-12345");
    }

    #[test]
    fn test_same_version_is_suppressed() {
        let mirror = Mirror::<Layer>::new();
        let mut l = layer("a");
        l.metadata.resource_version = 3;

        assert_eq!(mirror.upsert(l.clone()), Some(ChangeType::Added));
        assert_eq!(mirror.upsert(l.clone()), None);

        l.metadata.resource_version = 4;
        assert_eq!(mirror.upsert(l), Some(ChangeType::Modified));
    }

    #[test]
    fn test_replace_reports_diff() {
        let mirror = Mirror::<Layer>::new();
        let mut a = layer("a");
        a.metadata.resource_version = 1;
        let mut b = layer("b");
        b.metadata.resource_version = 2;
        mirror.replace(vec![a.clone(), b]);

        a.metadata.resource_version = 5;
        let mut c = layer("c");
        c.metadata.resource_version = 6;
        let mut changes = mirror.replace(vec![a, c]);
        changes.sort_by(|x, y| x.0.cmp(&y.0));

        assert_eq!(
            changes,
            vec![
                ("infra/a".to_string(), ChangeType::Modified),
                ("infra/b".to_string(), ChangeType::Deleted),
                ("infra/c".to_string(), ChangeType::Added),
            ]
        );
    }

    #[tokio::test]
    async fn test_lagging_watcher_relists() {
        let store = Arc::new(InMemoryStore::with_watch_capacity(2));
        let (tx, mut rx) = mpsc::channel(64);
        let watcher = ResourceWatcher::<Layer>::new(store.clone(), tx);
        let mirror = watcher.mirror();
        watcher.start().await.unwrap();

        // Overflow the store channel before the watcher task gets to run
        for name in ["a", "b", "c", "d", "e"] {
            store.apply(layer(name).into_any()).await.unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        while seen.len() < 5 {
            seen.insert(next(&mut rx).await.key);
        }
        assert_eq!(mirror.len(), 5);
    }
}
