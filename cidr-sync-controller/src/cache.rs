use std::{collections::HashSet, sync::Arc, time::Duration};

use cidr_sync_core::key::ObjectKey;
use kube::{
    runtime::{
        reflector::{self, store::Writer, ObjectRef, Store},
        watcher::Event,
    },
    Resource,
};
use tokio::sync::watch;

/// A change observed by the watch stream, already applied to the cache.
#[derive(Debug)]
pub enum WatchDelta<'a, K> {
    Added(&'a K),
    Updated { old: &'a K, new: &'a K },
    Deleted(&'a K),
}

/// Read side of a watched collection. Cheap to clone, shared by all workers.
pub struct WatchCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    synced: watch::Receiver<bool>,
}

/// Write side of a watched collection, owned by the watch stream.
pub struct CacheFeeder<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    writer: Writer<K>,
    reader: Store<K>,
    synced: watch::Sender<bool>,
}

pub fn watch_cache<K>() -> (WatchCache<K>, CacheFeeder<K>)
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (store, writer) = reflector::store();
    let (synced_tx, synced_rx) = watch::channel(false);

    (
        WatchCache {
            store: store.clone(),
            synced: synced_rx,
        },
        CacheFeeder {
            writer,
            reader: store,
            synced: synced_tx,
        },
    )
}

fn object_ref<K>(key: &ObjectKey) -> ObjectRef<K>
where
    K: Resource<DynamicType = ()>,
{
    let reference = ObjectRef::new(&key.name);

    match &key.namespace {
        Some(namespace) => reference.within(namespace),
        None => reference,
    }
}

impl<K> WatchCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.store.get(&object_ref(key))
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.list()
            .iter()
            .filter_map(|object| ObjectKey::from_resource(object.as_ref()))
            .collect()
    }

    #[cfg(test)]
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the first full listing has been applied. Returns `false`
    /// if that doesn't happen within `timeout` or the feeder is gone.
    pub async fn wait_synced(&self, timeout: Duration) -> bool {
        let mut synced = self.synced.clone();
        let wait = async move {
            loop {
                if *synced.borrow_and_update() {
                    return true;
                }

                if synced.changed().await.is_err() {
                    return *synced.borrow();
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}

impl<K> Clone for WatchCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            synced: self.synced.clone(),
        }
    }
}

impl<K> CacheFeeder<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Applies `event` to the cache, then reports each resulting change to
    /// `on_delta`. Reporting happens after the write so that anything
    /// scheduled from a delta observes the new state.
    pub fn apply(&mut self, event: Event<K>, mut on_delta: impl FnMut(WatchDelta<'_, K>)) {
        match &event {
            Event::Applied(object) => {
                let old = self.reader.get(&ObjectRef::from_obj(object));
                self.writer.apply_watcher_event(&event);

                match old {
                    Some(old) => on_delta(WatchDelta::Updated {
                        old: old.as_ref(),
                        new: object,
                    }),
                    None => on_delta(WatchDelta::Added(object)),
                }
            }
            Event::Deleted(object) => {
                self.writer.apply_watcher_event(&event);
                on_delta(WatchDelta::Deleted(object));
            }
            Event::Restarted(objects) => {
                let previous = self.reader.state();
                let olds = objects
                    .iter()
                    .map(|object| self.reader.get(&ObjectRef::from_obj(object)))
                    .collect::<Vec<_>>();
                let relisted = objects
                    .iter()
                    .map(ObjectRef::from_obj)
                    .collect::<HashSet<_>>();

                self.writer.apply_watcher_event(&event);

                for gone in previous
                    .iter()
                    .filter(|object| !relisted.contains(&ObjectRef::from_obj(object.as_ref())))
                {
                    on_delta(WatchDelta::Deleted(gone.as_ref()));
                }

                for (object, old) in objects.iter().zip(olds) {
                    match old {
                        Some(old) => on_delta(WatchDelta::Updated {
                            old: old.as_ref(),
                            new: object,
                        }),
                        None => on_delta(WatchDelta::Added(object)),
                    }
                }

                self.synced.send_replace(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cidr_sync_core::key::ObjectKey;
    use k8s_openapi::api::core::v1::Node;
    use kube::{runtime::watcher::Event, ResourceExt};

    use crate::testing::{node, node_with_cidr};

    use super::{watch_cache, WatchDelta};

    fn describe(delta: WatchDelta<'_, Node>) -> String {
        match delta {
            WatchDelta::Added(node) => format!("added {}", node.name_any()),
            WatchDelta::Updated { old, new } => format!(
                "updated {} ({:?} -> {:?})",
                new.name_any(),
                old.spec.as_ref().and_then(|spec| spec.pod_cidr.clone()),
                new.spec.as_ref().and_then(|spec| spec.pod_cidr.clone())
            ),
            WatchDelta::Deleted(node) => format!("deleted {}", node.name_any()),
        }
    }

    #[test]
    fn applied_events_report_previous_state() {
        let (cache, mut feeder) = watch_cache::<Node>();
        let mut deltas = Vec::new();

        feeder.apply(Event::Applied(node("worker-1")), |delta| deltas.push(describe(delta)));
        feeder.apply(
            Event::Applied(node_with_cidr("worker-1", "10.0.1.0/24")),
            |delta| deltas.push(describe(delta)),
        );
        feeder.apply(Event::Deleted(node("worker-1")), |delta| deltas.push(describe(delta)));

        assert_eq!(
            deltas,
            vec![
                "added worker-1",
                "updated worker-1 (None -> Some(\"10.0.1.0/24\"))",
                "deleted worker-1",
            ]
        );
        assert!(cache.get(&ObjectKey::cluster("worker-1")).is_none());
    }

    #[test]
    fn restart_reports_objects_missing_from_the_relist() {
        let (cache, mut feeder) = watch_cache::<Node>();
        let mut deltas = Vec::new();

        feeder.apply(Event::Restarted(vec![node("worker-1"), node("worker-2")]), |_| {});
        feeder.apply(Event::Restarted(vec![node("worker-2")]), |delta| {
            deltas.push(describe(delta))
        });

        assert_eq!(
            deltas,
            vec!["deleted worker-1", "updated worker-2 (None -> None)"]
        );
        assert_eq!(cache.keys(), vec![ObjectKey::cluster("worker-2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_is_synced_after_the_first_listing() {
        let (cache, mut feeder) = watch_cache::<Node>();

        assert!(!cache.wait_synced(Duration::from_secs(5)).await);

        feeder.apply(Event::Restarted(vec![node("worker-1")]), |_| {});

        assert!(cache.is_synced());
        assert!(cache.wait_synced(Duration::from_secs(5)).await);
    }
}
