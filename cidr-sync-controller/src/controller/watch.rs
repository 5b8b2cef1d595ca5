use std::{fmt::Debug, pin::pin, sync::Arc, time::Duration};

use cidr_sync_core::{
    helpers::pretty_type_name, key::ObjectKey,
    resources::crd::v1alpha1::ipaddressallocation::IpAddressAllocation,
};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Resource, ResourceExt,
};
use log::{info, warn};
use serde::de::DeserializeOwned;
use tokio::time::MissedTickBehavior;

use crate::{
    cache::{CacheFeeder, WatchCache, WatchDelta},
    pool::PoolStrategy,
    queue::WorkQueue,
    reconciler::{is_deleting, pod_cidr},
};

use super::shutdown::Shutdown;

/// Pumps a watch stream into `feeder`, queueing the keys `mapper` picks
/// out of every change, until `shutdown` fires.
pub async fn run_watch<K, F>(
    api: Api<K>,
    config: watcher::Config,
    mut feeder: CacheFeeder<K>,
    queue: Arc<WorkQueue<String>>,
    mapper: F,
    mut shutdown: Shutdown,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: Fn(WatchDelta<'_, K>) -> Vec<ObjectKey>,
{
    let kind = pretty_type_name::<K>();
    let mut events = pin!(watcher::watcher(api, config)
        .backoff(watcher::default_backoff())
        .map_ok(|event| event.modify(|object| object.managed_fields_mut().clear())));

    info!("Watching {kind} resources...");

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            event = events.next() => match event {
                Some(Ok(event)) => feeder.apply(event, |delta| {
                    for key in mapper(delta) {
                        queue.add(key.to_string());
                    }
                }),
                Some(Err(err)) => warn!("{kind} watch failed, retrying: {err}"),
                None => break,
            }
        }
    }

    info!("Stopped watching {kind} resources");
}

/// Queues every cached key once per `period`, starting one period from now.
pub async fn run_resync<K>(
    cache: WatchCache<K>,
    queue: Arc<WorkQueue<String>>,
    period: Duration,
    mut shutdown: Shutdown,
) where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                for key in cache.keys() {
                    queue.add(key.to_string());
                }
            }
        }
    }
}

fn key_of<K: Resource>(object: &K) -> Vec<ObjectKey> {
    ObjectKey::from_resource(object).into_iter().collect()
}

fn cidr_state(node: &Node) -> (Option<&str>, bool) {
    (pod_cidr(node), is_deleting(node))
}

pub fn node_event_keys(delta: WatchDelta<'_, Node>) -> Vec<ObjectKey> {
    match delta {
        WatchDelta::Added(node) | WatchDelta::Deleted(node) => key_of(node),
        WatchDelta::Updated { old, new } if cidr_state(old) != cidr_state(new) => key_of(new),
        WatchDelta::Updated { .. } => Vec::new(),
    }
}

pub fn pool_event_keys<P: PoolStrategy>(
    pools: &P,
    delta: WatchDelta<'_, P::Pool>,
) -> Vec<ObjectKey> {
    match delta {
        WatchDelta::Added(pool) => key_of(pool),
        WatchDelta::Updated { old, new } if pools.has_meaningful_change(old, new) => key_of(new),
        WatchDelta::Updated { .. } | WatchDelta::Deleted(_) => Vec::new(),
    }
}

fn allocation_state(allocation: &IpAddressAllocation) -> (bool, Option<&str>) {
    allocation
        .status
        .as_ref()
        .map(|status| (status.is_ready(), status.realized_cidr()))
        .unwrap_or((false, None))
}

pub fn allocation_event_keys(delta: WatchDelta<'_, IpAddressAllocation>) -> Vec<ObjectKey> {
    match delta {
        WatchDelta::Added(allocation) => key_of(allocation),
        WatchDelta::Updated { old, new } if allocation_state(old) != allocation_state(new) => {
            key_of(new)
        }
        WatchDelta::Updated { .. } | WatchDelta::Deleted(_) => Vec::new(),
    }
}
