//! In-memory fakes and fixtures shared by the unit tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use cidr_sync_core::{
    config::{ControllerConfig, ControllerConfigBuilder},
    helpers::pretty_type_name,
    resources::crd::{
        v1alpha1::ipaddressallocation::{IpAddressAllocation, READY_CONDITION},
        v1beta1::subnetpool::SubnetPool,
    },
};
use k8s_openapi::{
    api::core::v1::{Node, NodeSpec},
    apimachinery::pkg::apis::meta::v1::{Condition, OwnerReference, Time},
    chrono::{TimeZone, Utc},
};
use kube::{
    core::{ErrorResponse, ObjectMeta},
    runtime::watcher::Event,
    Resource,
};
use serde_json::Value;

use crate::{
    cache::{watch_cache, WatchCache},
    pool::{RequestTemplate, SubnetPools},
    store::{NodeStore, ObjectStore, StoreError},
};

pub const NAMESPACE: &str = "capi-system";
pub const CLUSTER: &str = "cluster-a";

pub fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: None,
    }
}

pub fn node_with_cidr(name: &str, cidr: &str) -> Node {
    let mut node = node(name);
    node.spec = Some(NodeSpec {
        pod_cidr: Some(cidr.to_owned()),
        pod_cidrs: Some(vec![cidr.to_owned()]),
        ..Default::default()
    });

    node
}

pub fn allocation(name: &str) -> IpAddressAllocation {
    IpAddressAllocation {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(NAMESPACE.to_owned()),
            ..Default::default()
        },
        spec: Default::default(),
        status: None,
    }
}

pub fn ready_condition(status: &str, second: u32) -> Condition {
    Condition {
        type_: READY_CONDITION.to_owned(),
        status: status.to_owned(),
        last_transition_time: Time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap()),
        message: String::new(),
        reason: "Allocated".to_owned(),
        observed_generation: None,
    }
}

pub fn owner() -> OwnerReference {
    OwnerReference {
        api_version: "cluster.x-k8s.io/v1beta1".to_owned(),
        kind: "Cluster".to_owned(),
        name: CLUSTER.to_owned(),
        uid: "2f9b2c4e".to_owned(),
        ..Default::default()
    }
}

pub fn config() -> ControllerConfig {
    ControllerConfigBuilder::default()
        .cluster_name(CLUSTER)
        .cluster_namespace(NAMESPACE)
        .owner(owner())
        .build()
        .unwrap()
}

pub fn template() -> RequestTemplate {
    RequestTemplate::from(&config())
}

pub fn cache_of<K>(objects: Vec<K>) -> WatchCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (cache, mut feeder) = watch_cache();
    feeder.apply(Event::Restarted(objects), |_| {});

    cache
}

pub fn pool_strategy(store: &Arc<MemoryStore<SubnetPool>>) -> SubnetPools<SubnetPool> {
    SubnetPools::new(store.clone(), cache_of(vec![]), template())
}

pub fn kube_server_error() -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: "etcdserver: request timed out".to_owned(),
        reason: "InternalError".to_owned(),
        code: 500,
    })
}

pub fn server_error() -> StoreError {
    StoreError::KubeApiError(kube_server_error())
}

/// [`ObjectStore`] backed by a map, enforcing resource versions on replace.
pub struct MemoryStore<K> {
    state: Mutex<MemoryState<K>>,
}

struct MemoryState<K> {
    objects: BTreeMap<(String, String), K>,
    next_version: u64,
    creates: usize,
    replaces: usize,
    deletes: usize,
    hidden_gets: usize,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                objects: BTreeMap::new(),
                next_version: 1,
                creates: 0,
                replaces: 0,
                deletes: 0,
                hidden_gets: 0,
            }),
        }
    }
}

impl<K> MemoryState<K>
where
    K: Resource,
{
    fn stamp(&mut self, object: &mut K) {
        object.meta_mut().resource_version = Some(self.next_version.to_string());
        self.next_version += 1;
    }
}

fn object_id<K: Resource>(object: &K) -> Result<(String, String), StoreError> {
    let meta = object.meta();

    match (&meta.namespace, &meta.name) {
        (Some(namespace), Some(name)) => Ok((namespace.clone(), name.clone())),
        _ => Err(StoreError::MissingObjectMetadata),
    }
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone,
{
    fn lock(&self) -> MutexGuard<'_, MemoryState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds an object without counting it as a write.
    pub fn insert(&self, mut object: K) {
        let id = object_id(&object).unwrap();
        let mut state = self.lock();
        state.stamp(&mut object);
        state.objects.insert(id, object);
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    pub fn objects(&self) -> Vec<K> {
        self.lock().objects.values().cloned().collect()
    }

    /// Makes the next `get` miss, as if another writer created the object right after it.
    pub fn hide_next_get(&self) {
        self.lock().hidden_gets += 1;
    }

    pub fn creates(&self) -> usize {
        self.lock().creates
    }

    pub fn replaces(&self) -> usize {
        self.lock().replaces
    }

    pub fn deletes(&self) -> usize {
        self.lock().deletes
    }

    pub fn writes(&self) -> usize {
        let state = self.lock();
        state.creates + state.replaces + state.deletes
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let mut state = self.lock();

        if state.hidden_gets > 0 {
            state.hidden_gets -= 1;
            return Err(StoreError::NotFound(pretty_type_name::<K>(), name.to_owned()));
        }

        state
            .objects
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(pretty_type_name::<K>(), name.to_owned()))
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let id = object_id(object)?;
        let mut state = self.lock();

        if state.objects.contains_key(&id) {
            return Err(StoreError::AlreadyExists(pretty_type_name::<K>(), id.1));
        }

        let mut created = object.clone();
        state.stamp(&mut created);
        state.creates += 1;
        state.objects.insert(id, created.clone());

        Ok(created)
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let id = object_id(object)?;
        let mut state = self.lock();

        let current_version = match state.objects.get(&id) {
            Some(current) => current.meta().resource_version.clone(),
            None => return Err(StoreError::NotFound(pretty_type_name::<K>(), id.1)),
        };

        if current_version != object.meta().resource_version {
            return Err(StoreError::Conflict(pretty_type_name::<K>(), id.1));
        }

        let mut replaced = object.clone();
        state.stamp(&mut replaced);
        state.replaces += 1;
        state.objects.insert(id, replaced.clone());

        Ok(replaced)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();

        match state.objects.remove(&(namespace.to_owned(), name.to_owned())) {
            Some(_) => {
                state.deletes += 1;
                Ok(())
            }
            None => Err(StoreError::NotFound(pretty_type_name::<K>(), name.to_owned())),
        }
    }
}

/// [`NodeStore`] that applies CIDR merge patches to in-memory nodes.
#[derive(Default)]
pub struct MemoryNodeStore {
    state: Mutex<NodeState>,
}

#[derive(Default)]
struct NodeState {
    patched: BTreeMap<String, Node>,
    patch_counts: BTreeMap<String, usize>,
    failing: BTreeSet<String>,
}

impl MemoryNodeStore {
    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_patches_for(&self, name: &str) {
        self.lock().failing.insert(name.to_owned());
    }

    pub fn heal(&self, name: &str) {
        self.lock().failing.remove(name);
    }

    pub fn patched(&self, name: &str) -> Option<Node> {
        self.lock().patched.get(name).cloned()
    }

    /// Attempts, failed ones included.
    pub fn patch_count(&self, name: &str) -> usize {
        self.lock().patch_counts.get(name).copied().unwrap_or(0)
    }

    pub fn total_patches(&self) -> usize {
        self.lock().patch_counts.values().sum()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get_node(&self, name: &str) -> Result<Node, StoreError> {
        Ok(self.patched(name).unwrap_or_else(|| node(name)))
    }

    async fn patch_node(&self, name: &str, patch: &Value) -> Result<Node, StoreError> {
        let mut state = self.lock();
        *state.patch_counts.entry(name.to_owned()).or_insert(0) += 1;

        if state.failing.contains(name) {
            return Err(server_error());
        }

        let mut patched = state
            .patched
            .get(name)
            .cloned()
            .unwrap_or_else(|| node(name));
        let spec = patched.spec.get_or_insert_with(NodeSpec::default);

        if let Some(cidr) = patch["spec"]["podCIDR"].as_str() {
            spec.pod_cidr = Some(cidr.to_owned());
        }
        if let Some(cidrs) = patch["spec"]["podCIDRs"].as_array() {
            spec.pod_cidrs = Some(
                cidrs
                    .iter()
                    .filter_map(|cidr| cidr.as_str().map(str::to_owned))
                    .collect(),
            );
        }

        state.patched.insert(name.to_owned(), patched.clone());

        Ok(patched)
    }
}
