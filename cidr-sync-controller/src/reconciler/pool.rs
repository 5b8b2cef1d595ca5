use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use cidr_sync_core::key::ObjectKey;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use log::{debug, warn};

use crate::{cache::WatchCache, pool::PoolStrategy};

use super::{
    error::ReconcilerError, is_deleting, patch::NodePatcher, pod_cidr, require_namespaced,
    Reconcile,
};

/// Copies blocks realized in the shared pool onto the nodes they were requested for.
pub struct PoolReconciler<P: PoolStrategy> {
    pools: Arc<P>,
    nodes: WatchCache<Node>,
    patcher: NodePatcher,
    /// Node whose patch failed last, per pool.
    last_failed: Mutex<HashMap<ObjectKey, String>>,
}

impl<P: PoolStrategy> PoolReconciler<P> {
    pub fn new(pools: Arc<P>, nodes: WatchCache<Node>, patcher: NodePatcher) -> Self {
        Self {
            pools,
            nodes,
            patcher,
            last_failed: Mutex::new(HashMap::new()),
        }
    }

    fn last_failed(&self) -> MutexGuard<'_, HashMap<ObjectKey, String>> {
        self.last_failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached nodes sorted by name, starting right after the node that failed
    /// in the previous pass so a node that keeps failing is tried last.
    fn pass_order(&self, key: &ObjectKey) -> Vec<Arc<Node>> {
        let mut nodes = self.nodes.list();
        nodes.sort_by_cached_key(|node| node.name_any());

        if let Some(failed) = self.last_failed().get(key) {
            let start = nodes.partition_point(|node| node.name_any() <= *failed);
            nodes.rotate_left(start);
        }

        nodes
    }
}

#[async_trait]
impl<P: PoolStrategy> Reconcile for PoolReconciler<P> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcilerError> {
        require_namespaced(key)?;

        let Some(pool) = self.pools.get_from_cache(key) else {
            debug!("Pool '{key}' is gone, nothing to propagate");
            return Ok(());
        };

        let results = self.pools.realized_results(&pool)?;
        if results.is_empty() {
            return Ok(());
        }

        for node in self.pass_order(key) {
            let name = node.name_any();
            let Some(cidr) = results.get(&name) else {
                continue;
            };

            if is_deleting(&node) {
                continue;
            }

            match pod_cidr(&node) {
                Some(existing) if existing == cidr => (),
                Some(existing) => warn!(
                    "Node '{name}' already has CIDR {existing}, ignoring {cidr} realized in pool '{key}'"
                ),
                None => {
                    if let Err(err) = self.patcher.patch_with_retry(&node, cidr).await {
                        self.last_failed().insert(key.clone(), name);
                        return Err(err);
                    }
                }
            }
        }

        self.last_failed().remove(key);

        Ok(())
    }
}
