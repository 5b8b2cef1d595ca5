use async_trait::async_trait;
use cidr_sync_core::{
    key::ObjectKey, resources::crd::v1alpha1::ipaddressallocation::IpAddressAllocation,
};
use k8s_openapi::api::core::v1::Node;
use log::{debug, warn};

use crate::{cache::WatchCache, pool::parse_cidr};

use super::{
    error::ReconcilerError, is_deleting, patch::NodePatcher, pod_cidr, require_namespaced,
    Reconcile,
};

/// Copies the block of a ready per-node allocation onto its node.
pub struct AllocationReconciler {
    allocations: WatchCache<IpAddressAllocation>,
    nodes: WatchCache<Node>,
    patcher: NodePatcher,
}

impl AllocationReconciler {
    pub fn new(
        allocations: WatchCache<IpAddressAllocation>,
        nodes: WatchCache<Node>,
        patcher: NodePatcher,
    ) -> Self {
        Self {
            allocations,
            nodes,
            patcher,
        }
    }
}

#[async_trait]
impl Reconcile for AllocationReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcilerError> {
        require_namespaced(key)?;

        let Some(allocation) = self.allocations.get(key) else {
            debug!("Allocation '{key}' is gone");
            return Ok(());
        };

        let status = allocation.status.as_ref();
        if !status.is_some_and(|status| status.is_ready()) {
            return Err(ReconcilerError::AllocationNotReady(key.to_string()));
        }

        let Some(cidr) = status.and_then(|status| status.realized_cidr()) else {
            return Err(ReconcilerError::AllocationMissingCidr(key.to_string()));
        };
        parse_cidr(&key.name, cidr)?;

        let Some(node) = self.nodes.get(&ObjectKey::cluster(&key.name)) else {
            debug!("Node '{}' is not known, skipping allocation '{key}'", key.name);
            return Ok(());
        };

        if is_deleting(&node) {
            return Ok(());
        }

        match pod_cidr(&node) {
            Some(existing) if existing == cidr => Ok(()),
            Some(existing) => {
                warn!(
                    "Node '{}' already has CIDR {existing}, ignoring {cidr} from allocation '{key}'",
                    key.name
                );
                Ok(())
            }
            None => self.patcher.patch_with_retry(&node, cidr).await,
        }
    }
}
