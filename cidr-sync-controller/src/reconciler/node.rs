use async_trait::async_trait;
use cidr_sync_core::key::ObjectKey;
use k8s_openapi::api::core::v1::Node;
use log::debug;

use crate::cache::WatchCache;

use super::{claims::CidrClaims, error::ReconcilerError, is_deleting, pod_cidr, Reconcile};

/// Keeps a claim open for every live node without a CIDR, and releases
/// the claim of every node that is gone.
pub struct NodeReconciler<C: CidrClaims> {
    nodes: WatchCache<Node>,
    claims: C,
}

impl<C: CidrClaims> NodeReconciler<C> {
    pub fn new(nodes: WatchCache<Node>, claims: C) -> Self {
        Self { nodes, claims }
    }
}

#[async_trait]
impl<C: CidrClaims> Reconcile for NodeReconciler<C> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcilerError> {
        if key.namespace.is_some() {
            return Err(ReconcilerError::UnexpectedKey(key.to_string()));
        }

        match self.nodes.get(key) {
            Some(node) if !is_deleting(&node) => match pod_cidr(&node) {
                Some(cidr) => {
                    debug!("Node '{key}' already has CIDR {cidr}");
                    Ok(())
                }
                None => self.claims.claim(&node).await,
            },
            _ => self.claims.release(&key.name).await,
        }
    }
}
