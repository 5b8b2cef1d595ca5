use std::sync::Arc;

use cidr_sync_core::kubernetes::operations::node_cidr_patch;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use log::{info, warn};

use crate::{
    events::EventRecorder,
    store::{NodeStore, StoreError},
};

use super::error::ReconcilerError;

pub const PATCH_ATTEMPTS: u32 = 3;
pub const CIDR_ASSIGNMENT_FAILED_REASON: &str = "CIDRAssignmentFailed";

/// Writes realized CIDRs onto nodes.
#[derive(Clone)]
pub struct NodePatcher {
    nodes: Arc<dyn NodeStore>,
    recorder: Arc<dyn EventRecorder>,
}

impl NodePatcher {
    pub fn new(nodes: Arc<dyn NodeStore>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self { nodes, recorder }
    }

    pub async fn patch_node_cidr(&self, node_name: &str, cidr: &str) -> Result<Node, StoreError> {
        self.nodes
            .patch_node(node_name, &node_cidr_patch(cidr))
            .await
    }

    /// Patches `node` with `cidr`, trying up to [`PATCH_ATTEMPTS`] times.
    /// A node deleted in the meantime counts as success. After the last
    /// failed attempt a warning event is recorded against the node.
    pub async fn patch_with_retry(&self, node: &Node, cidr: &str) -> Result<(), ReconcilerError> {
        let node_name = node.name_any();
        let mut attempt = 1;

        loop {
            let error = match self.patch_node_cidr(&node_name, cidr).await {
                Ok(_) => {
                    info!("Assigned CIDR {cidr} to node '{node_name}'");
                    return Ok(());
                }
                Err(error) if error.is_not_found() => {
                    info!("Node '{node_name}' is gone, skipping CIDR assignment");
                    return Ok(());
                }
                Err(error) => error,
            };

            if attempt >= PATCH_ATTEMPTS {
                self.record_failure(node, cidr, &error).await;

                return Err(ReconcilerError::PatchRetriesExhausted {
                    node: node_name,
                    attempts: attempt,
                    source: error,
                });
            }

            warn!("Patching node '{node_name}' failed (attempt {attempt}/{PATCH_ATTEMPTS}): {error}");

            match self.nodes.get_node(&node_name).await {
                Err(StoreError::NotFound(..)) => {
                    info!("Node '{node_name}' was deleted while assigning its CIDR");
                    return Ok(());
                }
                Err(err) => warn!("Couldn't re-read node '{node_name}' before retrying: {err}"),
                Ok(_) => (),
            }

            attempt += 1;
        }
    }

    async fn record_failure(&self, node: &Node, cidr: &str, error: &StoreError) {
        let note = format!("Couldn't assign CIDR {cidr} after {PATCH_ATTEMPTS} attempts: {error}");

        if let Err(record_error) = self
            .recorder
            .record_failure(node, CIDR_ASSIGNMENT_FAILED_REASON, &note)
            .await
        {
            warn!(
                "Couldn't record {CIDR_ASSIGNMENT_FAILED_REASON} event for node '{}': {record_error}",
                node.name_any()
            );
        }
    }
}
