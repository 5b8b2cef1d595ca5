use async_trait::async_trait;
use cidr_sync_core::key::ObjectKey;
use k8s_openapi::api::core::v1::Node;
use kube::Resource;

use self::error::ReconcilerError;

pub mod allocation;
pub mod claims;
pub mod context;
pub mod error;
pub mod node;
pub mod patch;
pub mod pool;

/// A single pass over the object addressed by `key`. Implementations read
/// the latest cached state and must be safe to run any number of times.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcilerError>;
}

/// The node's current pod CIDR, if either CIDR field carries one.
pub fn pod_cidr(node: &Node) -> Option<&str> {
    let spec = node.spec.as_ref()?;

    spec.pod_cidr
        .as_deref()
        .filter(|cidr| !cidr.is_empty())
        .or_else(|| {
            spec.pod_cidrs
                .as_ref()
                .and_then(|cidrs| cidrs.first())
                .map(String::as_str)
                .filter(|cidr| !cidr.is_empty())
        })
}

pub fn is_deleting(node: &Node) -> bool {
    node.meta().deletion_timestamp.is_some()
}

pub(crate) fn require_namespaced(key: &ObjectKey) -> Result<&str, ReconcilerError> {
    key.namespace
        .as_deref()
        .ok_or_else(|| ReconcilerError::UnexpectedKey(key.to_string()))
}
