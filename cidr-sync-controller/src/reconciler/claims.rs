use std::sync::Arc;

use async_trait::async_trait;
use cidr_sync_core::{
    config::ControllerConfig,
    kubernetes::ensure_owner_reference,
    resources::crd::v1alpha1::ipaddressallocation::{
        AddressBlockVisibility, IpAddressAllocation, IpAddressAllocationSpec,
    },
};
use k8s_openapi::{api::core::v1::Node, apimachinery::pkg::apis::meta::v1::OwnerReference};
use kube::{core::ObjectMeta, ResourceExt};
use log::{debug, info};

use crate::{
    pool::{PoolStrategy, RequestChange},
    store::ObjectStore,
};

use super::error::ReconcilerError;

/// Requests and releases address blocks on behalf of nodes.
#[async_trait]
pub trait CidrClaims: Send + Sync + 'static {
    async fn claim(&self, node: &Node) -> Result<(), ReconcilerError>;
    async fn release(&self, node_name: &str) -> Result<(), ReconcilerError>;
}

/// Claims through one shared pool per cluster.
pub struct PoolClaims<P: PoolStrategy> {
    pools: Arc<P>,
    namespace: String,
    cluster_name: String,
    owner: OwnerReference,
}

impl<P: PoolStrategy> PoolClaims<P> {
    pub fn new(pools: Arc<P>, config: &ControllerConfig) -> Self {
        Self {
            pools,
            namespace: config.cluster_namespace.clone(),
            cluster_name: config.cluster_name.clone(),
            owner: config.owner.clone(),
        }
    }

    async fn fetch_or_create(&self) -> Result<P::Pool, ReconcilerError> {
        let error = match self.pools.get(&self.namespace, &self.cluster_name).await {
            Ok(pool) => return Ok(pool),
            Err(error) => error,
        };

        if !error.is_not_found() {
            return Err(error.into());
        }

        match self
            .pools
            .create(&self.namespace, &self.cluster_name, &self.owner)
            .await
        {
            Ok(pool) => Ok(pool),
            Err(error) if error.is_already_exists() => {
                debug!("Pool '{}' was created concurrently", self.cluster_name);

                Ok(self.pools.get(&self.namespace, &self.cluster_name).await?)
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl<P: PoolStrategy> CidrClaims for PoolClaims<P> {
    async fn claim(&self, node: &Node) -> Result<(), ReconcilerError> {
        let pool = self.fetch_or_create().await?;

        match self.pools.add_request(node, &pool, &self.owner).await? {
            RequestChange::Updated => info!(
                "Requested a subnet for node '{}' from pool '{}/{}'",
                node.name_any(),
                self.namespace,
                self.cluster_name
            ),
            RequestChange::Unchanged => debug!(
                "Node '{}' already has a pending subnet request",
                node.name_any()
            ),
        }

        Ok(())
    }

    async fn release(&self, node_name: &str) -> Result<(), ReconcilerError> {
        let pool = match self.pools.get(&self.namespace, &self.cluster_name).await {
            Ok(pool) => pool,
            Err(error) if error.is_not_found() => {
                debug!("Pool '{}' is gone, nothing to release", self.cluster_name);
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        if self.pools.remove_request(node_name, &pool).await? == RequestChange::Updated {
            info!("Released the subnet request of node '{node_name}'");
        }

        Ok(())
    }
}

/// Claims through one allocation object per node.
pub struct AllocationClaims {
    store: Arc<dyn ObjectStore<IpAddressAllocation>>,
    namespace: String,
    owner: OwnerReference,
    visibility: AddressBlockVisibility,
    allocation_size: u32,
}

impl AllocationClaims {
    pub fn new(store: Arc<dyn ObjectStore<IpAddressAllocation>>, config: &ControllerConfig) -> Self {
        Self {
            store,
            namespace: config.cluster_namespace.clone(),
            owner: config.owner.clone(),
            visibility: config.allocation_visibility,
            allocation_size: config.allocation_size,
        }
    }

    fn new_allocation(&self, node_name: &str) -> IpAddressAllocation {
        let mut allocation = IpAddressAllocation {
            metadata: ObjectMeta {
                name: Some(node_name.to_owned()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: IpAddressAllocationSpec {
                ip_address_block_visibility: self.visibility,
                allocation_size: self.allocation_size,
            },
            status: None,
        };
        ensure_owner_reference(&mut allocation.metadata, &self.owner);

        allocation
    }
}

#[async_trait]
impl CidrClaims for AllocationClaims {
    async fn claim(&self, node: &Node) -> Result<(), ReconcilerError> {
        let node_name = node.name_any();

        match self.store.get(&self.namespace, &node_name).await {
            Ok(_) => {
                debug!("Node '{node_name}' already has an allocation");
                return Ok(());
            }
            Err(error) if !error.is_not_found() => return Err(error.into()),
            Err(_) => (),
        }

        match self.store.create(&self.new_allocation(&node_name)).await {
            Ok(_) => {
                info!("Created an address allocation for node '{node_name}'");
                Ok(())
            }
            Err(error) if error.is_already_exists() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn release(&self, node_name: &str) -> Result<(), ReconcilerError> {
        match self.store.delete(&self.namespace, node_name).await {
            Ok(()) => {
                info!("Deleted the address allocation of node '{node_name}'");
                Ok(())
            }
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
