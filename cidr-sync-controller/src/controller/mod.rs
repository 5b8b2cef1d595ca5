use std::{fmt::Debug, sync::Arc};

use cidr_sync_core::{
    config::{PoolVersion, Topology},
    kubernetes::GetApi,
    resources::crd::{
        v1alpha1::{ipaddressallocation::IpAddressAllocation, subnetpool as v1alpha1},
        v1beta1::subnetpool as v1beta1,
    },
};
use futures::future::join;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher;
use log::info;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    cache::watch_cache,
    pool::{RequestTemplate, SubnetPoolSchema, SubnetPools},
    queue::WorkQueue,
    reconciler::{
        allocation::AllocationReconciler,
        claims::{AllocationClaims, PoolClaims},
        context::ControllerContext,
        node::NodeReconciler,
        pool::PoolReconciler,
    },
};

use self::{
    shutdown::Shutdown,
    watch::{allocation_event_keys, node_event_keys, pool_event_keys, run_resync, run_watch},
    worker::{Controller, ControllerError},
};

pub mod shutdown;
pub mod watch;
pub mod worker;

pub const NODE_CONTROLLER: &str = "node-cidr";
pub const POOL_CONTROLLER: &str = "subnet-pool";
pub const ALLOCATION_CONTROLLER: &str = "ip-address-allocation";

/// Runs the controllers of the configured topology until `shutdown` fires.
pub async fn run_controllers(
    context: &ControllerContext,
    shutdown: Shutdown,
) -> Result<(), ControllerError> {
    let config = &context.config;

    info!(
        "Running {} topology for cluster '{}/{}'",
        config.topology, config.cluster_namespace, config.cluster_name
    );

    match (config.topology, config.pool_version) {
        (Topology::SharedPool, PoolVersion::V1Alpha1) => {
            run_shared_pool::<v1alpha1::SubnetPool>(context, shutdown).await
        }
        (Topology::SharedPool, PoolVersion::V1Beta1) => {
            run_shared_pool::<v1beta1::SubnetPool>(context, shutdown).await
        }
        (Topology::PerNodeAllocation, _) => run_per_node_allocation(context, shutdown).await,
    }
}

async fn run_shared_pool<S>(
    context: &ControllerContext,
    shutdown: Shutdown,
) -> Result<(), ControllerError>
where
    S: SubnetPoolSchema + Serialize + DeserializeOwned + Debug,
{
    let config = &context.config;
    let (nodes, node_feeder) = watch_cache::<Node>();
    let (pools, pool_feeder) = watch_cache::<S>();
    let strategy = Arc::new(SubnetPools::new(
        Arc::new(context.store.clone()),
        pools.clone(),
        RequestTemplate::from(config),
    ));
    let node_queue = Arc::new(WorkQueue::default());
    let pool_queue = Arc::new(WorkQueue::default());

    tokio::spawn(run_watch(
        context.client.global_api::<Node>(),
        watcher::Config::default(),
        node_feeder,
        node_queue.clone(),
        node_event_keys,
        shutdown.clone(),
    ));
    tokio::spawn(run_watch(
        context
            .client
            .namespaced_api::<S>(&config.cluster_namespace),
        watcher::Config::default().fields(&format!("metadata.name={}", config.cluster_name)),
        pool_feeder,
        pool_queue.clone(),
        {
            let strategy = strategy.clone();
            move |delta| pool_event_keys(strategy.as_ref(), delta)
        },
        shutdown.clone(),
    ));
    tokio::spawn(run_resync(
        nodes.clone(),
        node_queue.clone(),
        config.resync_period,
        shutdown.clone(),
    ));
    tokio::spawn(run_resync(
        pools.clone(),
        pool_queue.clone(),
        config.resync_period,
        shutdown.clone(),
    ));

    let node_controller = Controller::new(
        NODE_CONTROLLER,
        NodeReconciler::new(nodes.clone(), PoolClaims::new(strategy.clone(), config)),
        node_queue,
        config.workers,
    );
    let pool_controller = Controller::new(
        POOL_CONTROLLER,
        PoolReconciler::new(strategy, nodes.clone(), context.patcher()),
        pool_queue,
        config.workers,
    );

    let timeout = config.cache_sync_timeout;
    let node_synced = {
        let nodes = nodes.clone();
        async move { nodes.wait_synced(timeout).await }
    };
    let pool_synced = async move {
        let (nodes_synced, pools_synced) =
            join(nodes.wait_synced(timeout), pools.wait_synced(timeout)).await;

        nodes_synced && pools_synced
    };

    tokio::try_join!(
        node_controller.run(node_synced, shutdown.clone()),
        pool_controller.run(pool_synced, shutdown),
    )
    .map(|_| ())
}

async fn run_per_node_allocation(
    context: &ControllerContext,
    shutdown: Shutdown,
) -> Result<(), ControllerError> {
    let config = &context.config;
    let (nodes, node_feeder) = watch_cache::<Node>();
    let (allocations, allocation_feeder) = watch_cache::<IpAddressAllocation>();
    let node_queue = Arc::new(WorkQueue::default());
    let allocation_queue = Arc::new(WorkQueue::default());

    tokio::spawn(run_watch(
        context.client.global_api::<Node>(),
        watcher::Config::default(),
        node_feeder,
        node_queue.clone(),
        node_event_keys,
        shutdown.clone(),
    ));
    tokio::spawn(run_watch(
        context
            .client
            .namespaced_api::<IpAddressAllocation>(&config.cluster_namespace),
        watcher::Config::default(),
        allocation_feeder,
        allocation_queue.clone(),
        allocation_event_keys,
        shutdown.clone(),
    ));
    tokio::spawn(run_resync(
        nodes.clone(),
        node_queue.clone(),
        config.resync_period,
        shutdown.clone(),
    ));
    tokio::spawn(run_resync(
        allocations.clone(),
        allocation_queue.clone(),
        config.resync_period,
        shutdown.clone(),
    ));

    let node_controller = Controller::new(
        NODE_CONTROLLER,
        NodeReconciler::new(
            nodes.clone(),
            AllocationClaims::new(Arc::new(context.store.clone()), config),
        ),
        node_queue,
        config.workers,
    );
    let allocation_controller = Controller::new(
        ALLOCATION_CONTROLLER,
        AllocationReconciler::new(allocations.clone(), nodes.clone(), context.patcher()),
        allocation_queue,
        config.workers,
    );

    let timeout = config.cache_sync_timeout;
    let node_synced = {
        let nodes = nodes.clone();
        async move { nodes.wait_synced(timeout).await }
    };
    let allocation_synced = async move {
        let (nodes_synced, allocations_synced) =
            join(nodes.wait_synced(timeout), allocations.wait_synced(timeout)).await;

        nodes_synced && allocations_synced
    };

    tokio::try_join!(
        node_controller.run(node_synced, shutdown.clone()),
        allocation_controller.run(allocation_synced, shutdown),
    )
    .map(|_| ())
}
