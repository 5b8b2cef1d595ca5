use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    sync::Arc,
};

use async_trait::async_trait;
use cidr_sync_core::{
    config::ControllerConfig,
    key::ObjectKey,
    kubernetes::ensure_owner_reference,
    resources::{IpFamily, SubnetRequest, SubnetResult},
};
use ipnet::IpNet;
use k8s_openapi::{
    api::core::v1::Node, apimachinery::pkg::apis::meta::v1::OwnerReference,
    NamespaceResourceScope,
};
use kube::{Resource, ResourceExt};
use log::info;
use thiserror::Error;

use crate::{
    cache::WatchCache,
    store::{ObjectStore, StoreError},
};

pub mod v1alpha1;
pub mod v1beta1;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Result for '{}' contains an invalid CIDR '{}'!", .0, .1)]
    InvalidCidr(String, String),
    #[error("Results contain conflicting CIDRs for '{}'!", .0)]
    ConflictingResults(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestChange {
    Unchanged,
    Updated,
}

/// Pool operations the reconcilers rely on, independent of the pool resource version.
#[async_trait]
pub trait PoolStrategy: Send + Sync + 'static {
    type Pool: Resource + Clone + Debug + Send + Sync + 'static;

    async fn get(&self, namespace: &str, cluster_name: &str) -> Result<Self::Pool, StoreError>;

    fn get_from_cache(&self, key: &ObjectKey) -> Option<Arc<Self::Pool>>;

    async fn create(
        &self,
        namespace: &str,
        cluster_name: &str,
        owner: &OwnerReference,
    ) -> Result<Self::Pool, StoreError>;

    /// Adds a request for `node` unless one already exists. Makes no remote
    /// call when the pool already holds the request and the owner reference.
    async fn add_request(
        &self,
        node: &Node,
        pool: &Self::Pool,
        owner: &OwnerReference,
    ) -> Result<RequestChange, StoreError>;

    /// Removes the request named `node_name`. Makes no remote call when there is none.
    async fn remove_request(
        &self,
        node_name: &str,
        pool: &Self::Pool,
    ) -> Result<RequestChange, StoreError>;

    /// Realized blocks keyed by node name. Results without a CIDR are skipped.
    fn realized_results(&self, pool: &Self::Pool) -> Result<BTreeMap<String, String>, PoolError>;

    /// Whether the realized results differ. Request-only changes don't count.
    fn has_meaningful_change(&self, old: &Self::Pool, new: &Self::Pool) -> bool;
}

/// Field layout of one `SubnetPool` resource version.
pub trait SubnetPoolSchema:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Send + Sync + 'static
{
    fn new_pool(namespace: &str, name: &str) -> Self;
    fn requests(&self) -> &[SubnetRequest];
    fn requests_mut(&mut self) -> &mut Vec<SubnetRequest>;
    fn results(&self) -> &[SubnetResult];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTemplate {
    pub ip_family: IpFamily,
    pub prefix_length: u8,
}

impl From<&ControllerConfig> for RequestTemplate {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            ip_family: config.ip_family,
            prefix_length: config.prefix_length,
        }
    }
}

/// [`PoolStrategy`] over any [`SubnetPoolSchema`], fixed to one resource version at construction.
pub struct SubnetPools<S: SubnetPoolSchema> {
    store: Arc<dyn ObjectStore<S>>,
    cache: WatchCache<S>,
    template: RequestTemplate,
}

impl<S: SubnetPoolSchema> SubnetPools<S> {
    pub fn new(
        store: Arc<dyn ObjectStore<S>>,
        cache: WatchCache<S>,
        template: RequestTemplate,
    ) -> Self {
        Self {
            store,
            cache,
            template,
        }
    }
}

pub fn parse_cidr(name: &str, cidr: &str) -> Result<IpNet, PoolError> {
    cidr.trim()
        .parse::<IpNet>()
        .map_err(|_| PoolError::InvalidCidr(name.to_owned(), cidr.to_owned()))
}

fn result_set(results: &[SubnetResult]) -> BTreeSet<(&str, &str)> {
    results
        .iter()
        .map(|result| (result.name.as_str(), result.cidr.trim()))
        .collect()
}

#[async_trait]
impl<S: SubnetPoolSchema> PoolStrategy for SubnetPools<S> {
    type Pool = S;

    async fn get(&self, namespace: &str, cluster_name: &str) -> Result<S, StoreError> {
        self.store.get(namespace, cluster_name).await
    }

    fn get_from_cache(&self, key: &ObjectKey) -> Option<Arc<S>> {
        self.cache.get(key)
    }

    async fn create(
        &self,
        namespace: &str,
        cluster_name: &str,
        owner: &OwnerReference,
    ) -> Result<S, StoreError> {
        let mut pool = S::new_pool(namespace, cluster_name);
        ensure_owner_reference(pool.meta_mut(), owner);

        info!("Creating subnet pool '{namespace}/{cluster_name}'...");

        self.store.create(&pool).await
    }

    async fn add_request(
        &self,
        node: &Node,
        pool: &S,
        owner: &OwnerReference,
    ) -> Result<RequestChange, StoreError> {
        let node_name = node.name_any();
        let mut updated = pool.clone();
        let owner_added = ensure_owner_reference(updated.meta_mut(), owner);
        let request_exists = updated
            .requests()
            .iter()
            .any(|request| request.name == node_name);

        if request_exists && !owner_added {
            return Ok(RequestChange::Unchanged);
        }

        if !request_exists {
            updated.requests_mut().push(SubnetRequest {
                name: node_name,
                ip_family: self.template.ip_family,
                prefix_length: self.template.prefix_length,
            });
        }

        self.store.replace(&updated).await?;

        Ok(RequestChange::Updated)
    }

    async fn remove_request(&self, node_name: &str, pool: &S) -> Result<RequestChange, StoreError> {
        if !pool.requests().iter().any(|request| request.name == node_name) {
            return Ok(RequestChange::Unchanged);
        }

        let mut updated = pool.clone();
        updated
            .requests_mut()
            .retain(|request| request.name != node_name);

        self.store.replace(&updated).await?;

        Ok(RequestChange::Updated)
    }

    fn realized_results(&self, pool: &S) -> Result<BTreeMap<String, String>, PoolError> {
        let mut realized = BTreeMap::new();

        for result in pool.results() {
            let cidr = result.cidr.trim();

            if cidr.is_empty() {
                continue;
            }

            parse_cidr(&result.name, cidr)?;

            if let Some(previous) = realized.insert(result.name.clone(), cidr.to_owned()) {
                if previous != cidr {
                    return Err(PoolError::ConflictingResults(result.name.clone()));
                }
            }
        }

        Ok(realized)
    }

    fn has_meaningful_change(&self, old: &S, new: &S) -> bool {
        result_set(old.results()) != result_set(new.results())
    }
}
