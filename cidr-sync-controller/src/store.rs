use std::fmt::Debug;

use async_trait::async_trait;
use cidr_sync_core::{
    helpers::{pretty_type_name, RequireMetadata},
    kubernetes::{
        operations::{is_already_exists, is_conflict, is_not_found},
        GetApi,
    },
    CONTROLLER_FIELD_MANAGER,
};
use k8s_openapi::{api::core::v1::Node, NamespaceResourceScope};
use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    Client, Resource,
};
#[cfg(test)]
use mockall::automock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{} '{}' was not found!", .0, .1)]
    NotFound(&'static str, String),
    #[error("{} '{}' already exists!", .0, .1)]
    AlreadyExists(&'static str, String),
    #[error("{} '{}' was modified concurrently!", .0, .1)]
    Conflict(&'static str, String),
    #[error("Object is missing metadata!")]
    MissingObjectMetadata,
    #[error("Kubernetes API call failed! Reason: {}", .0)]
    KubeApiError(kube::Error),
}

impl StoreError {
    pub fn from_kube<K>(name: &str, error: kube::Error) -> Self {
        let kind = pretty_type_name::<K>();

        if is_not_found(&error) {
            StoreError::NotFound(kind, name.to_owned())
        } else if is_already_exists(&error) {
            StoreError::AlreadyExists(kind, name.to_owned())
        } else if is_conflict(&error) {
            StoreError::Conflict(kind, name.to_owned())
        } else {
            StoreError::KubeApiError(error)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(..))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(..))
    }
}

/// Remote read/write access to namespaced custom resources (pools and allocations).
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError>;
    async fn create(&self, object: &K) -> Result<K, StoreError>;
    /// Optimistic-concurrency write, fails with [`StoreError::Conflict`] on a stale resource version.
    async fn replace(&self, object: &K) -> Result<K, StoreError>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Node, StoreError>;
    async fn patch_node(&self, name: &str, patch: &Value) -> Result<Node, StoreError>;
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn post_params() -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(CONTROLLER_FIELD_MANAGER.to_owned()),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.client
            .namespaced_api::<K>(namespace)
            .get(name)
            .await
            .map_err(|err| StoreError::from_kube::<K>(name, err))
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let name = object.require_name_or(StoreError::MissingObjectMetadata)?;
        let namespace = object.require_namespace_or(StoreError::MissingObjectMetadata)?;

        self.client
            .namespaced_api::<K>(namespace)
            .create(&post_params(), object)
            .await
            .map_err(|err| StoreError::from_kube::<K>(name, err))
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let name = object.require_name_or(StoreError::MissingObjectMetadata)?;
        let namespace = object.require_namespace_or(StoreError::MissingObjectMetadata)?;

        self.client
            .namespaced_api::<K>(namespace)
            .replace(name, &post_params(), object)
            .await
            .map_err(|err| StoreError::from_kube::<K>(name, err))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.client
            .namespaced_api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|err| StoreError::from_kube::<K>(name, err))
    }
}

#[async_trait]
impl NodeStore for KubeStore {
    async fn get_node(&self, name: &str) -> Result<Node, StoreError> {
        self.client
            .global_api::<Node>()
            .get(name)
            .await
            .map_err(|err| StoreError::from_kube::<Node>(name, err))
    }

    async fn patch_node(&self, name: &str, patch: &Value) -> Result<Node, StoreError> {
        let patch_params = PatchParams {
            field_manager: Some(CONTROLLER_FIELD_MANAGER.to_owned()),
            ..Default::default()
        };

        self.client
            .global_api::<Node>()
            .patch(name, &patch_params, &Patch::Merge(patch))
            .await
            .map_err(|err| StoreError::from_kube::<Node>(name, err))
    }
}
