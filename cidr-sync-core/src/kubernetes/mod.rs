use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::OwnerReference, ClusterResourceScope,
    NamespaceResourceScope,
};
use kube::{core::ObjectMeta, Api, Client, Resource};
use serde::de::DeserializeOwned;

pub mod operations;

pub trait GetApi {
    fn global_api<T>(&self) -> Api<T>
    where
        T: Resource<Scope = ClusterResourceScope, DynamicType = ()> + DeserializeOwned;

    fn namespaced_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + DeserializeOwned;
}

impl GetApi for Client {
    fn global_api<T>(&self) -> Api<T>
    where
        T: Resource<Scope = ClusterResourceScope, DynamicType = ()> + DeserializeOwned,
    {
        Api::all(self.clone())
    }

    fn namespaced_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + DeserializeOwned,
    {
        Api::namespaced(self.clone(), namespace)
    }
}

/// Appends `owner` unless a reference with the same uid is already present.
/// Returns whether the metadata changed.
pub fn ensure_owner_reference(meta: &mut ObjectMeta, owner: &OwnerReference) -> bool {
    let references = meta.owner_references.get_or_insert_with(Vec::new);

    if references.iter().any(|reference| reference.uid == owner.uid) {
        return false;
    }

    references.push(owner.clone());

    true
}
