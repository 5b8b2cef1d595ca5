use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resources::{SubnetRequest, SubnetResult};

#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "networking.cidr-sync.dev",
    version = "v1beta1",
    kind = "SubnetPool",
    namespaced,
    status = "SubnetPoolStatus",
    derive = "Default"
)]
pub struct SubnetPoolSpec {
    /// per-node block requests, at most one per node name
    #[serde(default)]
    pub subnet_requests: Vec<SubnetRequest>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetPoolStatus {
    /// blocks realized by the allocator, keyed by request name
    #[serde(default)]
    pub subnet_results: Vec<SubnetResult>,
}
