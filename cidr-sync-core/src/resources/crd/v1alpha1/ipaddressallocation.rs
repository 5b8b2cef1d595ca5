use std::{fmt::Display, str::FromStr};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::resources::UnknownVariant;

pub const READY_CONDITION: &str = "Ready";

#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "networking.cidr-sync.dev",
    version = "v1alpha1",
    kind = "IpAddressAllocation",
    namespaced,
    status = "IpAddressAllocationStatus",
    derive = "Default"
)]
pub struct IpAddressAllocationSpec {
    /// whether the block should be routable from outside the cluster network
    pub ip_address_block_visibility: AddressBlockVisibility,
    /// number of addresses requested for the node
    pub allocation_size: u32,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressAllocationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// realized block, set by the allocator together with the Ready condition
    pub cidr: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum AddressBlockVisibility {
    Public,
    #[default]
    Private,
}

impl FromStr for AddressBlockVisibility {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Public" | "public" => Ok(AddressBlockVisibility::Public),
            "Private" | "private" => Ok(AddressBlockVisibility::Private),
            _ => Err(UnknownVariant(s.to_owned())),
        }
    }
}

impl Display for AddressBlockVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressBlockVisibility::Public => f.write_str("Public"),
            AddressBlockVisibility::Private => f.write_str("Private"),
        }
    }
}

impl IpAddressAllocationStatus {
    /// The most recently transitioned `Ready` condition. Conditions sharing a
    /// transition time resolve to the one listed last.
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .filter(|condition| condition.type_ == READY_CONDITION)
            .max_by_key(|condition| condition.last_transition_time.0)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_condition()
            .map(|condition| condition.status == "True")
            .unwrap_or(false)
    }

    /// The realized block, ignoring blank values.
    pub fn realized_cidr(&self) -> Option<&str> {
        self.cidr
            .as_deref()
            .map(str::trim)
            .filter(|cidr| !cidr.is_empty())
    }
}
