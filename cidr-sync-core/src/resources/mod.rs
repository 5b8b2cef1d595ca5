use std::{fmt::Display, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod crd;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum IpFamily {
    #[default]
    #[serde(rename = "IPv4")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
}

impl IpFamily {
    pub fn max_prefix_length(&self) -> u8 {
        match self {
            IpFamily::Ipv4 => 32,
            IpFamily::Ipv6 => 128,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{}' is not a known value!", .0)]
pub struct UnknownVariant(pub String);

impl FromStr for IpFamily {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IPv4" | "ipv4" => Ok(IpFamily::Ipv4),
            "IPv6" | "ipv6" => Ok(IpFamily::Ipv6),
            _ => Err(UnknownVariant(s.to_owned())),
        }
    }
}

impl Display for IpFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpFamily::Ipv4 => f.write_str("IPv4"),
            IpFamily::Ipv6 => f.write_str("IPv6"),
        }
    }
}

/// A named request for an address block, keyed by node name.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetRequest {
    pub name: String,
    pub ip_family: IpFamily,
    pub prefix_length: u8,
}

/// A block realized by the external allocator for a previously requested name.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetResult {
    pub name: String,
    #[serde(default)]
    pub cidr: String,
}
