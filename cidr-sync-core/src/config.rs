use std::{borrow::Cow, env::var, fmt::Display, str::FromStr, time::Duration};

use derive_builder::Builder;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use thiserror::Error;

use crate::resources::{
    crd::v1alpha1::ipaddressallocation::AddressBlockVisibility, IpFamily, UnknownVariant,
};

pub const CLUSTER_NAME_ENV: &str = "CIDR_SYNC_CLUSTER_NAME";
pub const CLUSTER_NAMESPACE_ENV: &str = "CIDR_SYNC_CLUSTER_NAMESPACE";
pub const OWNER_API_VERSION_ENV: &str = "CIDR_SYNC_OWNER_API_VERSION";
pub const OWNER_KIND_ENV: &str = "CIDR_SYNC_OWNER_KIND";
pub const OWNER_NAME_ENV: &str = "CIDR_SYNC_OWNER_NAME";
pub const OWNER_UID_ENV: &str = "CIDR_SYNC_OWNER_UID";
pub const TOPOLOGY_ENV: &str = "CIDR_SYNC_TOPOLOGY";
pub const POOL_VERSION_ENV: &str = "CIDR_SYNC_POOL_VERSION";
pub const RESYNC_SECS_ENV: &str = "CIDR_SYNC_RESYNC_SECS";
pub const WORKERS_ENV: &str = "CIDR_SYNC_WORKERS";
pub const CACHE_SYNC_TIMEOUT_SECS_ENV: &str = "CIDR_SYNC_CACHE_SYNC_TIMEOUT_SECS";
pub const IP_FAMILY_ENV: &str = "CIDR_SYNC_IP_FAMILY";
pub const PREFIX_LENGTH_ENV: &str = "CIDR_SYNC_PREFIX_LENGTH";
pub const ALLOCATION_VISIBILITY_ENV: &str = "CIDR_SYNC_ALLOCATION_VISIBILITY";
pub const ALLOCATION_SIZE_ENV: &str = "CIDR_SYNC_ALLOCATION_SIZE";

pub const DEFAULT_RESYNC_SECS: u64 = 30;
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_PREFIX_LENGTH: u8 = 24;
pub const DEFAULT_ALLOCATION_SIZE: u32 = 256;

/// How address blocks are requested from the external allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Topology {
    /// one pool object per cluster aggregating a request per node
    #[default]
    SharedPool,
    /// one allocation object per node
    PerNodeAllocation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PoolVersion {
    V1Alpha1,
    #[default]
    V1Beta1,
}

#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ControllerConfig {
    pub cluster_name: String,
    pub cluster_namespace: String,
    pub owner: OwnerReference,
    #[builder(default)]
    pub topology: Topology,
    #[builder(default)]
    pub pool_version: PoolVersion,
    #[builder(default = "Duration::from_secs(DEFAULT_RESYNC_SECS)")]
    pub resync_period: Duration,
    #[builder(default = "DEFAULT_WORKERS")]
    pub workers: usize,
    #[builder(default = "Duration::from_secs(DEFAULT_CACHE_SYNC_TIMEOUT_SECS)")]
    pub cache_sync_timeout: Duration,
    #[builder(default)]
    pub ip_family: IpFamily,
    #[builder(default = "DEFAULT_PREFIX_LENGTH")]
    pub prefix_length: u8,
    #[builder(default)]
    pub allocation_visibility: AddressBlockVisibility,
    #[builder(default = "DEFAULT_ALLOCATION_SIZE")]
    pub allocation_size: u32,
}

#[derive(Debug, Error)]
pub enum FromError {
    #[error("Env var {} is unset!", .0)]
    VarUnset(&'static str),
    #[error("Env var {} contains an invalid value: {}", .0, .1)]
    InvalidValue(&'static str, Cow<'static, str>),
    #[error("Configuration is invalid: {}", .0)]
    Invalid(ControllerConfigBuilderError),
}

impl ControllerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.workers == Some(0) {
            return Err("at least one worker is required".to_owned());
        }

        if self.resync_period == Some(Duration::ZERO) {
            return Err("resync period must be positive".to_owned());
        }

        let family = self.ip_family.unwrap_or_default();
        if let Some(prefix_length) = self.prefix_length {
            if prefix_length == 0 || prefix_length > family.max_prefix_length() {
                return Err(format!(
                    "prefix length {prefix_length} is out of range for {family}"
                ));
            }
        }

        Ok(())
    }
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, FromError> {
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FromError> {
        let required = |key: &'static str| lookup(key).ok_or(FromError::VarUnset(key));
        let mut builder = ControllerConfigBuilder::default();

        builder
            .cluster_name(required(CLUSTER_NAME_ENV)?)
            .cluster_namespace(required(CLUSTER_NAMESPACE_ENV)?)
            .owner(OwnerReference {
                api_version: required(OWNER_API_VERSION_ENV)?,
                kind: required(OWNER_KIND_ENV)?,
                name: required(OWNER_NAME_ENV)?,
                uid: required(OWNER_UID_ENV)?,
                ..Default::default()
            });

        if let Some(topology) = parse_optional::<Topology>(&lookup, TOPOLOGY_ENV)? {
            builder.topology(topology);
        }
        if let Some(version) = parse_optional::<PoolVersion>(&lookup, POOL_VERSION_ENV)? {
            builder.pool_version(version);
        }
        if let Some(secs) = parse_optional::<u64>(&lookup, RESYNC_SECS_ENV)? {
            builder.resync_period(Duration::from_secs(secs));
        }
        if let Some(workers) = parse_optional::<usize>(&lookup, WORKERS_ENV)? {
            builder.workers(workers);
        }
        if let Some(secs) = parse_optional::<u64>(&lookup, CACHE_SYNC_TIMEOUT_SECS_ENV)? {
            builder.cache_sync_timeout(Duration::from_secs(secs));
        }
        if let Some(family) = parse_optional::<IpFamily>(&lookup, IP_FAMILY_ENV)? {
            builder.ip_family(family);
        }
        if let Some(prefix_length) = parse_optional::<u8>(&lookup, PREFIX_LENGTH_ENV)? {
            builder.prefix_length(prefix_length);
        }
        if let Some(visibility) =
            parse_optional::<AddressBlockVisibility>(&lookup, ALLOCATION_VISIBILITY_ENV)?
        {
            builder.allocation_visibility(visibility);
        }
        if let Some(size) = parse_optional::<u32>(&lookup, ALLOCATION_SIZE_ENV)? {
            builder.allocation_size(size);
        }

        builder.build().map_err(FromError::Invalid)
    }
}

fn parse_optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, FromError>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|err| FromError::InvalidValue(key, err.to_string().into()))
        })
        .transpose()
}

impl FromStr for Topology {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared-pool" => Ok(Topology::SharedPool),
            "per-node-allocation" => Ok(Topology::PerNodeAllocation),
            _ => Err(UnknownVariant(s.to_owned())),
        }
    }
}

impl FromStr for PoolVersion {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1alpha1" => Ok(PoolVersion::V1Alpha1),
            "v1beta1" => Ok(PoolVersion::V1Beta1),
            _ => Err(UnknownVariant(s.to_owned())),
        }
    }
}

impl Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::SharedPool => f.write_str("shared-pool"),
            Topology::PerNodeAllocation => f.write_str("per-node-allocation"),
        }
    }
}

impl Display for PoolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolVersion::V1Alpha1 => f.write_str("v1alpha1"),
            PoolVersion::V1Beta1 => f.write_str("v1beta1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::*;

    fn required_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (CLUSTER_NAME_ENV, "cluster-a"),
            (CLUSTER_NAMESPACE_ENV, "capi-system"),
            (OWNER_API_VERSION_ENV, "cluster.x-k8s.io/v1beta1"),
            (OWNER_KIND_ENV, "Cluster"),
            (OWNER_NAME_ENV, "cluster-a"),
            (OWNER_UID_ENV, "2f9b2c4e"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<ControllerConfig, FromError> {
        ControllerConfig::from_lookup(|key| vars.get(key).map(|value| value.to_string()))
    }

    #[test]
    fn defaults_are_applied() {
        let config = load(&required_vars()).unwrap();

        assert_eq!(config.topology, Topology::SharedPool);
        assert_eq!(config.pool_version, PoolVersion::V1Beta1);
        assert_eq!(config.resync_period, Duration::from_secs(DEFAULT_RESYNC_SECS));
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.prefix_length, DEFAULT_PREFIX_LENGTH);
        assert_eq!(config.owner.kind, "Cluster");
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = required_vars();
        vars.insert(TOPOLOGY_ENV, "per-node-allocation");
        vars.insert(POOL_VERSION_ENV, "v1alpha1");
        vars.insert(RESYNC_SECS_ENV, "60");
        vars.insert(ALLOCATION_VISIBILITY_ENV, "Public");

        let config = load(&vars).unwrap();

        assert_eq!(config.topology, Topology::PerNodeAllocation);
        assert_eq!(config.pool_version, PoolVersion::V1Alpha1);
        assert_eq!(config.resync_period, Duration::from_secs(60));
        assert_eq!(config.allocation_visibility, AddressBlockVisibility::Public);
    }

    #[test]
    fn missing_required_var_is_reported() {
        let mut vars = required_vars();
        vars.remove(CLUSTER_NAME_ENV);

        assert!(matches!(load(&vars), Err(FromError::VarUnset(CLUSTER_NAME_ENV))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut vars = required_vars();
        vars.insert(TOPOLOGY_ENV, "mesh");
        assert!(matches!(load(&vars), Err(FromError::InvalidValue(TOPOLOGY_ENV, _))));

        let mut vars = required_vars();
        vars.insert(WORKERS_ENV, "0");
        assert!(matches!(load(&vars), Err(FromError::Invalid(_))));

        let mut vars = required_vars();
        vars.insert(PREFIX_LENGTH_ENV, "33");
        assert!(matches!(load(&vars), Err(FromError::Invalid(_))));
    }
}
