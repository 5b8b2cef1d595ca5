use cidr_sync_core::resources::{
    crd::v1beta1::subnetpool::{SubnetPool, SubnetPoolSpec},
    SubnetRequest, SubnetResult,
};
use kube::core::ObjectMeta;

use super::SubnetPoolSchema;

impl SubnetPoolSchema for SubnetPool {
    fn new_pool(namespace: &str, name: &str) -> Self {
        SubnetPool {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                ..Default::default()
            },
            spec: SubnetPoolSpec::default(),
            status: None,
        }
    }

    fn requests(&self) -> &[SubnetRequest] {
        &self.spec.subnet_requests
    }

    fn requests_mut(&mut self) -> &mut Vec<SubnetRequest> {
        &mut self.spec.subnet_requests
    }

    fn results(&self) -> &[SubnetResult] {
        self.status
            .as_ref()
            .map(|status| status.subnet_results.as_slice())
            .unwrap_or_default()
    }
}
