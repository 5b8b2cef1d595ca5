use thiserror::Error;

use crate::{pool::PoolError, store::StoreError};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Key '{}' doesn't address a resource handled by this reconciler!", .0)]
    UnexpectedKey(String),
    #[error("Remote store operation failed! Reason: {}", .0)]
    StoreError(StoreError),
    #[error("Pool contains invalid data! Reason: {}", .0)]
    PoolError(PoolError),
    #[error("Allocation '{}' is not ready yet!", .0)]
    AllocationNotReady(String),
    #[error("Allocation '{}' is ready but has no CIDR!", .0)]
    AllocationMissingCidr(String),
    #[error("Couldn't assign a CIDR to node '{}' after {} attempts! Reason: {}", .node, .attempts, .source)]
    PatchRetriesExhausted {
        node: String,
        attempts: u32,
        source: StoreError,
    },
}

impl ReconcilerError {
    /// Errors that no amount of retrying will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ReconcilerError::UnexpectedKey(_))
    }
}

impl From<StoreError> for ReconcilerError {
    fn from(error: StoreError) -> Self {
        ReconcilerError::StoreError(error)
    }
}

impl From<PoolError> for ReconcilerError {
    fn from(error: PoolError) -> Self {
        ReconcilerError::PoolError(error)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::server_error;

    use super::ReconcilerError;

    #[test]
    fn only_wrong_keys_are_permanent() {
        assert!(ReconcilerError::UnexpectedKey("capi-system/worker-1".to_owned()).is_permanent());
        assert!(!ReconcilerError::AllocationNotReady("worker-1".to_owned()).is_permanent());
        assert!(!ReconcilerError::from(server_error()).is_permanent());
    }
}
