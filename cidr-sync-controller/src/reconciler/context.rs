use std::sync::Arc;

use cidr_sync_core::config::ControllerConfig;
use kube::Client;

use crate::{events::EventRecorder, store::KubeStore};

use super::patch::NodePatcher;

/// Everything the controllers share, built once at startup.
pub struct ControllerContext {
    pub config: ControllerConfig,
    pub client: Client,
    pub store: KubeStore,
    pub recorder: Arc<dyn EventRecorder>,
}

impl ControllerContext {
    pub fn patcher(&self) -> NodePatcher {
        NodePatcher::new(Arc::new(self.store.clone()), self.recorder.clone())
    }
}
