use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
#[cfg(test)]
use mockall::automock;

pub const CONTROLLER_NAME: &str = "cidr-sync-controller";
pub const ASSIGN_POD_CIDR_ACTION: &str = "AssignPodCIDR";

/// Publishes warning events against nodes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record_failure(&self, node: &Node, reason: &str, note: &str)
        -> Result<(), kube::Error>;
}

pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_owned(),
                instance: None,
            },
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record_failure(
        &self,
        node: &Node,
        reason: &str,
        note: &str,
    ) -> Result<(), kube::Error> {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            node.object_ref(&()),
        );

        recorder
            .publish(Event {
                type_: EventType::Warning,
                reason: reason.to_owned(),
                note: Some(note.to_owned()),
                action: ASSIGN_POD_CIDR_ACTION.to_owned(),
                secondary: None,
            })
            .await
    }
}
