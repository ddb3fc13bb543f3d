//! Kubernetes Event recording
//!
//! User-visible failures surface as conditions and as Events on the pool
//! (`kubectl describe awsmachinepool`). Events are fire-and-forget: a failed
//! publish is logged and never fails the reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes Kubernetes Events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` is the reportingComponent on every Event
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Drops every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Launch template reconciliation failed
    pub const FAILED_LAUNCH_TEMPLATE_RECONCILE: &str = "FailedLaunchTemplateReconcile";
    /// No ASG or launch template found while deleting
    pub const ASG_NOT_FOUND: &str = "ASGNotFound";
    /// ASG deletion already running
    pub const DELETION_IN_PROGRESS: &str = "DeletionInProgress";
    /// Deleting the ASG or launch template failed
    pub const FAILED_DELETE: &str = "FailedDelete";
    /// Updating the ASG failed
    pub const FAILED_UPDATE: &str = "FailedUpdate";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Normal reconciliation
    pub const RECONCILE: &str = "Reconcile";
    /// Deletion handling
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
        assert_send_sync::<KubeEventPublisher>();
    }

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::FAILED_UPDATE,
                actions::RECONCILE,
                Some("update rejected".to_string()),
            )
            .await;
    }
}
