use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::Resource;
use tracing::{debug, warn};

use super::lib::Result;
use crate::controller::utils::context::Context;

#[async_trait]
pub trait IReconcilable: Resource<DynamicType = ()> + Send + Sync {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action>;
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action>;

    /// Publishes an event against this object. Failures are logged, never returned.
    async fn record_event(
        &self,
        recorder: &Recorder,
        reason: &str,
        message: &str,
        event_type: EventType,
    ) {
        let event = Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: reason.to_string(),
            secondary: None,
        };

        match recorder.publish(event).await {
            Ok(()) => debug!(reason, "event recorded: {}", message),
            Err(e) => warn!(reason, "failed to record event: {:?}", e),
        }
    }
}
