use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::info;

use crate::contract::ireconcilable::IReconcilable;
use crate::contract::lib::Result;
use crate::controller::utils::context::Context;
use crate::controller::v1::crd::cluster_csi_driver::{ClusterCSIDriver, ManagementState};

#[async_trait]
impl IReconcilable for ClusterCSIDriver {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        ctx.controllers
            .sync(ctx.clone(), Arc::new(self.clone()))
            .await?;
        Ok(Action::requeue(ctx.config.resync()?))
    }

    /// The driver is being deleted. A removable operator tears its operand down
    /// before the finalizer is released; otherwise the operand is left behind.
    /// Only failures to remove operand objects keep the finalizer in place.
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        if !ctx.config.operator_removable {
            info!("\"{}\" deleted, operator is not removable, keeping operand", self.name_any());
            return Ok(Action::await_change());
        }

        let state = ctx
            .controllers
            .remove(ctx.clone(), Arc::new(self.clone()))
            .await?;

        if state == ManagementState::Removed {
            let recorder = ctx.recorder(self).await;
            self.record_event(&recorder, "OperandRemoved", "Removed secrets store CSI driver resources", EventType::Normal)
                .await;
        } else {
            info!(%state, "\"{}\" deleted, operand left as is", self.name_any());
        }
        Ok(Action::await_change())
    }
}
