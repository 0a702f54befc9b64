use async_trait::async_trait;
use tracing::info;

use crate::contract::lib::Result;
use crate::controller::v1::controller_set::{StatusUpdate, SubController, SyncContext};
use crate::controller::v1::crd::cluster_csi_driver::LogLevel;

/// Applies `spec.operatorLogLevel` to the operator's own tracing filter.
#[derive(Default)]
pub struct LogLevelController;

#[async_trait]
impl SubController for LogLevelController {
    fn name(&self) -> &str {
        "LogLevelController"
    }

    async fn sync(&self, sync: &SyncContext) -> Result<StatusUpdate> {
        let Some(handle) = sync.ctx.log_level.as_ref() else {
            return Ok(StatusUpdate::default());
        };

        let desired = sync
            .driver
            .spec
            .operator_log_level
            .unwrap_or(LogLevel::Normal)
            .filter_directive();

        if handle.current_directive().as_deref() != Some(desired) {
            handle.set_directive(desired)?;
            info!(level = desired, "operator log level changed");
        }
        Ok(StatusUpdate::default())
    }
}
