use async_trait::async_trait;

use crate::contract::lib::{Error, Result};
use crate::controller::v1::controller_set::{StatusUpdate, SubController, SyncContext};
use crate::controller::v1::crd::cluster_csi_driver::ManagementState;

/// Reports `ManagementStateDegraded` for states this operator cannot honour.
pub struct ManagementStateController {
    operand_name: String,
    removable: bool,
}

impl ManagementStateController {
    pub fn new(operand_name: &str, removable: bool) -> Self {
        ManagementStateController {
            operand_name: operand_name.to_string(),
            removable,
        }
    }

    pub fn check(&self, state: ManagementState) -> Result<()> {
        match state {
            ManagementState::Managed | ManagementState::Unmanaged => Ok(()),
            ManagementState::Removed if self.removable => Ok(()),
            ManagementState::Removed => Err(Error::SyncFailed(
                "ManagementState".to_string(),
                format!("Removed management state is not supported for {}", self.operand_name),
            )),
            other => Err(Error::SyncFailed(
                "ManagementState".to_string(),
                format!("unknown management state {other} for {}", self.operand_name),
            )),
        }
    }
}

#[async_trait]
impl SubController for ManagementStateController {
    fn name(&self) -> &str {
        "ManagementState"
    }

    async fn sync(&self, sync: &SyncContext) -> Result<StatusUpdate> {
        self.check(sync.driver.spec.management_state)?;
        Ok(StatusUpdate::default())
    }
}
