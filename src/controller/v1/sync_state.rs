use tracing::{error, info};

use crate::contract::clients::OperatorClient;
use crate::controller::v1::crd::cluster_csi_driver::ManagementState;

/// Returns the management state that decides how conditional resources are synced:
///
///  - `Managed`: resources should be synced
///  - `Unmanaged`: resources should NOT be synced
///  - `Removed`: resources should be deleted
///
/// A failure to read the operator object is logged and reported as `Unmanaged`,
/// so nothing is synced or deleted while the real state is unknown.
pub fn get_operator_sync_state(
    operator_client: &dyn OperatorClient,
    removable: bool,
) -> ManagementState {
    let (spec, _) = match operator_client.get_operator_state() {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to get operator state: {}", e);
            return ManagementState::Unmanaged;
        }
    };

    if spec.management_state != ManagementState::Managed {
        return spec.management_state;
    }

    let meta = match operator_client.get_object_meta() {
        Ok(meta) => meta,
        Err(e) => {
            error!("Failed to get operator object meta: {}", e);
            return ManagementState::Unmanaged;
        }
    };

    // deletion timestamp counts as Removed
    if removable && meta.deletion_timestamp.is_some() {
        info!("Operator deletion timestamp is set, removing conditional resources");
        return ManagementState::Removed;
    }

    ManagementState::Managed
}
