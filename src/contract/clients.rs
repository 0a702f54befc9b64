use crate::contract::lib::Error;
use crate::controller::v1::crd::cluster_csi_driver::{ClusterCSIDriverSpec, ClusterCSIDriverStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Read access to the operator's own ClusterCSIDriver object.
#[cfg_attr(test, mockall::automock)]
pub trait OperatorClient: Send + Sync {
    fn get_operator_state(
        &self,
    ) -> Result<(ClusterCSIDriverSpec, Option<ClusterCSIDriverStatus>), Error>;

    fn get_object_meta(&self) -> Result<ObjectMeta, Error>;
}
