use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::{ObjectRef, Store};

use crate::contract::clients::OperatorClient;
use crate::contract::lib::Error;
use crate::controller::v1::crd::cluster_csi_driver::{
    ClusterCSIDriver, ClusterCSIDriverSpec, ClusterCSIDriverStatus,
};

/// Operator client backed by the controller's reflector store, so reads never
/// hit the API server.
#[derive(Clone)]
pub struct CachedOperatorClient {
    store: Store<ClusterCSIDriver>,
    name: String,
}

impl CachedOperatorClient {
    pub fn new(store: Store<ClusterCSIDriver>, name: &str) -> Self {
        CachedOperatorClient {
            store,
            name: name.to_string(),
        }
    }

    fn cached(&self) -> Result<Arc<ClusterCSIDriver>, Error> {
        self.store
            .get(&ObjectRef::new(&self.name))
            .ok_or_else(|| Error::OperatorNotFound(self.name.clone()))
    }
}

impl OperatorClient for CachedOperatorClient {
    fn get_operator_state(
        &self,
    ) -> Result<(ClusterCSIDriverSpec, Option<ClusterCSIDriverStatus>), Error> {
        let driver = self.cached()?;
        Ok((driver.spec.clone(), driver.status.clone()))
    }

    fn get_object_meta(&self) -> Result<ObjectMeta, Error> {
        Ok(self.cached()?.metadata.clone())
    }
}
