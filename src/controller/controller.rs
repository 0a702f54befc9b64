use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use kube::{
    api::{Api, ResourceExt},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as Finalizer},
    },
};
use tracing::{error, info, warn};

use crate::contract::ireconcilable::IReconcilable;
use crate::contract::lib::{Error, Result};
use crate::controller::utils::context::Context;
use crate::controller::v1::crd::cluster_csi_driver::ClusterCSIDriver;

pub static DRIVER_FINALIZER: &str = "secrets-store.csi.k8s.io/operator";

async fn reconcile(driver: Arc<ClusterCSIDriver>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.reconcile.count_and_measure();
    let drivers: Api<ClusterCSIDriver> = Api::all((*ctx.client).clone());

    info!("Reconciling \"{}\"", driver.name_any());
    finalizer(&drivers, DRIVER_FINALIZER, driver, |event| async {
        match event {
            Finalizer::Apply(driver) => driver.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(driver) => driver.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

pub fn error_policy(driver: Arc<ClusterCSIDriver>, error: &Error, ctx: Arc<Context>) -> Action {
    match error {
        Error::FinalizerError(inner) if matches!(**inner, kube::runtime::finalizer::Error::ApplyFailed(Error::Degraded(_))) => {
            warn!("\"{}\" is degraded: {}", driver.name_any(), error);
        }
        _ => error!("Error reconciling \"{}\": {:?}", driver.name_any(), error),
    }
    ctx.metrics.reconcile.set_failure(error);
    Action::requeue(Duration::from_secs(60))
}

/// Drives the controller until its watch streams end.
pub async fn run(controller: Controller<ClusterCSIDriver>, ctx: Arc<Context>) {
    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => info!("Reconciled {}", obj.name),
                Err(e) => warn!("Reconcile failed: {}", e),
            }
        })
        .await;
}
