use std::sync::Arc;

use kube::runtime::events::{Recorder, Reporter};
use kube::{Client, Resource};
use tokio::sync::RwLock;

use crate::controller::controller_data::Diagnostics;
use crate::controller::utils::config::Config;
use crate::controller::v1::controller_set::CSIControllerSet;
use crate::controller::v1::crd::cluster_csi_driver::ClusterCSIDriver;
use crate::observability::metrics::Metrics;
use crate::observability::telemetry::LogLevelHandle;

/// Context handed to every reconcile.
#[derive(Clone)]
pub struct Context {
    pub client: Arc<Client>,
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Absent when tracing was set up by someone else (tests).
    pub log_level: Option<LogLevelHandle>,
    pub controllers: Arc<CSIControllerSet>,
}

impl Context {
    pub async fn recorder(&self, driver: &ClusterCSIDriver) -> Recorder {
        let reporter: Reporter = self.diagnostics.read().await.reporter.clone();
        Recorder::new((*self.client).clone(), reporter, driver.object_ref(&()))
    }
}
