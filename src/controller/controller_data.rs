use std::sync::Arc;
use tokio::sync::RwLock;

use crate::controller::utils::config::Config;
use crate::controller::utils::context::Context;
use crate::controller::v1::controller_set::CSIControllerSet;
use crate::controller::v1::crd::cluster_csi_driver::ManagementState;
use crate::observability::metrics::Metrics;
use crate::observability::telemetry::LogLevelHandle;
use chrono::{DateTime, Utc};
use kube::runtime::events::Reporter;
use kube::Client;
use serde::Serialize;

pub const OPERATOR_NAME: &str = "secrets-store-csi-driver-operator";
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub last_sync_state: Option<ManagementState>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_sync_state: None,
            reporter: OPERATOR_NAME.into(),
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics
    metrics: Arc<Metrics>,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = &*self.metrics.registry;
        prometheus_client::encoding::text::encode(&mut buffer, registry)?;
        Ok(buffer)
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(
        &self,
        client: Arc<Client>,
        config: Arc<Config>,
        log_level: Option<LogLevelHandle>,
        controllers: Arc<CSIControllerSet>,
    ) -> Arc<Context> {
        Arc::new(Context {
            client,
            config,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
            log_level,
            controllers,
        })
    }
}
