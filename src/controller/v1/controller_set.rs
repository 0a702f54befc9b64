use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::runtime::events::EventType;
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::assets::AssetFunc;
use crate::contract::clients::OperatorClient;
use crate::contract::ireconcilable::IReconcilable;
use crate::contract::lib::{Error, Result};
use crate::controller::controller_data::OPERATOR_VERSION;
use crate::controller::utils::context::Context;
use crate::controller::v1::config_observer::CSIConfigObserverController;
use crate::controller::v1::crd::cluster_csi_driver::{
    set_condition, ClusterCSIDriver, ClusterCSIDriverStatus, ConditionStatus, ManagementState,
    OperatorCondition,
};
use crate::controller::v1::log_level::LogLevelController;
use crate::controller::v1::management_state::ManagementStateController;
use crate::controller::v1::node_service::{CSIDriverNodeServiceController, DaemonSetHook};
use crate::controller::v1::static_resources::{ConditionalStaticResourcesController, Predicate};
use crate::controller::v1::sync_state::get_operator_sync_state;

/// Everything a sub-controller sees during one pass.
pub struct SyncContext {
    pub ctx: Arc<Context>,
    pub driver: Arc<ClusterCSIDriver>,
    pub operator_client: Arc<dyn OperatorClient>,
    pub removable: bool,
}

impl SyncContext {
    pub fn sync_state(&self) -> ManagementState {
        get_operator_sync_state(&*self.operator_client, self.removable)
    }
}

/// What a sub-controller contributes to the ClusterCSIDriver status.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatusUpdate {
    pub conditions: Vec<OperatorCondition>,
    pub ready_replicas: Option<i32>,
}

#[async_trait]
pub trait SubController: Send + Sync {
    fn name(&self) -> &str;
    async fn sync(&self, sync: &SyncContext) -> Result<StatusUpdate>;

    /// Whether this controller deletes operand objects on the Removed path.
    /// Only these can hold back deletion of the ClusterCSIDriver.
    fn removes_operand(&self) -> bool {
        false
    }
}

/// Outcome of one pass over the controller set.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub state: ManagementState,
    pub degraded: Vec<String>,
    pub removal_failures: Vec<String>,
}

impl SyncReport {
    pub fn into_result(self) -> Result<()> {
        if self.degraded.is_empty() {
            Ok(())
        } else {
            Err(Error::Degraded(self.degraded))
        }
    }

    /// Failures of controllers unrelated to removal are reported in status
    /// but do not block the finalizer.
    pub fn into_removal_result(self) -> Result<ManagementState> {
        if self.removal_failures.is_empty() {
            Ok(self.state)
        } else {
            Err(Error::Degraded(self.removal_failures))
        }
    }
}

/// Ordered set of sub-controllers driven by one ClusterCSIDriver reconcile.
pub struct CSIControllerSet {
    operator_client: Arc<dyn OperatorClient>,
    removable: bool,
    controllers: Vec<Box<dyn SubController>>,
}

impl CSIControllerSet {
    pub fn new(operator_client: Arc<dyn OperatorClient>) -> Self {
        CSIControllerSet {
            operator_client,
            removable: false,
            controllers: Vec::new(),
        }
    }

    pub fn with_log_level_controller(mut self) -> Self {
        self.controllers.push(Box::new(LogLevelController));
        self
    }

    pub fn with_management_state_controller(mut self, operand_name: &str, removable: bool) -> Self {
        self.removable = removable;
        self.controllers
            .push(Box::new(ManagementStateController::new(operand_name, removable)));
        self
    }

    pub fn with_conditional_static_resources_controller(
        mut self,
        name: &str,
        asset_fn: AssetFunc,
        files: &[&str],
        should_create: Predicate,
        should_delete: Predicate,
    ) -> Self {
        self.controllers.push(Box::new(ConditionalStaticResourcesController::new(
            name,
            asset_fn,
            files,
            should_create,
            should_delete,
        )));
        self
    }

    pub fn with_csi_config_observer_controller(mut self, name: &str) -> Self {
        self.controllers
            .push(Box::new(CSIConfigObserverController::new(name)));
        self
    }

    pub fn with_csi_driver_node_service(
        mut self,
        name: &str,
        asset_fn: AssetFunc,
        file: &str,
        hooks: Vec<Box<dyn DaemonSetHook>>,
    ) -> Self {
        self.controllers.push(Box::new(CSIDriverNodeServiceController::new(
            name, asset_fn, file, hooks,
        )));
        self
    }

    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.name()).collect()
    }

    /// Runs every sub-controller once, then writes the merged status.
    /// Returns `Error::Degraded` if any sub-controller failed.
    pub async fn sync(&self, ctx: Arc<Context>, driver: Arc<ClusterCSIDriver>) -> Result<()> {
        self.run(ctx, driver).await?.into_result()
    }

    /// Same pass as [`CSIControllerSet::sync`], for a ClusterCSIDriver being
    /// deleted. Only controllers that remove the operand can fail it.
    pub async fn remove(&self, ctx: Arc<Context>, driver: Arc<ClusterCSIDriver>) -> Result<ManagementState> {
        self.run(ctx, driver).await?.into_removal_result()
    }

    async fn run(&self, ctx: Arc<Context>, driver: Arc<ClusterCSIDriver>) -> Result<SyncReport> {
        let sync = SyncContext {
            ctx: ctx.clone(),
            driver: driver.clone(),
            operator_client: self.operator_client.clone(),
            removable: self.removable,
        };

        let state = sync.sync_state();
        ctx.metrics.reconcile.set_sync_state(state);
        {
            let mut diagnostics = ctx.diagnostics.write().await;
            diagnostics.last_event = chrono::Utc::now();
            diagnostics.last_sync_state = Some(state);
        }
        debug!(%state, "syncing controller set");

        let mut status = driver.status.clone().unwrap_or_default();
        let mut degraded = Vec::new();
        let mut removal_failures = Vec::new();
        let recorder = ctx.recorder(&driver).await;

        for controller in &self.controllers {
            let name = controller.name().to_string();
            match controller.sync(&sync).await {
                Ok(update) => {
                    merge_update(&mut status, &name, update);
                }
                Err(e) => {
                    warn!(controller = %name, "sync failed: {}", e);
                    ctx.metrics.reconcile.set_failure(&e);
                    driver
                        .record_event(&recorder, &format!("{name}Failed"), &e.to_string(), EventType::Warning)
                        .await;
                    set_condition(&mut status.conditions, degraded_condition(&name, Some(&e)));
                    if controller.removes_operand() {
                        removal_failures.push(name.clone());
                    }
                    degraded.push(name);
                }
            }
        }

        status.observed_generation = driver.metadata.generation;
        if degraded.is_empty() {
            status.version = Some(OPERATOR_VERSION.to_string());
        }
        self.update_status(&ctx, &driver, status).await?;

        Ok(SyncReport {
            state,
            degraded,
            removal_failures,
        })
    }

    async fn update_status(
        &self,
        ctx: &Context,
        driver: &ClusterCSIDriver,
        status: ClusterCSIDriverStatus,
    ) -> Result<()> {
        if driver.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let api: Api<ClusterCSIDriver> = Api::all((*ctx.client).clone());
        let patch = json!({ "status": status });
        api.patch_status(&driver.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::KubeError)?;
        info!(driver = %driver.name_any(), "status updated");
        Ok(())
    }
}

fn degraded_condition(name: &str, error: Option<&Error>) -> OperatorCondition {
    let type_ = format!("{name}Degraded");
    match error {
        Some(e) => OperatorCondition::new(type_, ConditionStatus::True).with_reason("SyncError", e.to_string()),
        None => OperatorCondition::new(type_, ConditionStatus::False).with_reason("AsExpected", ""),
    }
}

fn merge_update(status: &mut ClusterCSIDriverStatus, name: &str, update: StatusUpdate) {
    set_condition(&mut status.conditions, degraded_condition(name, None));
    for condition in update.conditions {
        set_condition(&mut status.conditions, condition);
    }
    if update.ready_replicas.is_some() {
        status.ready_replicas = update.ready_replicas;
    }
}
