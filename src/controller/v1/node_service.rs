use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar, Volume, VolumeMount};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::assets::AssetFunc;
use crate::contract::lib::{Error, Result};
use crate::controller::controller_data::OPERATOR_NAME;
use crate::controller::utils::config::Config;
use crate::controller::v1::config_observer::observed_proxy;
use crate::controller::v1::controller_set::{StatusUpdate, SubController, SyncContext};
use crate::controller::v1::crd::cluster_csi_driver::{
    ClusterCSIDriver, ConditionStatus, LogLevel, ManagementState, OperatorCondition,
};

pub const LOG_LEVEL_KEY: &str = "${LOG_LEVEL}";
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";
pub const CA_BUNDLE_VOLUME: &str = "non-standard-root-system-trust-ca-bundle";
pub const CA_BUNDLE_MOUNT_PATH: &str = "/etc/pki/ca-trust/extracted/pem";
pub const CA_BUNDLE_VERSION_ANNOTATION: &str = "operator.openshift.io/trusted-ca-bundle-version";

/// Mutates the rendered DaemonSet before it is applied.
#[async_trait]
pub trait DaemonSetHook: Send + Sync {
    async fn apply(&self, sync: &SyncContext, daemon_set: &mut DaemonSet) -> Result<()>;
}

/// Runs the CSI driver on every node.
pub struct CSIDriverNodeServiceController {
    name: String,
    asset_fn: AssetFunc,
    file: String,
    hooks: Vec<Box<dyn DaemonSetHook>>,
}

impl CSIDriverNodeServiceController {
    pub fn new(name: &str, asset_fn: AssetFunc, file: &str, hooks: Vec<Box<dyn DaemonSetHook>>) -> Self {
        CSIDriverNodeServiceController {
            name: name.to_string(),
            asset_fn,
            file: file.to_string(),
            hooks,
        }
    }

    /// Renders the DaemonSet from the asset, without hooks.
    pub fn render(&self, driver: &ClusterCSIDriver, config: &Config) -> Result<DaemonSet> {
        let raw = (self.asset_fn)(&self.file)?;
        let mut manifest = String::from_utf8(raw)
            .map_err(|e| Error::InvalidManifest(self.file.clone(), e.to_string()))?;

        let verbosity = driver.spec.log_level.unwrap_or(LogLevel::Normal).verbosity();
        manifest = manifest.replace(LOG_LEVEL_KEY, &verbosity.to_string());
        for (key, image) in config.image_replacements() {
            manifest = manifest.replace(key, image);
        }

        let mut daemon_set: DaemonSet = serde_yaml::from_str(&manifest).map_err(Error::YamlSerializationError)?;
        // a non-removable operator keeps its operand when the driver goes away,
        // so the DaemonSet must not be garbage collected with it
        if config.operator_removable {
            if let Some(owner) = driver.controller_owner_ref(&()) {
                daemon_set.metadata.owner_references = Some(vec![owner]);
            }
        }
        inject_env(&mut daemon_set, &proxy_env(driver.spec.observed_config.as_ref()));
        Ok(daemon_set)
    }

    fn api(&self, sync: &SyncContext, daemon_set: &DaemonSet) -> Api<DaemonSet> {
        let namespace = daemon_set
            .namespace()
            .unwrap_or_else(|| sync.ctx.config.operator_namespace.clone());
        Api::namespaced((*sync.ctx.client).clone(), &namespace)
    }

    fn status_update(&self, daemon_set: &DaemonSet) -> StatusUpdate {
        let status = daemon_set.status.clone().unwrap_or_default();
        let desired = status.desired_number_scheduled;
        let available = status.number_available.unwrap_or(0);
        let updated = status.updated_number_scheduled.unwrap_or(0);
        let generation = daemon_set.metadata.generation.unwrap_or(0);
        let observed = status.observed_generation.unwrap_or(0);

        let available_condition = if available > 0 {
            OperatorCondition::new(format!("{}Available", self.name), ConditionStatus::True)
                .with_reason("AsExpected", format!("{available} of {desired} nodes run the driver"))
        } else {
            OperatorCondition::new(format!("{}Available", self.name), ConditionStatus::False)
                .with_reason("Deploying", "Waiting for the DaemonSet to deploy the CSI Node Service")
        };

        let progressing = observed < generation || updated < desired;
        let progressing_condition = if progressing {
            OperatorCondition::new(format!("{}Progressing", self.name), ConditionStatus::True)
                .with_reason("Deploying", format!("{updated} of {desired} nodes are updated"))
        } else {
            OperatorCondition::new(format!("{}Progressing", self.name), ConditionStatus::False)
                .with_reason("AsExpected", "")
        };

        StatusUpdate {
            conditions: vec![available_condition, progressing_condition],
            ready_replicas: Some(status.number_ready),
        }
    }
}

#[async_trait]
impl SubController for CSIDriverNodeServiceController {
    fn name(&self) -> &str {
        &self.name
    }

    fn removes_operand(&self) -> bool {
        true
    }

    async fn sync(&self, sync: &SyncContext) -> Result<StatusUpdate> {
        let state = sync.sync_state();
        if state != ManagementState::Managed && state != ManagementState::Removed {
            debug!(%state, "node service left untouched");
            return Ok(StatusUpdate::default());
        }

        let mut daemon_set = self.render(&sync.driver, &sync.ctx.config)?;
        let api = self.api(sync, &daemon_set);
        let name = daemon_set.name_any();

        if state == ManagementState::Removed {
            match api.delete(&name, &DeleteParams::default()).await.map_err(Error::from) {
                Ok(_) => info!(daemon_set = %name, "node service removed"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            return Ok(StatusUpdate {
                conditions: vec![
                    OperatorCondition::new(format!("{}Available", self.name), ConditionStatus::False)
                        .with_reason("Removed", "The CSI Node Service was removed"),
                    OperatorCondition::new(format!("{}Progressing", self.name), ConditionStatus::False)
                        .with_reason("Removed", ""),
                ],
                ready_replicas: Some(0),
            });
        }

        for hook in &self.hooks {
            hook.apply(sync, &mut daemon_set).await?;
        }

        let params = PatchParams::apply(OPERATOR_NAME).force();
        let applied = api
            .patch(&name, &params, &Patch::Apply(&daemon_set))
            .await
            .map_err(Error::KubeError)?;
        debug!(daemon_set = %name, "node service applied");

        Ok(self.status_update(&applied))
    }
}

/// `HTTP_PROXY`-style variables recorded by the config observer.
pub fn proxy_env(observed_config: Option<&Value>) -> Vec<EnvVar> {
    observed_proxy(observed_config)
        .into_iter()
        .filter_map(|(name, value)| {
            value.as_str().filter(|v| !v.is_empty()).map(|v| EnvVar {
                name,
                value: Some(v.to_string()),
                value_from: None,
            })
        })
        .collect()
}

/// Adds the variables to every container that does not already define them.
pub fn inject_env(daemon_set: &mut DaemonSet, env: &[EnvVar]) {
    if env.is_empty() {
        return;
    }
    let Some(pod_spec) = daemon_set.spec.as_mut().and_then(|s| s.template.spec.as_mut()) else {
        return;
    };
    for container in pod_spec.containers.iter_mut() {
        let vars = container.env.get_or_insert_with(Vec::new);
        for var in env {
            if !vars.iter().any(|v| v.name == var.name) {
                vars.push(var.clone());
            }
        }
    }
}

/// Mounts the cluster's trusted CA bundle into the driver pods once the
/// config map has been populated.
pub struct CABundleDaemonSetHook {
    namespace: String,
    config_map: String,
}

impl CABundleDaemonSetHook {
    pub fn new(namespace: &str, config_map: &str) -> Self {
        CABundleDaemonSetHook {
            namespace: namespace.to_string(),
            config_map: config_map.to_string(),
        }
    }

    pub fn inject(&self, daemon_set: &mut DaemonSet, resource_version: &str) -> Result<()> {
        let volume: Volume = serde_json::from_value(json!({
            "name": CA_BUNDLE_VOLUME,
            "configMap": {
                "name": self.config_map,
                "items": [{ "key": CA_BUNDLE_KEY, "path": "tls-ca-bundle.pem" }]
            }
        }))
        .map_err(Error::JsonSerializationError)?;

        let Some(spec) = daemon_set.spec.as_mut() else {
            return Ok(());
        };
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .insert(CA_BUNDLE_VERSION_ANNOTATION.to_string(), resource_version.to_string());

        let Some(pod_spec) = spec.template.spec.as_mut() else {
            return Ok(());
        };
        let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
        if !volumes.iter().any(|v| v.name == CA_BUNDLE_VOLUME) {
            volumes.push(volume);
        }
        for container in pod_spec.containers.iter_mut() {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            if !mounts.iter().any(|m| m.name == CA_BUNDLE_VOLUME) {
                mounts.push(VolumeMount {
                    name: CA_BUNDLE_VOLUME.to_string(),
                    mount_path: CA_BUNDLE_MOUNT_PATH.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DaemonSetHook for CABundleDaemonSetHook {
    async fn apply(&self, sync: &SyncContext, daemon_set: &mut DaemonSet) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced((*sync.ctx.client).clone(), &self.namespace);
        let Some(config_map) = api.get_opt(&self.config_map).await.map_err(Error::KubeError)? else {
            debug!(config_map = %self.config_map, "trusted CA bundle not found");
            return Ok(());
        };

        let populated = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(CA_BUNDLE_KEY))
            .is_some_and(|bundle| !bundle.is_empty());
        if !populated {
            debug!(config_map = %self.config_map, "trusted CA bundle not populated yet");
            return Ok(());
        }

        let version = config_map.resource_version().unwrap_or_default();
        self.inject(daemon_set, &version)
    }
}
