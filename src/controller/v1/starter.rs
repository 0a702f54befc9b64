use std::sync::Arc;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ListParams;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::assets::replace_namespace_func;
use crate::contract::clients::OperatorClient;
use crate::contract::lib::{Error, Result};
use crate::controller::controller::run;
use crate::controller::controller_data::State;
use crate::controller::utils::config::Config;
use crate::controller::v1::controller_set::CSIControllerSet;
use crate::controller::v1::crd::cluster_csi_driver::{ClusterCSIDriver, ManagementState};
use crate::controller::v1::node_service::CABundleDaemonSetHook;
use crate::controller::v1::operator_client::CachedOperatorClient;
use crate::controller::v1::sync_state::get_operator_sync_state;
use crate::observability::telemetry::LogLevelHandle;

pub const OPERAND_NAME: &str = "secrets-store-csi-driver";
pub const TRUSTED_CA_CONFIG_MAP: &str = "secrets-store-csi-driver-trusted-ca-bundle";
pub const PROVIDER_NAME: &str = "secrets-store.csi.k8s.io";
pub const NODE_ASSET: &str = "node.yaml";

pub const STATIC_ASSETS: [&str; 11] = [
    "node_sa.yaml",
    "csidriver.yaml",
    "cabundle_cm.yaml",
    "rbac/privileged_role.yaml",
    "rbac/node_privileged_binding.yaml",
    "rbac/secretproviderclasses_role.yaml",
    "rbac/secretproviderclasses_binding.yaml",
    "network-policy/allow-egress-to-api-server-operator.yaml",
    "network-policy/allow-ingress-to-metrics-operator.yaml",
    "network-policy/allow-egress-to-api-server-operand.yaml",
    "network-policy/allow-ingress-to-metrics-operand.yaml",
];

pub fn build_controller_set(
    operator_client: Arc<dyn OperatorClient>,
    namespace: &str,
    removable: bool,
) -> CSIControllerSet {
    let managed_client = operator_client.clone();
    let removed_client = operator_client.clone();

    CSIControllerSet::new(operator_client)
        .with_log_level_controller()
        .with_management_state_controller(OPERAND_NAME, removable)
        .with_conditional_static_resources_controller(
            "SecretsStoreConditionalStaticResourcesController",
            replace_namespace_func(namespace),
            &STATIC_ASSETS,
            Arc::new(move || {
                get_operator_sync_state(&*managed_client, removable) == ManagementState::Managed
            }),
            Arc::new(move || {
                get_operator_sync_state(&*removed_client, removable) == ManagementState::Removed
            }),
        )
        .with_csi_config_observer_controller("SecretsStoreDriverCSIConfigObserverController")
        .with_csi_driver_node_service(
            "SecretsStoreDriverNodeServiceController",
            replace_namespace_func(namespace),
            NODE_ASSET,
            vec![Box::new(CABundleDaemonSetHook::new(namespace, TRUSTED_CA_CONFIG_MAP))],
        )
}

/// Every watched object maps back to the single ClusterCSIDriver.
fn to_driver<T>(_: T) -> Option<ObjectRef<ClusterCSIDriver>> {
    Some(ObjectRef::new(PROVIDER_NAME))
}

/// Wires the ClusterCSIDriver controller and runs it until `token` is cancelled.
pub async fn run_operator(
    state: &State,
    client: Arc<Client>,
    config: Arc<Config>,
    log_level: Option<LogLevelHandle>,
    token: Arc<CancellationToken>,
) -> Result<()> {
    let namespace = config.operator_namespace.clone();
    let drivers: Api<ClusterCSIDriver> = Api::all((*client).clone());

    if let Err(e) = drivers.list(&ListParams::default().limit(1)).await {
        error!("ClusterCSIDriver is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(Error::CrdNotInstalled);
    }

    let controller = Controller::new(
        drivers,
        WatcherConfig::default().fields(&format!("metadata.name={PROVIDER_NAME}")),
    )
    .watches(
        Api::<DaemonSet>::namespaced((*client).clone(), &namespace),
        WatcherConfig::default(),
        to_driver::<DaemonSet>,
    )
    .watches(
        Api::<ConfigMap>::namespaced((*client).clone(), &namespace),
        WatcherConfig::default().fields(&format!("metadata.name={TRUSTED_CA_CONFIG_MAP}")),
        to_driver::<ConfigMap>,
    );

    let operator_client: Arc<dyn OperatorClient> =
        Arc::new(CachedOperatorClient::new(controller.store(), PROVIDER_NAME));
    let controllers = build_controller_set(operator_client, &namespace, config.operator_removable);
    let context = state.to_context(client, config, log_level, Arc::new(controllers));

    info!("Starting controllerset");
    tokio::select! {
        _ = run(controller, context) => {
            info!("Controller streams ended");
        },
        _ = token.cancelled() => {
            info!("Shutdown signal received, stopping controllerset");
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::read_file;
    use crate::contract::clients::MockOperatorClient;
    use crate::controller::v1::crd::cluster_csi_driver::ClusterCSIDriverSpec;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn client_with(state: ManagementState, deleting: bool) -> Arc<dyn OperatorClient> {
        let mut client = MockOperatorClient::new();
        client.expect_get_operator_state().returning(move || {
            Ok((
                ClusterCSIDriverSpec {
                    management_state: state,
                    ..Default::default()
                },
                None,
            ))
        });
        client.expect_get_object_meta().returning(move || {
            Ok(ObjectMeta {
                deletion_timestamp: deleting.then(|| Time(Utc::now())),
                ..Default::default()
            })
        });
        Arc::new(client)
    }

    #[test]
    fn every_referenced_asset_exists() {
        for asset in STATIC_ASSETS.iter().chain([NODE_ASSET].iter()) {
            assert!(read_file(asset).is_ok(), "{asset} is missing");
        }
    }

    #[test]
    fn controller_set_is_wired_in_order() {
        let set = build_controller_set(client_with(ManagementState::Managed, false), "ns", true);
        assert_eq!(
            set.controller_names(),
            vec![
                "LogLevelController",
                "ManagementState",
                "SecretsStoreConditionalStaticResourcesController",
                "SecretsStoreDriverCSIConfigObserverController",
                "SecretsStoreDriverNodeServiceController",
            ]
        );
    }

    #[test]
    fn predicates_follow_sync_state() {
        use crate::controller::v1::static_resources::{
            ConditionalStaticResourcesController, StaticResourceAction,
        };

        let cases = [
            (ManagementState::Managed, false, StaticResourceAction::Create),
            (ManagementState::Managed, true, StaticResourceAction::Delete),
            (ManagementState::Removed, false, StaticResourceAction::Delete),
            (ManagementState::Unmanaged, false, StaticResourceAction::Skip),
        ];
        for (state, deleting, expected) in cases {
            let client = client_with(state, deleting);
            let (create, delete) = (client.clone(), client);
            let controller = ConditionalStaticResourcesController::new(
                "StaticResources",
                replace_namespace_func("ns"),
                &STATIC_ASSETS,
                Arc::new(move || get_operator_sync_state(&*create, true) == ManagementState::Managed),
                Arc::new(move || get_operator_sync_state(&*delete, true) == ManagementState::Removed),
            );
            assert_eq!(controller.action(), expected, "{state} deleting={deleting}");
        }
    }
}
