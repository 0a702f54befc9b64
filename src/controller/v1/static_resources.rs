use std::sync::Arc;

use async_trait::async_trait;
use either::Either;
use kube::api::{DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Api, Client};
use tracing::{debug, info};

use crate::assets::AssetFunc;
use crate::contract::lib::{Error, Result};
use crate::controller::controller_data::OPERATOR_NAME;
use crate::controller::v1::controller_set::{StatusUpdate, SubController, SyncContext};

pub type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A rendered asset ready to be sent to the API server.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub resource: ApiResource,
    pub object: DynamicObject,
    pub name: String,
    pub namespace: Option<String>,
}

impl Manifest {
    pub fn parse(file: &str, content: &[u8]) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidManifest(file.to_string(), reason.to_string());

        let object: DynamicObject = serde_yaml::from_slice(content).map_err(Error::YamlSerializationError)?;
        let types = object.types.as_ref().ok_or_else(|| invalid("missing apiVersion/kind"))?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", types.api_version.as_str()),
        };
        let gvk = GroupVersionKind::gvk(group, version, &types.kind);
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| invalid("missing metadata.name"))?;
        let namespace = object.metadata.namespace.clone();

        Ok(Manifest {
            resource: ApiResource::from_gvk(&gvk),
            object,
            name,
            namespace,
        })
    }

    fn api(&self, client: Client) -> Api<DynamicObject> {
        match &self.namespace {
            Some(ns) => Api::namespaced_with(client, ns, &self.resource),
            None => Api::all_with(client, &self.resource),
        }
    }

    pub async fn apply(&self, client: Client) -> Result<()> {
        let params = PatchParams::apply(OPERATOR_NAME).force();
        self.api(client)
            .patch(&self.name, &params, &Patch::Apply(&self.object))
            .await
            .map_err(Error::KubeError)?;
        debug!(kind = %self.resource.kind, name = %self.name, "applied manifest");
        Ok(())
    }

    /// Deletes the object; an already missing object counts as deleted.
    pub async fn delete(&self, client: Client) -> Result<()> {
        match self.api(client).delete(&self.name, &DeleteParams::default()).await.map_err(Error::from) {
            Ok(Either::Left(_)) => {
                info!(kind = %self.resource.kind, name = %self.name, "deletion started");
                Ok(())
            }
            Ok(Either::Right(_)) => {
                info!(kind = %self.resource.kind, name = %self.name, "deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Applies a fixed list of assets while `should_create` holds and deletes
/// them while `should_delete` holds. Neither holding means hands off.
pub struct ConditionalStaticResourcesController {
    name: String,
    asset_fn: AssetFunc,
    files: Vec<String>,
    should_create: Predicate,
    should_delete: Predicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticResourceAction {
    Create,
    Delete,
    Skip,
}

impl ConditionalStaticResourcesController {
    pub fn new(
        name: &str,
        asset_fn: AssetFunc,
        files: &[&str],
        should_create: Predicate,
        should_delete: Predicate,
    ) -> Self {
        ConditionalStaticResourcesController {
            name: name.to_string(),
            asset_fn,
            files: files.iter().map(|f| f.to_string()).collect(),
            should_create,
            should_delete,
        }
    }

    pub fn action(&self) -> StaticResourceAction {
        if (self.should_create)() {
            StaticResourceAction::Create
        } else if (self.should_delete)() {
            StaticResourceAction::Delete
        } else {
            StaticResourceAction::Skip
        }
    }

    pub fn manifests(&self) -> Vec<(String, Result<Manifest>)> {
        self.files
            .iter()
            .map(|file| {
                let manifest = (self.asset_fn)(file).and_then(|content| Manifest::parse(file, &content));
                (file.clone(), manifest)
            })
            .collect()
    }
}

#[async_trait]
impl SubController for ConditionalStaticResourcesController {
    fn name(&self) -> &str {
        &self.name
    }

    fn removes_operand(&self) -> bool {
        true
    }

    async fn sync(&self, sync: &SyncContext) -> Result<StatusUpdate> {
        let action = self.action();
        if action == StaticResourceAction::Skip {
            debug!(controller = %self.name, "conditional resources left untouched");
            return Ok(StatusUpdate::default());
        }

        let client = (*sync.ctx.client).clone();
        let mut failures = Vec::new();
        for (file, manifest) in self.manifests() {
            let result = match manifest {
                Ok(manifest) if action == StaticResourceAction::Create => manifest.apply(client.clone()).await,
                Ok(manifest) => manifest.delete(client.clone()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                failures.push(format!("{file}: {e}"));
            }
        }

        if failures.is_empty() {
            Ok(StatusUpdate::default())
        } else {
            Err(Error::SyncFailed(self.name.clone(), failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::replace_namespace_func;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn predicate(value: bool) -> Predicate {
        Arc::new(move || value)
    }

    fn controller(create: Predicate, delete: Predicate, files: &[&str]) -> ConditionalStaticResourcesController {
        ConditionalStaticResourcesController::new(
            "StaticResources",
            replace_namespace_func("openshift-cluster-csi-drivers"),
            files,
            create,
            delete,
        )
    }

    #[test]
    fn parses_namespaced_manifest() {
        let render = replace_namespace_func("openshift-cluster-csi-drivers");
        let manifest = Manifest::parse("node_sa.yaml", &render("node_sa.yaml").unwrap()).unwrap();

        assert_eq!(manifest.resource.kind, "ServiceAccount");
        assert_eq!(manifest.resource.plural, "serviceaccounts");
        assert_eq!(manifest.resource.group, "");
        assert_eq!(manifest.name, "secrets-store-csi-driver-node-sa");
        assert_eq!(manifest.namespace.as_deref(), Some("openshift-cluster-csi-drivers"));
    }

    #[test]
    fn parses_cluster_scoped_manifest() {
        let render = replace_namespace_func("ns");
        let manifest = Manifest::parse("csidriver.yaml", &render("csidriver.yaml").unwrap()).unwrap();

        assert_eq!(manifest.resource.group, "storage.k8s.io");
        assert_eq!(manifest.resource.api_version, "storage.k8s.io/v1");
        assert_eq!(manifest.resource.plural, "csidrivers");
        assert!(manifest.namespace.is_none());
    }

    #[test]
    fn network_policy_plural() {
        let render = replace_namespace_func("ns");
        let file = "network-policy/allow-ingress-to-metrics-operand.yaml";
        let manifest = Manifest::parse(file, &render(file).unwrap()).unwrap();
        assert_eq!(manifest.resource.plural, "networkpolicies");
    }

    #[test]
    fn rejects_manifest_without_name() {
        let content = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  namespace: x\n";
        assert!(matches!(
            Manifest::parse("broken.yaml", content),
            Err(Error::InvalidManifest(_, _))
        ));
    }

    #[test]
    fn create_wins_over_delete() {
        let c = controller(predicate(true), predicate(true), &[]);
        assert_eq!(c.action(), StaticResourceAction::Create);
    }

    #[test]
    fn delete_when_not_creating() {
        let c = controller(predicate(false), predicate(true), &[]);
        assert_eq!(c.action(), StaticResourceAction::Delete);
        let c = controller(predicate(false), predicate(false), &[]);
        assert_eq!(c.action(), StaticResourceAction::Skip);
    }

    #[test]
    fn delete_predicate_not_evaluated_when_creating() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let c = controller(
            predicate(true),
            Arc::new(move || {
                flag.store(true, Ordering::SeqCst);
                true
            }),
            &[],
        );
        c.action();
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn manifests_report_missing_assets_individually() {
        let c = controller(predicate(true), predicate(false), &["node_sa.yaml", "nope.yaml"]);
        let manifests = c.manifests();
        assert_eq!(manifests.len(), 2);
        assert!(manifests[0].1.is_ok());
        assert!(matches!(manifests[1].1, Err(Error::AssetNotFound(_))));
    }
}
