use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Api, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::contract::lib::{Error, Result};
use crate::controller::v1::controller_set::{StatusUpdate, SubController, SyncContext};
use crate::controller::v1::crd::cluster_csi_driver::ClusterCSIDriver;

pub const PROXY_NAME: &str = "cluster";
pub const PROXY_KEYS: [(&str, &str); 3] = [
    ("httpProxy", "HTTP_PROXY"),
    ("httpsProxy", "HTTPS_PROXY"),
    ("noProxy", "NO_PROXY"),
];

fn proxy_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("config.openshift.io", "v1", "Proxy"),
        "proxies",
    )
}

/// Proxy settings under `targetcsiconfig.proxy`, empty when none were observed.
pub fn observed_proxy(observed_config: Option<&Value>) -> Map<String, Value> {
    observed_config
        .and_then(|c| c.pointer("/targetcsiconfig/proxy"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Maps the cluster Proxy status to the env-style keys the node service uses.
/// Empty values are dropped.
pub fn proxy_config_from_status(status: Option<&Value>) -> Map<String, Value> {
    let mut proxy = Map::new();
    let Some(status) = status else {
        return proxy;
    };
    for (field, key) in PROXY_KEYS {
        if let Some(value) = status.get(field).and_then(Value::as_str).filter(|v| !v.is_empty()) {
            proxy.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    proxy
}

/// Merge patch that turns `current` into `desired`; stale keys are nulled.
pub fn observed_config_patch(current: &Map<String, Value>, desired: &Map<String, Value>) -> Option<Value> {
    if current == desired {
        return None;
    }
    let mut proxy = desired.clone();
    for key in current.keys() {
        if !desired.contains_key(key) {
            proxy.insert(key.clone(), Value::Null);
        }
    }
    Some(json!({ "spec": { "observedConfig": { "targetcsiconfig": { "proxy": proxy } } } }))
}

/// Copies the cluster-wide proxy into the ClusterCSIDriver observed config.
pub struct CSIConfigObserverController {
    name: String,
}

impl CSIConfigObserverController {
    pub fn new(name: &str) -> Self {
        CSIConfigObserverController { name: name.to_string() }
    }

    async fn cluster_proxy_status(&self, sync: &SyncContext) -> Result<Option<Value>> {
        let api: Api<DynamicObject> = Api::all_with((*sync.ctx.client).clone(), &proxy_resource());
        match api.get_opt(PROXY_NAME).await.map_err(Error::from) {
            Ok(proxy) => Ok(proxy.and_then(|p| p.data.get("status").cloned())),
            // clusters without the config.openshift.io API answer 404 on the collection
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SubController for CSIConfigObserverController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sync(&self, sync: &SyncContext) -> Result<StatusUpdate> {
        let status = self.cluster_proxy_status(sync).await?;
        let desired = proxy_config_from_status(status.as_ref());
        let current = observed_proxy(sync.driver.spec.observed_config.as_ref());

        let Some(patch) = observed_config_patch(&current, &desired) else {
            debug!(controller = %self.name, "observed config unchanged");
            return Ok(StatusUpdate::default());
        };

        let api: Api<ClusterCSIDriver> = Api::all((*sync.ctx.client).clone());
        api.patch(&sync.driver.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::KubeError)?;
        info!(controller = %self.name, proxy = ?desired, "observed config updated");
        Ok(StatusUpdate::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_resource_is_cluster_config() {
        let resource = proxy_resource();
        assert_eq!(resource.api_version, "config.openshift.io/v1");
        assert_eq!(resource.plural, "proxies");
    }

    #[test]
    fn maps_proxy_status_fields() {
        let status = json!({
            "httpProxy": "http://proxy:3128",
            "httpsProxy": "",
            "noProxy": ".cluster.local"
        });
        let proxy = proxy_config_from_status(Some(&status));

        assert_eq!(proxy.get("HTTP_PROXY"), Some(&json!("http://proxy:3128")));
        assert_eq!(proxy.get("NO_PROXY"), Some(&json!(".cluster.local")));
        assert!(!proxy.contains_key("HTTPS_PROXY"));
        assert!(proxy_config_from_status(None).is_empty());
    }

    #[test]
    fn reads_observed_proxy() {
        let config = json!({"targetcsiconfig": {"proxy": {"HTTP_PROXY": "x"}}});
        assert_eq!(observed_proxy(Some(&config)).len(), 1);
        assert!(observed_proxy(Some(&json!({}))).is_empty());
        assert!(observed_proxy(None).is_empty());
    }

    #[test]
    fn no_patch_when_unchanged() {
        let mut proxy = Map::new();
        proxy.insert("HTTP_PROXY".to_string(), json!("x"));
        assert!(observed_config_patch(&proxy, &proxy.clone()).is_none());
        assert!(observed_config_patch(&Map::new(), &Map::new()).is_none());
    }

    #[test]
    fn patch_nulls_removed_keys() {
        let mut current = Map::new();
        current.insert("HTTP_PROXY".to_string(), json!("old"));
        current.insert("NO_PROXY".to_string(), json!("svc"));
        let mut desired = Map::new();
        desired.insert("HTTP_PROXY".to_string(), json!("new"));

        let patch = observed_config_patch(&current, &desired).unwrap();
        let proxy = patch.pointer("/spec/observedConfig/targetcsiconfig/proxy").unwrap();
        assert_eq!(proxy["HTTP_PROXY"], json!("new"));
        assert_eq!(proxy["NO_PROXY"], Value::Null);
    }
}
