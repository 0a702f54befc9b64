//! Static manifests shipped inside the operator binary.
//!
//! Every manifest may reference `${NAMESPACE}`; [`replace_namespace_func`]
//! produces the lookup used by the controllers, with the placeholder swapped
//! for the namespace the operator runs in.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::contract::lib::{Error, Result};

pub const NAMESPACE_KEY: &str = "${NAMESPACE}";

/// Resolves an asset name to its rendered bytes.
pub type AssetFunc = Arc<dyn Fn(&str) -> Result<Vec<u8>> + Send + Sync>;

macro_rules! asset {
    ($name:literal) => {
        ($name, include_str!(concat!("../assets/", $name)))
    };
}

static ASSETS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        asset!("node.yaml"),
        asset!("node_sa.yaml"),
        asset!("csidriver.yaml"),
        asset!("cabundle_cm.yaml"),
        asset!("rbac/privileged_role.yaml"),
        asset!("rbac/node_privileged_binding.yaml"),
        asset!("rbac/secretproviderclasses_role.yaml"),
        asset!("rbac/secretproviderclasses_binding.yaml"),
        asset!("network-policy/allow-egress-to-api-server-operator.yaml"),
        asset!("network-policy/allow-ingress-to-metrics-operator.yaml"),
        asset!("network-policy/allow-egress-to-api-server-operand.yaml"),
        asset!("network-policy/allow-ingress-to-metrics-operand.yaml"),
    ])
});

pub fn read_file(name: &str) -> Result<&'static [u8]> {
    ASSETS
        .get(name)
        .map(|content| content.as_bytes())
        .ok_or_else(|| Error::AssetNotFound(name.to_string()))
}

pub fn replace_namespace_func(namespace: &str) -> AssetFunc {
    let namespace = namespace.to_string();
    Arc::new(move |name: &str| {
        let content = std::str::from_utf8(read_file(name)?)
            .map_err(|e| Error::InvalidManifest(name.to_string(), e.to_string()))?;
        Ok(content.replace(NAMESPACE_KEY, &namespace).into_bytes())
    })
}
