use std::collections::HashMap;
use std::time::Duration;

use config::{Environment, File};
use serde::Deserialize;

use crate::contract::lib::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/secrets-store-csi-driver-operator/config.yaml";

fn default_namespace() -> String {
    "openshift-cluster-csi-drivers".to_string()
}
fn default_true() -> bool {
    true
}
fn default_resync_interval() -> String {
    "20m".to_string()
}
fn default_metrics_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Operator settings, read from an optional config file and the environment.
/// Environment variables win over the file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_namespace")]
    pub operator_namespace: String,
    #[serde(default)]
    pub kubernetes_pod_name: Option<String>,
    #[serde(default)]
    pub enable_leader_election: bool,
    #[serde(default = "default_true")]
    pub operator_removable: bool,
    #[serde(default = "default_resync_interval")]
    pub resync_interval: String,
    #[serde(default = "default_metrics_bind_address")]
    pub metrics_bind_address: String,
    #[serde(default)]
    pub driver_image: Option<String>,
    #[serde(default)]
    pub node_driver_registrar_image: Option<String>,
    #[serde(default)]
    pub liveness_probe_image: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            operator_namespace: default_namespace(),
            kubernetes_pod_name: None,
            enable_leader_election: false,
            operator_removable: true,
            resync_interval: default_resync_interval(),
            metrics_bind_address: default_metrics_bind_address(),
            driver_image: None,
            node_driver_registrar_image: None,
            liveness_probe_image: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let file = std::env::var("OPERATOR_CONFIG_FILE")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::build(Some(&file), None)
    }

    /// `env` replaces the process environment when given.
    pub fn build(file: Option<&str>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }
        let config: Config = builder
            .add_source(Environment::default().source(env))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(Error::ConfigError)?;

        config.resync()?;
        Ok(config)
    }

    pub fn resync(&self) -> Result<Duration> {
        humantime::parse_duration(&self.resync_interval)
            .map_err(|e| Error::InvalidResyncInterval(self.resync_interval.clone(), e))
    }

    pub fn is_in_pod(&self) -> bool {
        self.kubernetes_pod_name.is_some()
    }

    /// Image placeholders in the node manifest and their replacements.
    pub fn image_replacements(&self) -> Vec<(&'static str, &str)> {
        [
            ("${DRIVER_IMAGE}", &self.driver_image),
            ("${NODE_DRIVER_REGISTRAR_IMAGE}", &self.node_driver_registrar_image),
            ("${LIVENESS_PROBE_IMAGE}", &self.liveness_probe_image),
        ]
        .into_iter()
        .filter_map(|(key, image)| image.as_deref().map(|image| (key, image)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = Config::build(None, env(&[])).unwrap();
        assert_eq!(config.operator_namespace, "openshift-cluster-csi-drivers");
        assert!(config.operator_removable);
        assert!(!config.enable_leader_election);
        assert_eq!(config.resync().unwrap(), Duration::from_secs(20 * 60));
        assert!(config.image_replacements().is_empty());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Config::build(
            None,
            env(&[
                ("OPERATOR_NAMESPACE", "csi"),
                ("ENABLE_LEADER_ELECTION", "true"),
                ("OPERATOR_REMOVABLE", "false"),
                ("RESYNC_INTERVAL", "90s"),
                ("DRIVER_IMAGE", "quay.io/driver:v1"),
                ("KUBERNETES_POD_NAME", "operator-abc"),
            ]),
        )
        .unwrap();

        assert_eq!(config.operator_namespace, "csi");
        assert!(config.enable_leader_election);
        assert!(!config.operator_removable);
        assert_eq!(config.resync().unwrap(), Duration::from_secs(90));
        assert!(config.is_in_pod());
        assert_eq!(
            config.image_replacements(),
            vec![("${DRIVER_IMAGE}", "quay.io/driver:v1")]
        );
    }

    #[test]
    fn invalid_resync_interval_is_rejected() {
        let result = Config::build(None, env(&[("RESYNC_INTERVAL", "soon")]));
        assert!(matches!(result, Err(Error::InvalidResyncInterval(_, _))));
    }

    #[test]
    #[serial]
    fn load_reads_process_environment() {
        std::env::set_var("OPERATOR_CONFIG_FILE", "/nonexistent/operator-config");
        std::env::set_var("OPERATOR_NAMESPACE", "from-process-env");
        let config = Config::load().unwrap();
        std::env::remove_var("OPERATOR_NAMESPACE");
        std::env::remove_var("OPERATOR_CONFIG_FILE");

        assert_eq!(config.operator_namespace, "from-process-env");
    }
}
