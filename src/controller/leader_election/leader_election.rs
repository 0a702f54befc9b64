use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, OwnerReference};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::contract::lib::{Error, Result};
use crate::controller::utils::config::Config;

pub static CONTROLLER_LEASE_NAME: &str = "secrets-store-csi-driver-operator-lock";
pub const LEASE_DURATION_SECONDS: i32 = 20;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub struct LeaderElection {
    cancel_token: Arc<CancellationToken>,
    enabled: bool,
    pod_name: Option<String>,
    lease_api: Api<Lease>,
    pod_api: Api<Pod>,
}

/// A lease whose holder stopped renewing can be taken over.
pub fn is_expired(lease: &Lease, now: chrono::DateTime<Utc>) -> bool {
    let Some(spec) = lease.spec.as_ref() else {
        return true;
    };
    let duration = i64::from(spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECONDS));
    let last = spec
        .renew_time
        .as_ref()
        .or(spec.acquire_time.as_ref())
        .map(|t| t.0);
    match last {
        Some(last) => now.signed_duration_since(last) > chrono::Duration::seconds(duration),
        None => true,
    }
}

pub fn holder(lease: &Lease) -> Option<&str> {
    lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref())
}

impl LeaderElection {
    pub fn new(cancel_token: Arc<CancellationToken>, client: Arc<Client>, config: &Config) -> Self {
        let namespace = config.operator_namespace.as_str();
        LeaderElection {
            cancel_token,
            enabled: config.enable_leader_election,
            pod_name: config.kubernetes_pod_name.clone(),
            lease_api: Api::namespaced((*client).clone(), namespace),
            pod_api: Api::namespaced((*client).clone(), namespace),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn desired_lease(&self, pod_name: &str, pod_uid: String) -> Lease {
        Lease {
            metadata: kube::api::ObjectMeta {
                name: Some(CONTROLLER_LEASE_NAME.to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "v1".to_string(),
                    kind: "Pod".to_string(),
                    name: pod_name.to_string(),
                    uid: pod_uid,
                    controller: Some(true),
                    block_owner_deletion: Some(false),
                }]),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(pod_name.to_string()),
                acquire_time: Some(MicroTime(Utc::now())),
                renew_time: Some(MicroTime(Utc::now())),
                lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
                ..Default::default()
            }),
        }
    }

    pub async fn try_claim_leadership(&self) -> Result<Lease> {
        let pod_name = self
            .pod_name
            .as_deref()
            .ok_or(Error::LeaderElectionMisconfigured("KUBERNETES_POD_NAME"))?;

        if let Some(existing) = self.lease_api.get_opt(CONTROLLER_LEASE_NAME).await? {
            if holder(&existing) == Some(pod_name) {
                return Ok(existing);
            }
            if !is_expired(&existing, Utc::now()) {
                return Err(Error::LeaseHeldByAnotherPod);
            }
            warn!(holder = ?holder(&existing), "Lease {} expired, taking over", CONTROLLER_LEASE_NAME);
            match self.lease_api.delete(CONTROLLER_LEASE_NAME, &DeleteParams::default()).await.map_err(Error::from) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let pod = self.pod_api.get(pod_name).await?;
        let pod_uid = pod.metadata.uid.clone().unwrap_or_default();
        let lease = self
            .lease_api
            .create(&PostParams::default(), &self.desired_lease(pod_name, pod_uid))
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref r) if r.code == 409 => Error::LeaseHeldByAnotherPod,
                e => Error::KubeError(e),
            })?;

        info!("Acquired leadership with lease: {}", CONTROLLER_LEASE_NAME);
        Ok(lease)
    }

    /// Retries until the lease is ours or shutdown is requested.
    pub async fn claim_leadership_loop(&self) -> Result<Option<Lease>> {
        info!("Trying to acquire lease...");
        loop {
            match self.try_claim_leadership().await {
                Ok(lease) => return Ok(Some(lease)),
                Err(e @ Error::LeaderElectionMisconfigured(_)) => return Err(e),
                Err(e) => debug!("Error when acquiring lease... {}", e),
            }
            tokio::select! {
                _ = tokio::time::sleep(RETRY_INTERVAL) => {},
                _ = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received. Stopping lease acquisition.");
                    return Ok(None);
                },
            }
        }
    }

    /// Renews the lease until shutdown. Losing the lease cancels the token.
    pub async fn refresh_leadership_loop(&self) {
        let mut interval = tokio::time::interval(RENEW_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.renew().await {
                        error!("Failed to renew lease: {}", e);
                        self.cancel_token.cancel();
                        break;
                    }
                },
                _ = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received. Stopping lease refresh.");
                    break;
                },
            }
        }

        match self.lease_api.delete(CONTROLLER_LEASE_NAME, &DeleteParams::default()).await {
            Ok(_) => info!("Lease released upon shutdown: {}", CONTROLLER_LEASE_NAME),
            Err(e) => warn!("Failed to release lease on shutdown: {}", e),
        }
    }

    async fn renew(&self) -> Result<()> {
        let mut lease = self.lease_api.get(CONTROLLER_LEASE_NAME).await?;
        if holder(&lease) != self.pod_name.as_deref() {
            return Err(Error::LeaseHeldByAnotherPod);
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.renew_time = Some(MicroTime(Utc::now()));
        }
        self.lease_api
            .replace(CONTROLLER_LEASE_NAME, &PostParams::default(), &lease)
            .await?;
        debug!("Successfully renewed lease: {}", CONTROLLER_LEASE_NAME);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::v1::fixtures::tests::{deleted, fake_client, not_found};
    use http::Method;

    fn lease(holder: &str, renewed_secs_ago: Option<i64>) -> Lease {
        Lease {
            metadata: Default::default(),
            spec: Some(LeaseSpec {
                holder_identity: Some(holder.to_string()),
                renew_time: renewed_secs_ago
                    .map(|s| MicroTime(Utc::now() - chrono::Duration::seconds(s))),
                lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn fresh_lease_is_not_expired() {
        assert!(!is_expired(&lease("pod-a", Some(5)), Utc::now()));
    }

    #[test]
    fn stale_lease_is_expired() {
        assert!(is_expired(&lease("pod-a", Some(120)), Utc::now()));
    }

    #[test]
    fn lease_without_times_is_expired() {
        assert!(is_expired(&lease("pod-a", None), Utc::now()));
        assert!(is_expired(&Lease::default(), Utc::now()));
    }

    #[test]
    fn reads_holder() {
        assert_eq!(holder(&lease("pod-a", None)), Some("pod-a"));
        assert_eq!(holder(&Lease::default()), None);
    }

    #[tokio::test]
    async fn lease_is_released_once_cancelled() {
        let (client, calls) = fake_client(|call| {
            if call.method == Method::DELETE {
                deleted()
            } else {
                not_found()
            }
        });
        let token = Arc::new(CancellationToken::new());
        let config = Config {
            enable_leader_election: true,
            kubernetes_pod_name: Some("operator-0".to_string()),
            ..Config::default()
        };
        let elector = Arc::new(LeaderElection::new(token.clone(), Arc::new(client), &config));

        let refresh = tokio::spawn({
            let elector = elector.clone();
            async move { elector.refresh_leadership_loop().await }
        });
        token.cancel();
        refresh.await.unwrap();

        let path = format!("/apis/coordination.k8s.io/v1/namespaces/openshift-cluster-csi-drivers/leases/{CONTROLLER_LEASE_NAME}");
        assert!(calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.method == Method::DELETE && c.path == path));
    }
}
