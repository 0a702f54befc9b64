use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use secrets_store_csi_driver_operator::contract::lib::Error;
use secrets_store_csi_driver_operator::controller::controller_data::State;
use secrets_store_csi_driver_operator::controller::leader_election::leader_election::LeaderElection;
use secrets_store_csi_driver_operator::controller::utils::config::Config;
use secrets_store_csi_driver_operator::controller::utils::signals::notify_cancellation_token;
use secrets_store_csi_driver_operator::controller::v1::starter::run_operator;
use secrets_store_csi_driver_operator::observability::metrics_server::run_metrics_server;
use secrets_store_csi_driver_operator::observability::telemetry;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_level = telemetry::init()?;
    let config = Arc::new(Config::load()?);

    let client = Arc::new(Client::try_default().await.map_err(Error::KubeError)?);

    let state = State::default();
    let server_task = run_metrics_server(state.clone(), &config.metrics_bind_address)?;
    tokio::spawn(server_task);

    let token = Arc::new(CancellationToken::new());
    notify_cancellation_token(&token);

    if config.enable_leader_election && !config.is_in_pod() {
        return Err(Error::LeaderElectionMisconfigured("KUBERNETES_POD_NAME").into());
    }

    let leader_elector = Arc::new(LeaderElection::new(token.clone(), client.clone(), &config));
    let mut lease_refresh = None;
    if leader_elector.enabled() {
        match leader_elector.claim_leadership_loop().await {
            Ok(Some(_)) => {
                let elector = leader_elector.clone();
                lease_refresh = Some(tokio::spawn(async move {
                    elector.refresh_leadership_loop().await;
                }));
            }
            Ok(None) => {
                info!("Shutdown signal received, before controllers started. Closing...");
                return Ok(());
            }
            Err(e) => {
                error!("There was some error when trying to claim lease. Closing... {}", e);
                token.cancel();
                return Err(e.into());
            }
        }
    }

    let result = if token.is_cancelled() {
        info!("Shutdown signal received, before controllers started. Closing...");
        Ok(())
    } else {
        run_operator(&state, client, config, Some(log_level), token.clone()).await
    };

    // the refresh task releases the lease once cancelled
    token.cancel();
    if let Some(lease_refresh) = lease_refresh {
        if let Err(e) = lease_refresh.await {
            error!("Lease refresh task failed: {}", e);
        }
    }
    Ok(result?)
}
