//! The `host` job: announce the node as a storage host.

use super::JobRunner;
use crate::client::Currency;
use crate::task_group::{StopSignal, run_periodic};
use std::time::Duration;
use tracing::{debug, error, info};

/// Funds a host needs before it announces (covers collateral and fees).
const HOST_MIN_FUNDS: u64 = 5_000;

const HOST_CHECK_INTERVAL: Duration = Duration::from_secs(60);

impl JobRunner {
    /// Wait for funds, configure the host to accept contracts on its host
    /// address, announce it, then keep checking the host settings.
    pub(super) async fn job_host(self, stop: StopSignal) {
        if !self
            .wait_for_balance(&stop, Currency::coins(HOST_MIN_FUNDS))
            .await
        {
            return;
        }

        let net_address = self.config.addrs.host.clone();
        if let Err(e) = self.client.host_update(&net_address, true).await {
            error!(ant = %self.label(), "could not configure host: {e}");
            return;
        }
        if let Err(e) = self.client.host_announce().await {
            error!(ant = %self.label(), "could not announce host: {e}");
            return;
        }
        info!(ant = %self.label(), %net_address, "host announced");

        let jr = &self;
        run_periodic(stop, HOST_CHECK_INTERVAL, move || jr.check_host()).await;
    }

    async fn check_host(&self) {
        match self.client.host_info().await {
            Ok(host) if !host.accepting_contracts => {
                error!(ant = %self.label(), "host is not accepting contracts");
            }
            Ok(host) => debug!(ant = %self.label(), net_address = %host.net_address, "host ok"),
            Err(e) => error!(ant = %self.label(), "error when calling /host: {e}"),
        }
    }
}
