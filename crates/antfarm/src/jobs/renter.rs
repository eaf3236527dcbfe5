//! The `renter` job: form storage contracts with the farm's hosts.

use super::JobRunner;
use crate::client::{Allowance, Currency};
use crate::task_group::{StopSignal, run_periodic};
use std::time::Duration;
use tracing::{debug, error, info};

/// Funds a renter needs before it sets an allowance.
const RENTER_MIN_FUNDS: u64 = 10_000;

const RENTER_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Allowance every renter ant uses.
fn default_allowance() -> Allowance {
    Allowance {
        funds: Currency::coins(5_000),
        hosts: 2,
        period: 50,
        renew_window: 10,
    }
}

impl JobRunner {
    /// Wait for funds, set the allowance, then keep checking that contracts
    /// have been formed.
    pub(super) async fn storage_renter(self, stop: StopSignal) {
        if !self
            .wait_for_balance(&stop, Currency::coins(RENTER_MIN_FUNDS))
            .await
        {
            return;
        }

        let allowance = default_allowance();
        let ip_check = !self.config.renter_disable_ip_violation_check;
        if let Err(e) = self.client.renter_set_allowance(&allowance, ip_check).await {
            error!(ant = %self.label(), "could not set renter allowance: {e}");
            return;
        }
        info!(ant = %self.label(), funds = %allowance.funds, hosts = allowance.hosts, "renter allowance set");

        let jr = &self;
        run_periodic(stop, RENTER_CHECK_INTERVAL, move || jr.check_contracts()).await;
    }

    async fn check_contracts(&self) {
        match self.client.renter_contract_count().await {
            Ok(0) => error!(ant = %self.label(), "renter has no contracts"),
            Ok(n) => debug!(ant = %self.label(), contracts = n, "renter ok"),
            Err(e) => error!(ant = %self.label(), "error when calling /renter/contracts: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockNode;
    use crate::config::JobKind;
    use crate::jobs::JobRunner;
    use crate::jobs::tests::{runner, test_config};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_renter_sets_allowance_once_funded() {
        let node = Arc::new(MockNode::new());
        node.state.lock().balance = Currency::coins(10_000);
        let jr = runner(&node, None);
        jr.start_job(JobKind::Renter).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let (allowance, ip_check) = node.state.lock().allowance.clone().unwrap();
        assert_eq!(allowance, default_allowance());
        assert!(ip_check);

        jr.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_renter_honours_disabled_ip_check() {
        let node = Arc::new(MockNode::new());
        node.state.lock().balance = Currency::coins(20_000);
        let mut config = (*test_config()).clone();
        config.renter_disable_ip_violation_check = true;
        let jr = JobRunner::new(node.clone(), Arc::new(config), None);
        jr.start_job(JobKind::Renter).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let (_, ip_check) = node.state.lock().allowance.clone().unwrap();
        assert!(!ip_check);

        jr.stop_and_wait().await;
    }
}
