//! Mining jobs: the `miner` job and the balance maintainer.

use super::JobRunner;
use crate::client::Currency;
use crate::task_group::StopSignal;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the miner checks that its balance is still growing.
const MINER_CHECK_INTERVAL: Duration = Duration::from_secs(100);

/// How often the balance maintainer re-evaluates the wallet.
const BALANCE_MAINTAINER_INTERVAL: Duration = Duration::from_secs(20);

impl JobRunner {
    /// Start the CPU miner and periodically check that the balance grows.
    pub(super) async fn block_mining(self, stop: StopSignal) {
        if let Err(e) = self.client.miner_start().await {
            error!(ant = %self.label(), "could not start the miner: {e}");
            return;
        }

        let mut last_balance = self.client.wallet_balance().await.unwrap_or(Currency::ZERO);
        while stop.sleep(MINER_CHECK_INTERVAL).await {
            match self.client.wallet_balance().await {
                Ok(balance) if balance <= last_balance => {
                    error!(
                        ant = %self.label(),
                        %balance,
                        "miner balance did not increase in the last {}s",
                        MINER_CHECK_INTERVAL.as_secs()
                    );
                }
                Ok(balance) => {
                    debug!(ant = %self.label(), %balance, "miner balance grew");
                    last_balance = balance;
                }
                Err(e) => error!(ant = %self.label(), "could not read the wallet balance: {e}"),
            }
        }
    }

    /// Mine while the balance is below `desired`, stop mining once it is
    /// reached. Runs alongside whatever other jobs the ant has.
    pub(super) async fn balance_maintainer(self, desired: Currency, stop: StopSignal) {
        let mut mining = false;
        loop {
            match self.client.wallet_balance().await {
                Ok(balance) if balance < desired && !mining => {
                    info!(ant = %self.label(), %balance, %desired, "balance low, starting miner");
                    match self.client.miner_start().await {
                        Ok(()) => mining = true,
                        Err(e) => warn!(ant = %self.label(), "could not start the miner: {e}"),
                    }
                }
                Ok(balance) if balance >= desired && mining => {
                    info!(ant = %self.label(), %balance, %desired, "balance reached, stopping miner");
                    match self.client.miner_stop().await {
                        Ok(()) => mining = false,
                        Err(e) => warn!(ant = %self.label(), "could not stop the miner: {e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(ant = %self.label(), "could not read the wallet balance: {e}"),
            }
            if !stop.sleep(BALANCE_MAINTAINER_INTERVAL).await {
                return;
            }
        }
    }
}
