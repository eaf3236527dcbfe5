//! Coin-moving jobs: `bigspender` and `littlesupplier`.

use super::JobRunner;
use crate::client::Currency;
use crate::task_group::StopSignal;
use std::time::Duration;
use tracing::{debug, error, info};

/// Address nobody holds the keys to. Coins sent here are gone.
pub const VOID_ADDRESS: &str =
    "000000000000000000000000000000000000000000000000000000000000000089eb0d6a8a69";

/// Balance above which the big spender starts sending.
const SPEND_THRESHOLD: u64 = 50_000;
/// Coins per transaction for both jobs.
const SEND_AMOUNT: u64 = 10_000;

const BIG_SPENDER_INTERVAL: Duration = Duration::from_secs(10);
const LITTLE_SUPPLIER_INTERVAL: Duration = Duration::from_secs(60);

impl JobRunner {
    /// Whenever the wallet holds more than the threshold, send a chunk to
    /// the void address.
    pub(super) async fn big_spender(self, stop: StopSignal) {
        while stop.sleep(BIG_SPENDER_INTERVAL).await {
            let balance = match self.client.wallet_balance().await {
                Ok(balance) => balance,
                Err(e) => {
                    error!(ant = %self.label(), "could not read the wallet balance: {e}");
                    continue;
                }
            };
            if balance <= Currency::coins(SPEND_THRESHOLD) {
                continue;
            }
            let amount = Currency::coins(SEND_AMOUNT);
            match self.client.send_coins(amount, VOID_ADDRESS).await {
                Ok(()) => info!(ant = %self.label(), %amount, %balance, "big spender sent coins"),
                Err(e) => error!(ant = %self.label(), "big spender could not send coins: {e}"),
            }
        }
    }

    /// Periodically send a chunk of coins to `destination`.
    pub(super) async fn little_supplier(self, destination: String, stop: StopSignal) {
        let amount = Currency::coins(SEND_AMOUNT);
        while stop.sleep(LITTLE_SUPPLIER_INTERVAL).await {
            match self.client.wallet_balance().await {
                Ok(balance) if balance < amount => {
                    debug!(ant = %self.label(), %balance, "little supplier waiting for funds");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(ant = %self.label(), "could not read the wallet balance: {e}");
                    continue;
                }
            }
            match self.client.send_coins(amount, &destination).await {
                Ok(()) => debug!(ant = %self.label(), %amount, %destination, "little supplier sent coins"),
                Err(e) => error!(ant = %self.label(), "little supplier could not send coins: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockNode;
    use crate::config::JobKind;
    use crate::jobs::tests::runner;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_big_spender_drains_above_threshold() {
        let node = Arc::new(MockNode::new());
        node.state.lock().balance = Currency::coins(75_000);
        let jr = runner(&node, None);
        jr.start_job(JobKind::BigSpender).unwrap();

        tokio::time::sleep(Duration::from_secs(45)).await;
        jr.stop_and_wait().await;

        let state = node.state.lock();
        // 75k -> 65k -> 55k -> 45k, then it stays below the threshold.
        assert_eq!(state.sent.len(), 3);
        assert!(state.sent.iter().all(|(_, to)| to == VOID_ADDRESS));
        assert_eq!(state.balance, Currency::coins(45_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_little_supplier_feeds_destination() {
        let node = Arc::new(MockNode::new());
        node.state.lock().balance = Currency::coins(25_000);
        let jr = runner(&node, None);
        jr.start_little_supplier("spender-wallet".to_string()).unwrap();

        tokio::time::sleep(Duration::from_secs(200)).await;
        jr.stop_and_wait().await;

        let state = node.state.lock();
        assert_eq!(state.sent.len(), 2);
        assert!(state.sent.iter().all(|(amount, to)| {
            *amount == Currency::coins(SEND_AMOUNT) && to == "spender-wallet"
        }));
    }
}
