//! Gateway connectivity monitor.

use super::JobRunner;
use crate::task_group::{StopSignal, run_periodic};
use std::time::Duration;
use tracing::{debug, error};

/// How often the monitor checks the peer count.
pub const GATEWAY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Fewer peers than this and the node is probably only connected to itself.
const MIN_PEERS: usize = 2;

impl JobRunner {
    /// Log an error whenever the node has fewer than two peers.
    ///
    /// Waits for the fleet sync barrier first; if the runner is stopped
    /// before the barrier opens the job ends without polling. Query errors
    /// are logged and retried on the next tick.
    pub(super) async fn gateway_connectability(self, stop: StopSignal) {
        if !self.wait_for_sync(&stop).await {
            return;
        }

        let jr = &self;
        // Sleeps first so other ants get a chance to come up.
        run_periodic(stop, GATEWAY_CHECK_INTERVAL, move || jr.check_gateway_peers()).await;
    }

    async fn check_gateway_peers(&self) {
        match self.client.gateway().await {
            Err(e) => {
                error!(ant = %self.label(), "error when calling /gateway: {e}");
            }
            Ok(info) if info.peers.len() < MIN_PEERS => {
                let peers: Vec<_> = info.peers.iter().map(|p| p.net_address.as_str()).collect();
                error!(ant = %self.label(), ?peers, "ant has less than two peers");
            }
            Ok(info) => {
                debug!(ant = %self.label(), peers = info.peers.len(), "gateway ok");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::barrier::SyncBarrier;
    use crate::client::mock::MockNode;
    use crate::config::JobKind;
    use crate::jobs::tests::runner;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_waits_for_barrier() {
        let node = Arc::new(MockNode::new());
        let barrier = SyncBarrier::new();
        let jr = runner(&node, Some(barrier.clone()));
        jr.start_job(JobKind::Gateway).unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(node.state.lock().gateway_calls, 0);

        barrier.release();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(node.state.lock().gateway_calls, 2);

        jr.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_sync_exits_without_polling() {
        let node = Arc::new(MockNode::new());
        let jr = runner(&node, Some(SyncBarrier::new()));
        jr.start_job(JobKind::Gateway).unwrap();

        tokio::time::timeout(Duration::from_secs(1), jr.stop_and_wait())
            .await
            .unwrap();
        assert_eq!(node.state.lock().gateway_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_are_not_fatal() {
        let node = Arc::new(MockNode::new());
        node.state.lock().gateway_fails = true;
        let jr = runner(&node, None);
        jr.start_job(JobKind::Gateway).unwrap();

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(node.state.lock().gateway_calls, 3);

        // Recovers once the node answers again.
        node.state.lock().gateway_fails = false;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(node.state.lock().gateway_calls, 4);
        assert!(!jr.is_stopped());

        jr.stop_and_wait().await;
    }
}
