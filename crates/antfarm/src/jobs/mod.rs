//! Per-ant job runner.
//!
//! A [`JobRunner`] owns the background behaviors ("jobs") that drive
//! synthetic load against one node:
//!
//! | Job              | Behavior                                                  |
//! |------------------|-----------------------------------------------------------|
//! | `miner`          | mine blocks, complain when the balance stops growing      |
//! | `host`           | wait for funds, announce as a host, watch the settings    |
//! | `renter`         | wait for funds, set an allowance, watch for contracts     |
//! | `gateway`        | after fleet sync, complain when the node has < 2 peers     |
//! | `bigspender`     | keep sending coins to the void address                    |
//! | `littlesupplier` | keep sending coins to a big spender's wallet              |
//!
//! Every job runs as its own task in the runner's [`TaskGroup`] and exits
//! when the group is stopped. Renter file transfers (upload, download and
//! verification) are driven on demand rather than as a job.

mod gateway;
mod host;
mod miner;
mod renter;
mod spender;
mod transfer;

pub use gateway::GATEWAY_CHECK_INTERVAL;
pub use transfer::{UPLOAD_DIR, UploadedFile, merkle_root};

use crate::barrier::SyncBarrier;
use crate::client::{Currency, NodeClient};
use crate::config::{JobKind, ResolvedAntConfig};
use crate::error::{Error, Result};
use crate::task_group::{StopSignal, TaskGroup};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Password every ant's wallet is encrypted with.
pub const WALLET_PASSWORD: &str = "antfarm-wallet";

/// How often jobs waiting for funds re-check the balance.
const BALANCE_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Supervisor of one ant's background jobs.
#[derive(Clone)]
pub struct JobRunner {
    client: Arc<dyn NodeClient>,
    config: Arc<ResolvedAntConfig>,
    tg: TaskGroup,
    sync_barrier: Option<SyncBarrier>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("ant", &self.config.label())
            .field("tasks", &self.tg)
            .field("sync_barrier", &self.sync_barrier)
            .finish()
    }
}

impl JobRunner {
    /// Runner for the node behind `client`. Jobs that must wait for fleet
    /// sync block on `sync_barrier` when one is given.
    pub fn new(
        client: Arc<dyn NodeClient>,
        config: Arc<ResolvedAntConfig>,
        sync_barrier: Option<SyncBarrier>,
    ) -> Self {
        Self {
            client,
            config,
            tg: TaskGroup::new(),
            sync_barrier,
        }
    }

    /// Create (if needed) and unlock the node's wallet.
    pub async fn init_wallet(&self) -> Result<()> {
        // Init fails on a wallet that already exists, e.g. a reused data dir.
        if let Err(e) = self.client.wallet_init(WALLET_PASSWORD).await {
            warn!(ant = %self.label(), "wallet init failed, trying unlock: {e}");
        }
        self.client.wallet_unlock(WALLET_PASSWORD).await
    }

    /// Start a job by name.
    pub fn start_job_by_name(&self, name: &str) -> Result<()> {
        self.start_job(name.parse()?)
    }

    /// Start a job that needs no fleet-level inputs.
    ///
    /// # Errors
    ///
    /// `MissingPrerequisite` for `littlesupplier` (use
    /// [`start_little_supplier`](Self::start_little_supplier)) and
    /// `TaskGroupStopped` after [`stop`](Self::stop).
    pub fn start_job(&self, job: JobKind) -> Result<()> {
        let jr = self.clone();
        match job {
            JobKind::Miner => self.tg.spawn(job.as_str(), |stop| jr.block_mining(stop)),
            JobKind::Host => self.tg.spawn(job.as_str(), |stop| jr.job_host(stop)),
            JobKind::Renter => self.tg.spawn(job.as_str(), |stop| jr.storage_renter(stop)),
            JobKind::Gateway => self
                .tg
                .spawn(job.as_str(), |stop| jr.gateway_connectability(stop)),
            JobKind::BigSpender => self.tg.spawn(job.as_str(), |stop| jr.big_spender(stop)),
            JobKind::LittleSupplier => Err(Error::MissingPrerequisite {
                job: job.to_string(),
                reason: "needs a destination wallet address".to_string(),
            }),
        }?;
        info!(ant = %self.label(), %job, "started job");
        Ok(())
    }

    /// Start `littlesupplier`, sending coins to `destination`.
    pub fn start_little_supplier(&self, destination: String) -> Result<()> {
        let jr = self.clone();
        self.tg.spawn(JobKind::LittleSupplier.as_str(), move |stop| {
            jr.little_supplier(destination, stop)
        })?;
        info!(ant = %self.label(), job = %JobKind::LittleSupplier, "started job");
        Ok(())
    }

    /// Keep the wallet at `desired` by toggling the miner.
    pub fn start_balance_maintainer(&self, desired: Currency) -> Result<()> {
        let jr = self.clone();
        self.tg.spawn("balance-maintainer", move |stop| {
            jr.balance_maintainer(desired, stop)
        })?;
        info!(ant = %self.label(), %desired, "started balance maintainer");
        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.tg.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.tg.is_stopped()
    }

    pub fn stop(&self) {
        self.tg.stop();
    }

    /// Resolves once the runner has been stopped and every job has exited.
    pub async fn wait(&self) {
        self.tg.wait().await;
    }

    pub async fn stop_and_wait(&self) {
        self.tg.stop_and_wait().await;
    }

    fn label(&self) -> String {
        self.config.label()
    }

    /// Block until the fleet has synced. Returns `false` if the runner was
    /// stopped first. Runners without a barrier pass straight through.
    async fn wait_for_sync(&self, stop: &StopSignal) -> bool {
        let Some(barrier) = &self.sync_barrier else {
            return !stop.is_stopped();
        };
        tokio::select! {
            biased;
            _ = stop.stopped() => false,
            _ = barrier.wait() => true,
        }
    }

    /// Block until the wallet holds at least `min`. Returns `false` if the
    /// runner was stopped first.
    async fn wait_for_balance(&self, stop: &StopSignal, min: Currency) -> bool {
        loop {
            match self.client.wallet_balance().await {
                Ok(balance) if balance >= min => return true,
                Ok(_) => {}
                Err(e) => warn!(ant = %self.label(), "balance check failed: {e}"),
            }
            if !stop.sleep(BALANCE_POLL_INTERVAL).await {
                return false;
            }
        }
    }
}
