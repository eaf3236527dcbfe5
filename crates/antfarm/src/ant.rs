//! Supervisor for a single node process ("ant").
//!
//! ```text
//!   start() --spawn--> node process --poll /consensus every 100ms--> ready
//!      |                    |                                          |
//!      |              exits early / timeout                      wallet init
//!      |                    v                                          v
//!      +-------------- kill + ProcessStartup                    Ant handed out
//! ```
//!
//! The child is spawned with `kill_on_drop`, so an `Ant` that is dropped
//! without [`Ant::close`] still takes its process down with it.
//! [`Ant::update_binary`] swaps the node binary in place: same data
//! directory, same addresses, new process.

use crate::barrier::SyncBarrier;
use crate::client::{Currency, HttpNodeClient, NodeClient};
use crate::config::{JobKind, ResolvedAntConfig};
use crate::consensus::SeenBlocks;
use crate::error::{Error, Result};
use crate::jobs::JobRunner;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default bound on how long a node may take to answer its API.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Modules every ant loads: gateway, consensus, transaction pool, wallet,
/// host, miner, renter.
const NODE_MODULES: &str = "gctwhmr";

/// What a farm publishes about each of its ants on `GET /ants`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntInfo {
    pub name: Option<String>,
    pub api_address: String,
    pub rpc_address: String,
    pub config: ResolvedAntConfig,
}

/// One node process plus its job runner.
pub struct Ant {
    config: Arc<ResolvedAntConfig>,
    // Starts as `config.binary_path`; replaced by `update_binary`.
    binary_path: Mutex<PathBuf>,
    client: Arc<dyn NodeClient>,
    process: tokio::sync::Mutex<Option<Child>>,
    // Only the consensus analyzer writes here.
    seen_blocks: Mutex<SeenBlocks>,
    jobs: JobRunner,
}

impl std::fmt::Debug for Ant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ant")
            .field("label", &self.label())
            .field("api", &self.config.addrs.api)
            .field("rpc", &self.config.addrs.rpc)
            .finish()
    }
}

impl Ant {
    /// Launch the node described by `config` and wait until its API answers.
    ///
    /// On any failure the process is killed before the error is returned.
    pub async fn start(
        config: ResolvedAntConfig,
        sync_barrier: Option<SyncBarrier>,
        startup_timeout: Duration,
    ) -> Result<Self> {
        let label = config.label();
        let mut child = spawn_node(&config, &config.binary_path)?;

        let client: Arc<dyn NodeClient> = Arc::new(HttpNodeClient::new(&config.addrs.api)?);
        let config = Arc::new(config);
        let ant = Self::new(config, client, sync_barrier);

        if let Err(e) = ant.wait_until_ready(&mut child, startup_timeout).await {
            kill(&mut child, &label).await;
            return Err(e);
        }
        *ant.process.lock().await = Some(child);

        if let Err(e) = ant.jobs.init_wallet().await {
            ant.close().await;
            return Err(Error::ProcessStartup(format!("wallet setup failed: {e}")));
        }

        info!(ant = %label, api = %ant.config.addrs.api, rpc = %ant.config.addrs.rpc, "ant started");
        Ok(ant)
    }

    /// Wrap a node someone else runs. Closing the ant only stops its jobs.
    pub fn attach(
        config: ResolvedAntConfig,
        client: Arc<dyn NodeClient>,
        sync_barrier: Option<SyncBarrier>,
    ) -> Self {
        Self::new(Arc::new(config), client, sync_barrier)
    }

    fn new(
        config: Arc<ResolvedAntConfig>,
        client: Arc<dyn NodeClient>,
        sync_barrier: Option<SyncBarrier>,
    ) -> Self {
        let jobs = JobRunner::new(client.clone(), config.clone(), sync_barrier);
        Self {
            binary_path: Mutex::new(config.binary_path.clone()),
            config,
            client,
            process: tokio::sync::Mutex::new(None),
            seen_blocks: Mutex::new(SeenBlocks::new()),
            jobs,
        }
    }

    async fn wait_until_ready(&self, child: &mut Child, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(Error::ProcessStartup(format!(
                    "node exited before its API came up ({status})"
                )));
            }
            // No readiness check outlives the startup deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.client.consensus()).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => debug!(ant = %self.label(), "API not ready: {e}"),
                Err(_) => debug!(ant = %self.label(), "API readiness check timed out"),
            }
            if Instant::now() >= deadline {
                return Err(Error::ProcessStartup(format!(
                    "API at {} did not respond within {timeout:?}",
                    self.config.addrs.api
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Start every job in the config. `littlesupplier` needs `spender_addr`;
    /// without it the job is skipped, and with it `miner` is started too
    /// unless the config already lists it.
    pub fn start_jobs(&self, spender_addr: Option<&str>) -> Result<()> {
        for &job in &self.config.jobs {
            if job != JobKind::LittleSupplier {
                self.jobs.start_job(job)?;
                continue;
            }
            let Some(dest) = spender_addr else {
                warn!(ant = %self.label(), "no big spender address in the fleet, skipping littlesupplier");
                continue;
            };
            self.jobs.start_little_supplier(dest.to_string())?;
            if !self.config.has_job(JobKind::Miner) {
                self.jobs.start_job(JobKind::Miner)?;
            }
        }
        if self.config.desired_currency > 0 {
            self.jobs
                .start_balance_maintainer(Currency::coins(self.config.desired_currency))?;
        }
        Ok(())
    }

    /// Replace the node binary: kill the running process, relaunch `binary`
    /// on the same data directory and addresses, wait for its API and unlock
    /// the wallet again. Jobs keep running across the restart.
    ///
    /// # Errors
    ///
    /// `ProcessStartup` if the ant has no process (attached or closed) or
    /// the new binary does not come up. In the second case the ant is left
    /// without a process.
    pub async fn update_binary(&self, binary: PathBuf, startup_timeout: Duration) -> Result<()> {
        let label = self.label();
        let mut process = self.process.lock().await;
        let Some(mut old) = process.take() else {
            return Err(Error::ProcessStartup(format!(
                "{label} has no node process to update"
            )));
        };
        info!(ant = %label, from = %self.binary_path().display(), to = %binary.display(), "updating node binary");
        kill(&mut old, &label).await;

        let mut child = spawn_node(&self.config, &binary)?;
        if let Err(e) = self.wait_until_ready(&mut child, startup_timeout).await {
            kill(&mut child, &label).await;
            return Err(e);
        }
        *process = Some(child);
        *self.binary_path.lock() = binary;
        drop(process);

        self.jobs
            .init_wallet()
            .await
            .map_err(|e| Error::ProcessStartup(format!("wallet setup after update failed: {e}")))?;
        info!(ant = %label, "node binary updated");
        Ok(())
    }

    /// Binary the current node process was launched from.
    pub fn binary_path(&self) -> PathBuf {
        self.binary_path.lock().clone()
    }

    pub async fn wallet_address(&self) -> Result<String> {
        self.client.wallet_address().await
    }

    /// Stop the jobs and terminate the process. Safe to call repeatedly.
    pub async fn close(&self) {
        self.jobs.stop_and_wait().await;
        if let Some(mut child) = self.process.lock().await.take() {
            kill(&mut child, &self.label()).await;
            info!(ant = %self.label(), "ant closed");
        }
    }

    pub fn client(&self) -> &Arc<dyn NodeClient> {
        &self.client
    }

    pub fn config(&self) -> &ResolvedAntConfig {
        &self.config
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn label(&self) -> String {
        self.config.label()
    }

    pub fn api_addr(&self) -> &str {
        &self.config.addrs.api
    }

    pub fn rpc_addr(&self) -> &str {
        &self.config.addrs.rpc
    }

    pub fn jobs(&self) -> &JobRunner {
        &self.jobs
    }

    pub fn info(&self) -> AntInfo {
        let mut config = (*self.config).clone();
        config.binary_path = self.binary_path();
        AntInfo {
            name: config.name.clone(),
            api_address: config.addrs.api.clone(),
            rpc_address: config.addrs.rpc.clone(),
            config,
        }
    }

    pub(crate) fn record_block(&self, height: u64, block_id: &str) {
        self.seen_blocks.lock().record(height, block_id);
    }

    /// Snapshot of the heights and block ids observed so far.
    pub fn seen_blocks(&self) -> SeenBlocks {
        self.seen_blocks.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn detached_for_test(client: Arc<dyn NodeClient>) -> Arc<Self> {
        let config = (*crate::jobs::tests::test_config()).clone();
        Arc::new(Self::attach(config, client, None))
    }
}

fn spawn_node(config: &ResolvedAntConfig, binary: &Path) -> Result<Child> {
    let args = node_args(config);
    debug!(ant = %config.label(), binary = %binary.display(), ?args, "launching node");
    Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::ProcessStartup(format!("could not launch {}: {e}", binary.display())))
}

async fn kill(child: &mut Child, label: &str) {
    if let Err(e) = child.kill().await {
        warn!(ant = %label, "could not kill node process: {e}");
    }
}

/// Command line for the node.
pub(crate) fn node_args(config: &ResolvedAntConfig) -> Vec<String> {
    let addrs = &config.addrs;
    let mut args = vec![
        "--modules".to_string(),
        NODE_MODULES.to_string(),
        "--no-bootstrap".to_string(),
        "--api-addr".to_string(),
        addrs.api.clone(),
        "--rpc-addr".to_string(),
        addrs.rpc.clone(),
        "--host-addr".to_string(),
        addrs.host.clone(),
        "--siamux-addr".to_string(),
        addrs.siamux.clone(),
        "--siamux-addr-ws".to_string(),
        addrs.siamux_ws.clone(),
        "--sia-directory".to_string(),
        config.data_dir.display().to_string(),
    ];
    if !is_loopback(&addrs.api) {
        args.push("--disable-api-security".to_string());
    }
    args
}

/// `true` for `127.0.0.1:p`, `[::1]:p`, `localhost:p` and `:p`.
fn is_loopback(addr: &str) -> bool {
    let Some((host, _)) = addr.rsplit_once(':') else {
        return false;
    };
    if host.is_empty() || host == "localhost" {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}
