//! The antfarm: a fleet of ants started, wired and watched together.
//!
//! [`Antfarm::create`] runs the whole setup sequence:
//!
//! 1. resolve every [`AntConfig`](crate::config::AntConfig)
//! 2. start every ant in order; a failure closes the ones already running
//! 3. look up the big spender's wallet, then start every ant's jobs
//! 4. connect the gateways (`auto_connect`)
//! 5. wait for a single consensus group and open the sync barrier
//!    (`wait_for_sync`)
//! 6. serve `GET /ants` and join the configured external farms
//!
//! Any error after step 2 closes every ant before it is returned.

use crate::addr::{HttpIpResolver, PortAllocator};
use crate::ant::Ant;
use crate::api::{farm_routes, fetch_ants};
use crate::barrier::SyncBarrier;
use crate::config::{AntfarmConfig, JobKind, ResolvedAntConfig};
use crate::consensus::consensus_groups;
use crate::error::{Error, Result};
use crate::resolve::{ResolveContext, resolve_ant_config};
use crate::topology::{connect_ants, connect_peers};
use futures::future::join_all;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often [`Antfarm::wait_for_sync`] re-runs the consensus analysis.
const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// A running fleet of ants plus its control surface.
pub struct Antfarm {
    ants: Arc<Vec<Arc<Ant>>>,
    sync_barrier: SyncBarrier,
    server: Mutex<Server>,
}

impl std::fmt::Debug for Antfarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Antfarm")
            .field("ants", &self.ants.len())
            .field("listen_addr", &self.listen_addr())
            .field("synced", &self.sync_barrier.is_released())
            .finish()
    }
}

impl Antfarm {
    /// Build and start a farm.
    ///
    /// # Errors
    ///
    /// The first setup error, wrapped with the ant it concerns where there
    /// is one. No ant is left running on error.
    pub async fn create(config: AntfarmConfig) -> Result<Self> {
        let resolved = resolve_all(&config).await?;

        let sync_barrier = SyncBarrier::new();
        let job_barrier = config.wait_for_sync.then(|| sync_barrier.clone());
        let ants = start_ants(resolved, job_barrier, config.startup_timeout).await?;

        let farm = Self {
            ants: Arc::new(ants),
            sync_barrier,
            server: Mutex::new(Server {
                addr: config.listen_address,
                shutdown: None,
                handle: None,
            }),
        };
        if let Err(e) = farm.setup(&config).await {
            farm.close().await;
            return Err(e);
        }

        info!(ants = farm.ants.len(), listen = %farm.listen_addr(), "antfarm ready");
        Ok(farm)
    }

    async fn setup(&self, config: &AntfarmConfig) -> Result<()> {
        start_fleet_jobs(&self.ants).await?;

        if config.auto_connect {
            connect_ants(&self.ants).await?;
        }
        if config.wait_for_sync {
            self.wait_for_sync(config.sync_timeout).await?;
        }

        self.serve(config.listen_address)?;

        for addr in &config.external_farms {
            self.connect_external_farm(addr).await?;
        }
        Ok(())
    }

    fn serve(&self, addr: SocketAddr) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let (bound, server) = warp::serve(farm_routes(self.ants.clone()))
            .try_bind_with_graceful_shutdown(addr, async move {
                rx.await.ok();
            })
            .map_err(|e| Error::ResourceAcquisition(format!("could not listen on {addr}: {e}")))?;

        let mut guard = self.server.lock();
        guard.addr = bound;
        guard.shutdown = Some(tx);
        guard.handle = Some(tokio::spawn(server));
        info!(addr = %bound, "serving antfarm API");
        Ok(())
    }

    pub fn ants(&self) -> &[Arc<Ant>] {
        &self.ants
    }

    pub fn ant_by_name(&self, name: &str) -> Option<&Arc<Ant>> {
        self.ants.iter().find(|ant| ant.name() == Some(name))
    }

    /// Address the control surface is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.server.lock().addr
    }

    /// Barrier opened the first time the fleet is seen in sync.
    pub fn sync_barrier(&self) -> &SyncBarrier {
        &self.sync_barrier
    }

    /// Poll the consensus analysis until every ant is in one group, then
    /// open the sync barrier.
    ///
    /// # Errors
    ///
    /// `SyncTimeout` if the fleet has not converged within `timeout`.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match consensus_groups(&self.ants).await {
                // An empty farm is trivially in sync.
                Ok(groups) if groups.len() <= 1 => {
                    self.sync_barrier.release();
                    info!(ants = self.ants.len(), "ants are synced");
                    return Ok(());
                }
                Ok(groups) => debug!(groups = groups.len(), "ants not synced yet"),
                Err(e) => debug!("consensus poll failed: {e}"),
            }
            if Instant::now() >= deadline {
                return Err(Error::SyncTimeout(timeout));
            }
            tokio::time::sleep(SYNC_POLL_INTERVAL).await;
        }
    }

    /// Join the farm whose control surface is at `addr`: this farm's first
    /// ant is asked to connect to every ant the other farm lists.
    pub async fn connect_external_farm(&self, addr: &str) -> Result<()> {
        let Some(bootstrap) = self.ants.first() else {
            return Err(Error::Topology("this farm has no ants".to_string()));
        };
        let remote = fetch_ants(addr).await?;
        if remote.is_empty() {
            return Err(Error::Topology(format!("farm at {addr} has no ants")));
        }

        let peers: Vec<&str> = remote.iter().map(|ant| ant.rpc_address.as_str()).collect();
        connect_peers(bootstrap.client().as_ref(), &peers).await?;
        info!(farm = %addr, ants = remote.len(), "connected to external farm");
        Ok(())
    }

    /// Stop every job, close every ant and shut the control surface down.
    /// Safe to call repeatedly.
    pub async fn close(&self) {
        let (shutdown, handle) = {
            let mut guard = self.server.lock();
            (guard.shutdown.take(), guard.handle.take())
        };
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("antfarm API task ended abnormally: {e}");
            }
        }

        close_ants(&self.ants).await;
    }
}

impl Drop for Antfarm {
    fn drop(&mut self) {
        // The server task holds the ants; let it go so their processes die.
        if let Some(tx) = self.server.get_mut().shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn ant_id(index: usize, label: &str) -> String {
    format!("#{index} ({label})")
}

async fn resolve_all(config: &AntfarmConfig) -> Result<Vec<ResolvedAntConfig>> {
    std::fs::create_dir_all(&config.data_dir).map_err(|e| {
        Error::ResourceAcquisition(format!(
            "could not create {}: {e}",
            config.data_dir.display()
        ))
    })?;

    let ip_resolver = HttpIpResolver::new(config.external_ip_service.clone())?;
    let ports = PortAllocator::new();
    let ctx = ResolveContext {
        data_root: &config.data_dir,
        nat: config.nat_traversal,
        ip_resolver: &ip_resolver,
        ports: &ports,
    };

    let mut resolved = Vec::with_capacity(config.ant_configs.len());
    for (i, ant_config) in config.ant_configs.iter().enumerate() {
        let label = ant_config.name.as_deref().unwrap_or("unnamed");
        let ant = resolve_ant_config(ant_config, &ctx)
            .await
            .map_err(|e| e.for_ant(ant_id(i, label)))?;
        resolved.push(ant);
    }
    Ok(resolved)
}

/// Start ants in order. All or nothing: on the first failure every ant
/// already running is closed.
async fn start_ants(
    configs: Vec<ResolvedAntConfig>,
    sync_barrier: Option<SyncBarrier>,
    startup_timeout: Duration,
) -> Result<Vec<Arc<Ant>>> {
    let mut ants: Vec<Arc<Ant>> = Vec::with_capacity(configs.len());
    for (i, config) in configs.into_iter().enumerate() {
        let label = config.label();
        match Ant::start(config, sync_barrier.clone(), startup_timeout).await {
            Ok(ant) => ants.push(Arc::new(ant)),
            Err(e) => {
                warn!(ant = %label, started = ants.len(), "ant failed to start, closing the others");
                close_ants(&ants).await;
                return Err(e.for_ant(ant_id(i, &label)));
            }
        }
    }
    Ok(ants)
}

async fn close_ants(ants: &[Arc<Ant>]) {
    join_all(ants.iter().map(|ant| ant.close())).await;
}

/// Start every ant's jobs. The big spender's wallet address is looked up
/// before any job starts, so suppliers know where to send coins.
pub(crate) async fn start_fleet_jobs(ants: &[Arc<Ant>]) -> Result<()> {
    let spender_addr = spender_address(ants).await;
    for (i, ant) in ants.iter().enumerate() {
        ant.start_jobs(spender_addr.as_deref())
            .map_err(|e| e.for_ant(ant_id(i, &ant.label())))?;
    }
    Ok(())
}

async fn spender_address(ants: &[Arc<Ant>]) -> Option<String> {
    let spender = ants
        .iter()
        .find(|ant| ant.config().has_job(JobKind::BigSpender))?;
    match spender.wallet_address().await {
        Ok(addr) => {
            debug!(ant = %spender.label(), %addr, "resolved big spender address");
            Some(addr)
        }
        Err(e) => {
            warn!(ant = %spender.label(), "could not get big spender address: {e}");
            None
        }
    }
}
