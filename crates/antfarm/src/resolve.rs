//! Turns a user-written [`AntConfig`] into a [`ResolvedAntConfig`].
//!
//! Rules, in order:
//!
//! 1. Data directory: explicit dir as given, else `<root>/<name>` (must not
//!    exist yet), else a fresh `<root>/ant-<uuid>`.
//! 2. Binary path: defaults to [`DEFAULT_NODE_BINARY`] looked up on `PATH`.
//! 3. Validation: `miner` or `littlesupplier` together with a non-zero
//!    `desired_currency` is rejected. Both would drive the miner alongside
//!    the balance maintainer.
//! 4. IP: loopback, unless NAT traversal is unavailable and the ant may not
//!    use a local address, in which case the external IP is looked up.
//! 5. Addresses: five free ports joined with the IP, never overwriting an
//!    address the caller supplied.

use crate::addr::{ExternalIpResolver, PortAllocator, compose_addr, port_of};
use crate::config::{
    AntConfig, DEFAULT_NODE_BINARY, JobKind, NatCapability, NodeAddrs, ResolvedAntConfig,
};
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Farm-wide inputs to config resolution.
pub struct ResolveContext<'a> {
    /// Root for generated and name-derived data directories.
    pub data_root: &'a Path,
    pub nat: NatCapability,
    pub ip_resolver: &'a dyn ExternalIpResolver,
    pub ports: &'a PortAllocator,
}

/// Fill in every unset field of `config` and validate it.
///
/// # Errors
///
/// `ConfigValidation`/`UnknownJob` for bad field combinations and
/// `ResourceAcquisition` when a directory, port or IP cannot be obtained.
pub async fn resolve_ant_config(
    config: &AntConfig,
    ctx: &ResolveContext<'_>,
) -> Result<ResolvedAntConfig> {
    // Validate first so nothing is created on disk for a bad config.
    let jobs = parse_jobs(&config.jobs)?;
    if config.desired_currency != 0 {
        if let Some(job) = jobs
            .iter()
            .find(|j| matches!(j, JobKind::Miner | JobKind::LittleSupplier))
        {
            return Err(Error::ConfigValidation(format!(
                "the {job} job and a desired currency target are mutually exclusive"
            )));
        }
    }

    let binary_path = resolve_binary_path(config.binary_path.as_deref())?;
    let ip = resolve_ip(config, ctx).await?;
    let addrs = allocate_addrs(config, ip, ctx.ports)?;
    let data_dir = resolve_data_dir(config, ctx.data_root)?;

    info!(
        data_dir = %data_dir.display(),
        api = %addrs.api,
        rpc = %addrs.rpc,
        host = %addrs.host,
        "resolved ant config"
    );

    Ok(ResolvedAntConfig {
        name: config.name.clone(),
        jobs,
        desired_currency: config.desired_currency,
        binary_path,
        data_dir,
        addrs,
        allow_host_local_net_address: config.allow_host_local_net_address,
        renter_disable_ip_violation_check: config.renter_disable_ip_violation_check,
    })
}

fn parse_jobs(names: &[String]) -> Result<Vec<JobKind>> {
    let mut jobs: Vec<JobKind> = Vec::with_capacity(names.len());
    for name in names {
        let job = name.parse()?;
        if !jobs.contains(&job) {
            jobs.push(job);
        }
    }
    Ok(jobs)
}

fn resolve_data_dir(config: &AntConfig, root: &Path) -> Result<PathBuf> {
    if let Some(dir) = &config.data_dir {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::ResourceAcquisition(format!("cannot create {}: {e}", dir.display()))
        })?;
        return Ok(dir.clone());
    }

    std::fs::create_dir_all(root).map_err(|e| {
        Error::ResourceAcquisition(format!("cannot create {}: {e}", root.display()))
    })?;

    let dir = match &config.name {
        Some(name) => root.join(name),
        None => root.join(format!("ant-{}", uuid::Uuid::new_v4().simple())),
    };
    // create_dir, not create_dir_all: names must be unique within a run.
    std::fs::create_dir(&dir).map_err(|e| {
        Error::ResourceAcquisition(format!("cannot create {}: {e}", dir.display()))
    })?;
    Ok(dir)
}

fn resolve_binary_path(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => return Ok(PathBuf::from(DEFAULT_NODE_BINARY)),
    };

    // Bare names are looked up on PATH by the OS; anything with a separator
    // is pinned to the current directory so the child's cwd cannot change it.
    if path.is_relative() && path.components().count() > 1 {
        let cwd = std::env::current_dir()?;
        return Ok(cwd.join(path));
    }
    Ok(path)
}

async fn resolve_ip(config: &AntConfig, ctx: &ResolveContext<'_>) -> Result<IpAddr> {
    if ctx.nat == NatCapability::Unavailable && !config.allow_host_local_net_address {
        let ip = ctx.ip_resolver.external_ip().await?;
        debug!(%ip, "using external IP for ant addresses");
        return Ok(ip);
    }
    Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn allocate_addrs(config: &AntConfig, ip: IpAddr, ports: &PortAllocator) -> Result<NodeAddrs> {
    let supplied = [
        &config.api_addr,
        &config.rpc_addr,
        &config.host_addr,
        &config.siamux_addr,
        &config.siamux_ws_addr,
    ];
    for addr in supplied.iter().filter_map(|a| a.as_deref()) {
        if let Some(port) = port_of(addr) {
            ports.reserve(port);
        }
    }

    let mut fresh = ports.free_ports(5)?.into_iter();
    let mut pick = |given: &Option<String>| -> String {
        let port = fresh.next().unwrap_or_default();
        match given {
            Some(addr) if !addr.is_empty() => addr.clone(),
            _ => compose_addr(ip, port),
        }
    };

    let addrs = NodeAddrs {
        api: pick(&config.api_addr),
        rpc: pick(&config.rpc_addr),
        host: pick(&config.host_addr),
        siamux: pick(&config.siamux_addr),
        siamux_ws: pick(&config.siamux_ws_addr),
    };

    let distinct: HashSet<&str> = addrs.all().into_iter().collect();
    if distinct.len() != 5 {
        return Err(Error::ConfigValidation(format!(
            "ant addresses must be distinct: {addrs:?}"
        )));
    }
    Ok(addrs)
}
