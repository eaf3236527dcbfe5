//! Declarative farm and ant configuration.
//!
//! [`AntConfig`] is what a user writes; most fields are optional and get
//! filled in by [`crate::resolve::resolve_ant_config`], which produces a
//! [`ResolvedAntConfig`] with every field populated.
//!
//! # Example (YAML)
//!
//! ```yaml
//! listen_address: 127.0.0.1:3000
//! data_dir: ./antfarm-data
//! auto_connect: true
//! wait_for_sync: true
//! sync_timeout: 10m
//! ant_configs:
//!   - jobs: [gateway, miner]
//!   - jobs: [host]
//!     desired_currency: 100000
//!   - name: Renter
//!     jobs: [renter]
//!     desired_currency: 100000
//!     renter_disable_ip_violation_check: true
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Binary launched when an ant does not name one.
pub const DEFAULT_NODE_BINARY: &str = "siad";

/// Root directory for generated ant data directories.
pub const DEFAULT_DATA_DIR: &str = "./antfarm-data";

/// A named background behavior an ant runs against its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Miner,
    Host,
    Renter,
    Gateway,
    BigSpender,
    LittleSupplier,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Miner => "miner",
            JobKind::Host => "host",
            JobKind::Renter => "renter",
            JobKind::Gateway => "gateway",
            JobKind::BigSpender => "bigspender",
            JobKind::LittleSupplier => "littlesupplier",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "miner" => Ok(JobKind::Miner),
            "host" => Ok(JobKind::Host),
            "renter" => Ok(JobKind::Renter),
            "gateway" => Ok(JobKind::Gateway),
            "bigspender" => Ok(JobKind::BigSpender),
            "littlesupplier" => Ok(JobKind::LittleSupplier),
            other => Err(Error::UnknownJob(other.to_string())),
        }
    }
}

/// Whether the local router can forward ports for us.
///
/// Discovered once by the caller and passed into config resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatCapability {
    #[default]
    Available,
    Unavailable,
}

/// What the user asks for in one ant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntConfig {
    /// Optional name; a named ant gets a fixed data directory `<root>/<name>`.
    pub name: Option<String>,
    /// Job names, see [`JobKind`].
    pub jobs: Vec<String>,
    /// Target wallet balance in whole coins. Mutually exclusive with `miner`.
    pub desired_currency: u64,
    pub binary_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub api_addr: Option<String>,
    pub rpc_addr: Option<String>,
    pub host_addr: Option<String>,
    pub siamux_addr: Option<String>,
    pub siamux_ws_addr: Option<String>,
    /// Let the host announce a local network address.
    pub allow_host_local_net_address: bool,
    /// Only affects renters.
    pub renter_disable_ip_violation_check: bool,
}

/// The five listening addresses of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddrs {
    pub api: String,
    pub rpc: String,
    pub host: String,
    pub siamux: String,
    pub siamux_ws: String,
}

impl NodeAddrs {
    pub fn all(&self) -> [&str; 5] {
        [
            &self.api,
            &self.rpc,
            &self.host,
            &self.siamux,
            &self.siamux_ws,
        ]
    }
}

/// An [`AntConfig`] with every field filled in and validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAntConfig {
    pub name: Option<String>,
    pub jobs: Vec<JobKind>,
    pub desired_currency: u64,
    pub binary_path: PathBuf,
    pub data_dir: PathBuf,
    pub addrs: NodeAddrs,
    pub allow_host_local_net_address: bool,
    pub renter_disable_ip_violation_check: bool,
}

impl ResolvedAntConfig {
    pub fn has_job(&self, job: JobKind) -> bool {
        self.jobs.contains(&job)
    }

    /// Label used in logs: the name if set, else the data directory.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.data_dir.display().to_string(),
        }
    }
}

/// Farm-level settings plus every ant config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntfarmConfig {
    /// Address of the control HTTP surface. Port 0 picks a free port.
    pub listen_address: SocketAddr,
    /// Root for generated and name-derived ant directories.
    pub data_dir: PathBuf,
    pub ant_configs: Vec<AntConfig>,
    /// Connect every ant's gateway to the first ant after startup.
    pub auto_connect: bool,
    /// Block creation until all ants share one consensus group.
    pub wait_for_sync: bool,
    pub nat_traversal: NatCapability,
    /// Plain-text "what is my IP" service used when NAT traversal is unavailable.
    pub external_ip_service: String,
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub sync_timeout: Duration,
    /// Control surfaces of other farms to join after startup.
    pub external_farms: Vec<String>,
}

impl Default for AntfarmConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            ant_configs: Vec::new(),
            auto_connect: false,
            wait_for_sync: false,
            nat_traversal: NatCapability::Available,
            external_ip_service: "https://api.ipify.org".to_string(),
            startup_timeout: crate::ant::DEFAULT_STARTUP_TIMEOUT,
            sync_timeout: Duration::from_secs(5 * 60),
            external_farms: Vec::new(),
        }
    }
}

impl AntfarmConfig {
    /// Load a farm config from a `.json` file, or YAML for any other extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&contents)
                .map_err(|e| Error::ConfigValidation(format!("{}: {}", path.display(), e)))
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::ConfigValidation(format!("{}: {}", path.display(), e)))
        }
    }
}
