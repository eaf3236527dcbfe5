//! Client for the node's HTTP control API.
//!
//! The node itself is an external collaborator; everything the farm needs
//! from it goes through the [`NodeClient`] trait so that jobs, topology and
//! consensus analysis can be exercised against an in-memory node in tests.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default timeout for a single API request.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent the node requires on every API request.
const USER_AGENT: &str = "Sia-Agent";

/// An amount of currency in base units (10^24 per coin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Currency(pub u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);
    const BASE_UNITS_PER_COIN: u128 = 1_000_000_000_000_000_000_000_000;

    /// `n` whole coins.
    pub const fn coins(n: u64) -> Self {
        Currency((n as u128).saturating_mul(Self::BASE_UNITS_PER_COIN))
    }

    pub fn base_units(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::BASE_UNITS_PER_COIN;
        write!(f, "{whole} SC")
    }
}

/// Current chain tip as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusInfo {
    pub height: u64,
    #[serde(rename = "currentblock")]
    pub current_block: String,
    #[serde(default)]
    pub synced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPeer {
    #[serde(rename = "netaddress")]
    pub net_address: String,
    #[serde(default)]
    pub inbound: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    #[serde(rename = "netaddress")]
    pub net_address: String,
    #[serde(default)]
    pub peers: Vec<GatewayPeer>,
}

impl GatewayInfo {
    pub fn has_peer(&self, addr: &str) -> bool {
        self.peers.iter().any(|p| p.net_address == addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostInfo {
    pub net_address: String,
    pub accepting_contracts: bool,
}

/// Renter spending settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub funds: Currency,
    pub hosts: u64,
    pub period: u64,
    pub renew_window: u64,
}

/// A file the renter knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenterFile {
    #[serde(rename = "siapath")]
    pub sia_path: String,
    #[serde(rename = "filesize")]
    pub file_size: u64,
    #[serde(default)]
    pub available: bool,
    #[serde(rename = "uploadprogress", default)]
    pub upload_progress: f64,
}

/// Everything the farm asks of a running node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn consensus(&self) -> Result<ConsensusInfo>;
    async fn gateway(&self) -> Result<GatewayInfo>;
    async fn gateway_connect(&self, addr: &str) -> Result<()>;

    async fn wallet_init(&self, password: &str) -> Result<()>;
    async fn wallet_unlock(&self, password: &str) -> Result<()>;
    async fn wallet_address(&self) -> Result<String>;
    async fn wallet_balance(&self) -> Result<Currency>;
    async fn send_coins(&self, amount: Currency, destination: &str) -> Result<()>;

    async fn miner_start(&self) -> Result<()>;
    async fn miner_stop(&self) -> Result<()>;

    async fn host_update(&self, net_address: &str, accepting_contracts: bool) -> Result<()>;
    async fn host_announce(&self) -> Result<()>;
    async fn host_info(&self) -> Result<HostInfo>;

    async fn renter_set_allowance(
        &self,
        allowance: &Allowance,
        ip_violation_check: bool,
    ) -> Result<()>;
    async fn renter_contract_count(&self) -> Result<usize>;

    /// Whether the renter has enough contracts to upload with the given
    /// redundancy.
    async fn renter_upload_ready(&self, data_pieces: u64, parity_pieces: u64) -> Result<bool>;
    /// Start uploading the local file `source` to `sia_path`.
    async fn renter_upload(
        &self,
        sia_path: &str,
        source: &Path,
        data_pieces: u64,
        parity_pieces: u64,
    ) -> Result<()>;
    async fn renter_file(&self, sia_path: &str) -> Result<RenterFile>;
    /// Download `sia_path` to the local file `destination`. Returns once the
    /// node has written the whole file.
    async fn renter_download(&self, sia_path: &str, destination: &Path) -> Result<()>;
}

/// [`NodeClient`] over the node's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct WalletAddressResponse {
    address: String,
}

#[derive(Deserialize)]
struct WalletResponse {
    #[serde(rename = "confirmedsiacoinbalance")]
    confirmed_balance: String,
}

#[derive(Deserialize)]
struct HostResponse {
    #[serde(rename = "internalsettings")]
    settings: HostSettings,
}

#[derive(Deserialize)]
struct HostSettings {
    #[serde(rename = "netaddress", default)]
    net_address: String,
    #[serde(rename = "acceptingcontracts", default)]
    accepting_contracts: bool,
}

#[derive(Deserialize)]
struct UploadReadyResponse {
    ready: bool,
}

#[derive(Deserialize)]
struct RenterFileResponse {
    file: RenterFile,
}

#[derive(Deserialize)]
struct ContractsResponse {
    #[serde(default)]
    contracts: Option<Vec<serde_json::Value>>,
}

impl HttpNodeClient {
    /// Client for the API at `addr` (`host:port`, or `:port` for loopback).
    pub fn new(addr: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::ResourceAcquisition(format!("http client: {e}")))?;
        Ok(Self {
            base_url: format!("http://{}", crate::addr::with_loopback_default(addr)),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(path: &str, res: reqwest::Response) -> Result<reqwest::Response> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let message = match res.json::<ApiError>().await {
            Ok(err) => err.message,
            Err(_) => status.to_string(),
        };
        Err(Error::remote(path, message))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let res = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| Error::remote(path, e))?;
        Self::check(path, res)
            .await?
            .json()
            .await
            .map_err(|e| Error::remote(path, e))
    }

    async fn get_empty(&self, path: &str) -> Result<()> {
        self.get_empty_with(path, &[]).await
    }

    async fn get_empty_with(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let res = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| Error::remote(path, e))?;
        Self::check(path, res).await.map(|_| ())
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<()> {
        let res = self
            .http
            .post(self.url(path))
            .form(form)
            .send()
            .await
            .map_err(|e| Error::remote(path, e))?;
        Self::check(path, res).await.map(|_| ())
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn consensus(&self) -> Result<ConsensusInfo> {
        self.get("/consensus").await
    }

    async fn gateway(&self) -> Result<GatewayInfo> {
        self.get("/gateway").await
    }

    async fn gateway_connect(&self, addr: &str) -> Result<()> {
        self.post(&format!("/gateway/connect/{addr}"), &[]).await
    }

    async fn wallet_init(&self, password: &str) -> Result<()> {
        self.post(
            "/wallet/init",
            &[("encryptionpassword", password.to_string())],
        )
        .await
    }

    async fn wallet_unlock(&self, password: &str) -> Result<()> {
        self.post(
            "/wallet/unlock",
            &[("encryptionpassword", password.to_string())],
        )
        .await
    }

    async fn wallet_address(&self) -> Result<String> {
        let res: WalletAddressResponse = self.get("/wallet/address").await?;
        Ok(res.address)
    }

    async fn wallet_balance(&self) -> Result<Currency> {
        let res: WalletResponse = self.get("/wallet").await?;
        res.confirmed_balance
            .parse()
            .map(Currency)
            .map_err(|e| Error::remote("/wallet", format!("bad balance {:?}: {e}", res.confirmed_balance)))
    }

    async fn send_coins(&self, amount: Currency, destination: &str) -> Result<()> {
        self.post(
            "/wallet/siacoins",
            &[
                ("amount", amount.base_units().to_string()),
                ("destination", destination.to_string()),
            ],
        )
        .await
    }

    async fn miner_start(&self) -> Result<()> {
        self.get_empty("/miner/start").await
    }

    async fn miner_stop(&self) -> Result<()> {
        self.get_empty("/miner/stop").await
    }

    async fn host_update(&self, net_address: &str, accepting_contracts: bool) -> Result<()> {
        self.post(
            "/host",
            &[
                ("netaddress", net_address.to_string()),
                ("acceptingcontracts", accepting_contracts.to_string()),
            ],
        )
        .await
    }

    async fn host_announce(&self) -> Result<()> {
        self.post("/host/announce", &[]).await
    }

    async fn host_info(&self) -> Result<HostInfo> {
        let res: HostResponse = self.get("/host").await?;
        Ok(HostInfo {
            net_address: res.settings.net_address,
            accepting_contracts: res.settings.accepting_contracts,
        })
    }

    async fn renter_set_allowance(
        &self,
        allowance: &Allowance,
        ip_violation_check: bool,
    ) -> Result<()> {
        self.post(
            "/renter",
            &[
                ("funds", allowance.funds.base_units().to_string()),
                ("hosts", allowance.hosts.to_string()),
                ("period", allowance.period.to_string()),
                ("renewwindow", allowance.renew_window.to_string()),
                ("checkforipviolation", ip_violation_check.to_string()),
            ],
        )
        .await
    }

    async fn renter_contract_count(&self) -> Result<usize> {
        let res: ContractsResponse = self.get("/renter/contracts").await?;
        Ok(res.contracts.map(|c| c.len()).unwrap_or(0))
    }

    async fn renter_upload_ready(&self, data_pieces: u64, parity_pieces: u64) -> Result<bool> {
        let res: UploadReadyResponse = self
            .get(&format!(
                "/renter/uploadready?datapieces={data_pieces}&paritypieces={parity_pieces}"
            ))
            .await?;
        Ok(res.ready)
    }

    async fn renter_upload(
        &self,
        sia_path: &str,
        source: &Path,
        data_pieces: u64,
        parity_pieces: u64,
    ) -> Result<()> {
        self.post(
            &format!("/renter/upload/{sia_path}"),
            &[
                ("source", source.display().to_string()),
                ("datapieces", data_pieces.to_string()),
                ("paritypieces", parity_pieces.to_string()),
            ],
        )
        .await
    }

    async fn renter_file(&self, sia_path: &str) -> Result<RenterFile> {
        let res: RenterFileResponse = self.get(&format!("/renter/file/{sia_path}")).await?;
        Ok(res.file)
    }

    async fn renter_download(&self, sia_path: &str, destination: &Path) -> Result<()> {
        self.get_empty_with(
            &format!("/renter/download/{sia_path}"),
            &[("destination", destination.display().to_string())],
        )
        .await
    }
}

/// In-memory node used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    pub(crate) struct MockState {
        pub consensus: Option<ConsensusInfo>,
        pub peers: Vec<String>,
        pub connect_calls: Vec<String>,
        /// Connects to these addresses fail.
        pub refuse: Vec<String>,
        pub gateway_fails: bool,
        pub gateway_calls: usize,
        pub wallet_address: Option<String>,
        pub wallet_initialized: bool,
        pub wallet_unlocked: bool,
        pub balance: Currency,
        pub sent: Vec<(Currency, String)>,
        pub mining: bool,
        pub miner_starts: usize,
        pub host: HostInfo,
        pub announced: bool,
        pub allowance: Option<(Allowance, bool)>,
        pub contracts: usize,
        pub upload_ready: bool,
        /// Uploaded files by sia path.
        pub files: HashMap<String, Vec<u8>>,
        /// Flip one byte of every download.
        pub corrupt_downloads: bool,
    }

    #[derive(Debug, Default)]
    pub(crate) struct MockNode {
        pub state: Mutex<MockState>,
    }

    impl MockNode {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_tip(height: u64, block: &str) -> Self {
            let node = Self::new();
            node.set_tip(height, block);
            node
        }

        pub fn set_tip(&self, height: u64, block: &str) {
            self.state.lock().consensus = Some(ConsensusInfo {
                height,
                current_block: block.to_string(),
                synced: true,
            });
        }
    }

    #[async_trait]
    impl NodeClient for MockNode {
        async fn consensus(&self) -> Result<ConsensusInfo> {
            self.state
                .lock()
                .consensus
                .clone()
                .ok_or_else(|| Error::remote("/consensus", "not ready"))
        }

        async fn gateway(&self) -> Result<GatewayInfo> {
            let mut state = self.state.lock();
            state.gateway_calls += 1;
            if state.gateway_fails {
                return Err(Error::remote("/gateway", "timeout"));
            }
            Ok(GatewayInfo {
                net_address: "127.0.0.1:9981".to_string(),
                peers: state
                    .peers
                    .iter()
                    .map(|p| GatewayPeer {
                        net_address: p.clone(),
                        inbound: false,
                    })
                    .collect(),
            })
        }

        async fn gateway_connect(&self, addr: &str) -> Result<()> {
            let mut state = self.state.lock();
            state.connect_calls.push(addr.to_string());
            if state.refuse.iter().any(|r| r == addr) {
                return Err(Error::remote("/gateway/connect", "connection refused"));
            }
            state.peers.push(addr.to_string());
            Ok(())
        }

        async fn wallet_init(&self, _password: &str) -> Result<()> {
            self.state.lock().wallet_initialized = true;
            Ok(())
        }

        async fn wallet_unlock(&self, _password: &str) -> Result<()> {
            self.state.lock().wallet_unlocked = true;
            Ok(())
        }

        async fn wallet_address(&self) -> Result<String> {
            self.state
                .lock()
                .wallet_address
                .clone()
                .ok_or_else(|| Error::remote("/wallet/address", "wallet locked"))
        }

        async fn wallet_balance(&self) -> Result<Currency> {
            Ok(self.state.lock().balance)
        }

        async fn send_coins(&self, amount: Currency, destination: &str) -> Result<()> {
            let mut state = self.state.lock();
            if state.balance < amount {
                return Err(Error::remote("/wallet/siacoins", "insufficient balance"));
            }
            state.balance = Currency(state.balance.0 - amount.0);
            state.sent.push((amount, destination.to_string()));
            Ok(())
        }

        async fn miner_start(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.mining = true;
            state.miner_starts += 1;
            Ok(())
        }

        async fn miner_stop(&self) -> Result<()> {
            self.state.lock().mining = false;
            Ok(())
        }

        async fn host_update(&self, net_address: &str, accepting_contracts: bool) -> Result<()> {
            self.state.lock().host = HostInfo {
                net_address: net_address.to_string(),
                accepting_contracts,
            };
            Ok(())
        }

        async fn host_announce(&self) -> Result<()> {
            self.state.lock().announced = true;
            Ok(())
        }

        async fn host_info(&self) -> Result<HostInfo> {
            Ok(self.state.lock().host.clone())
        }

        async fn renter_set_allowance(
            &self,
            allowance: &Allowance,
            ip_violation_check: bool,
        ) -> Result<()> {
            self.state.lock().allowance = Some((allowance.clone(), ip_violation_check));
            Ok(())
        }

        async fn renter_contract_count(&self) -> Result<usize> {
            Ok(self.state.lock().contracts)
        }

        async fn renter_upload_ready(&self, _data: u64, _parity: u64) -> Result<bool> {
            Ok(self.state.lock().upload_ready)
        }

        async fn renter_upload(
            &self,
            sia_path: &str,
            source: &Path,
            _data: u64,
            _parity: u64,
        ) -> Result<()> {
            let data = std::fs::read(source)?;
            self.state.lock().files.insert(sia_path.to_string(), data);
            Ok(())
        }

        async fn renter_file(&self, sia_path: &str) -> Result<RenterFile> {
            let state = self.state.lock();
            let data = state
                .files
                .get(sia_path)
                .ok_or_else(|| Error::remote("/renter/file", "no such file"))?;
            Ok(RenterFile {
                sia_path: sia_path.to_string(),
                file_size: data.len() as u64,
                available: true,
                upload_progress: 100.0,
            })
        }

        async fn renter_download(&self, sia_path: &str, destination: &Path) -> Result<()> {
            let data = {
                let state = self.state.lock();
                let mut data = state
                    .files
                    .get(sia_path)
                    .cloned()
                    .ok_or_else(|| Error::remote("/renter/download", "no such file"))?;
                if state.corrupt_downloads {
                    if let Some(b) = data.first_mut() {
                        *b ^= 0xff;
                    }
                }
                data
            };
            std::fs::write(destination, data)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_coins() {
        assert_eq!(Currency::coins(1).base_units(), 10u128.pow(24));
        assert!(Currency::coins(2) > Currency::coins(1));
        assert_eq!(Currency::coins(50_000).to_string(), "50000 SC");
    }

    #[test]
    fn test_consensus_json_shape() {
        let info: ConsensusInfo = serde_json::from_str(
            r#"{"synced":true,"height":42,"currentblock":"00000000abcd","target":[0,0]}"#,
        )
        .unwrap();
        assert_eq!(info.height, 42);
        assert_eq!(info.current_block, "00000000abcd");
    }

    #[test]
    fn test_gateway_has_peer() {
        let info: GatewayInfo = serde_json::from_str(
            r#"{"netaddress":"127.0.0.1:9981","peers":[{"netaddress":"127.0.0.1:9982","inbound":true}]}"#,
        )
        .unwrap();
        assert!(info.has_peer("127.0.0.1:9982"));
        assert!(!info.has_peer("127.0.0.1:9983"));
    }

    #[test]
    fn test_renter_file_json_shape() {
        let res: RenterFileResponse = serde_json::from_str(
            r#"{"file":{"siapath":"antfarm/a","filesize":4194304,"available":true,"uploadprogress":100,"redundancy":2}}"#,
        )
        .unwrap();
        assert_eq!(res.file.sia_path, "antfarm/a");
        assert_eq!(res.file.file_size, 4_194_304);
        assert!(res.file.available);
    }

    #[test]
    fn test_base_url_defaults_to_loopback() {
        let client = HttpNodeClient::new(":9980").unwrap();
        assert_eq!(client.url("/consensus"), "http://127.0.0.1:9980/consensus");
    }
}
