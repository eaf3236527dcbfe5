//! Port and address allocation for ants.
//!
//! Free ports come from binding `127.0.0.1:0` and reading back what the OS
//! picked. The listener is released before the node binds the port, so the
//! allocator also remembers every port it has issued and never hands the
//! same one out twice.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::time::Duration;
use tracing::debug;

/// Attempts per requested port before giving up on finding a fresh one.
const MAX_PORT_ATTEMPTS: usize = 64;

/// Hands out free local TCP ports, never the same one twice.
#[derive(Debug, Default)]
pub struct PortAllocator {
    issued: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `n` distinct free ports.
    pub fn free_ports(&self, n: usize) -> Result<Vec<u16>> {
        let mut issued = self.issued.lock();
        // Keep every listener open until all n ports are chosen so the OS
        // cannot give us the same port twice within one call.
        let mut held = Vec::with_capacity(n);
        let mut ports = Vec::with_capacity(n);

        for _ in 0..n {
            let mut found = None;
            for _ in 0..MAX_PORT_ATTEMPTS {
                let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(|e| {
                    Error::ResourceAcquisition(format!("failed to bind a free port: {e}"))
                })?;
                let port = listener.local_addr()?.port();
                held.push(listener);
                if !issued.contains(&port) {
                    found = Some(port);
                    break;
                }
            }
            let port = found.ok_or_else(|| {
                Error::ResourceAcquisition("no unused free port available".to_string())
            })?;
            issued.insert(port);
            ports.push(port);
        }

        debug!(?ports, "allocated free ports");
        Ok(ports)
    }

    /// Mark a caller-supplied port as taken.
    pub fn reserve(&self, port: u16) {
        self.issued.lock().insert(port);
    }
}

/// Join an IP and a port into a `host:port` string.
pub fn compose_addr(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

/// Fill in a loopback host for addresses like `:9981`.
pub fn with_loopback_default(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("{}{}", Ipv4Addr::LOCALHOST, addr)
    } else {
        addr.to_string()
    }
}

/// Port component of a `host:port` address, if it has one.
pub fn port_of(addr: &str) -> Option<u16> {
    addr.rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
}

/// Looks up the IP the rest of the internet sees us as.
#[async_trait]
pub trait ExternalIpResolver: Send + Sync {
    async fn external_ip(&self) -> Result<IpAddr>;
}

/// Resolves the external IP by fetching a plain-text IP from a web service.
#[derive(Debug, Clone)]
pub struct HttpIpResolver {
    url: String,
    client: reqwest::Client,
}

impl HttpIpResolver {
    /// Resolver that asks the service at `url`.
    ///
    /// # Errors
    ///
    /// `ResourceAcquisition` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::ResourceAcquisition(format!("http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ExternalIpResolver for HttpIpResolver {
    async fn external_ip(&self) -> Result<IpAddr> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| Error::ResourceAcquisition(format!("external IP lookup failed: {e}")))?
            .text()
            .await
            .map_err(|e| Error::ResourceAcquisition(format!("external IP lookup failed: {e}")))?;

        body.trim().parse().map_err(|_| {
            Error::ResourceAcquisition(format!(
                "external IP service returned {:?}",
                body.trim()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_ports_are_distinct_across_calls() {
        let allocator = PortAllocator::new();
        let mut all = allocator.free_ports(5).unwrap();
        all.extend(allocator.free_ports(5).unwrap());

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 10);
        assert!(all.iter().all(|p| *p != 0));
    }

    #[test]
    fn test_compose_addr() {
        assert_eq!(
            compose_addr(IpAddr::V4(Ipv4Addr::LOCALHOST), 9980),
            "127.0.0.1:9980"
        );
        assert_eq!(
            compose_addr("::1".parse().unwrap(), 9981),
            "[::1]:9981"
        );
    }

    #[test]
    fn test_loopback_default() {
        assert_eq!(with_loopback_default(":9981"), "127.0.0.1:9981");
        assert_eq!(with_loopback_default("10.0.0.2:9981"), "10.0.0.2:9981");
    }

    async fn serve_text(body: &'static str) -> String {
        use warp::Filter;

        let route = warp::path!("ip").map(move || body);
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        format!("http://{addr}/ip")
    }

    #[tokio::test]
    async fn test_http_ip_resolver() {
        let resolver = HttpIpResolver::new(serve_text("203.0.113.9\n").await).unwrap();
        assert_eq!(
            resolver.external_ip().await.unwrap(),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );

        let resolver = HttpIpResolver::new(serve_text("<html>busy</html>").await).unwrap();
        let err = resolver.external_ip().await.unwrap_err();
        assert!(matches!(err, Error::ResourceAcquisition(_)));
    }

    #[test]
    fn test_port_of() {
        assert_eq!(port_of("127.0.0.1:9980"), Some(9980));
        assert_eq!(port_of(":9981"), Some(9981));
        assert_eq!(port_of("[::1]:9982"), Some(9982));
        assert_eq!(port_of("localhost"), None);
    }
}
