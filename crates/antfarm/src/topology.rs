//! Gateway topology: point every ant at one bootstrap ant.
//!
//! Connecting each ant to `ants[0]` is enough; peer discovery fills in the
//! rest of the mesh.

use crate::addr::with_loopback_default;
use crate::ant::Ant;
use crate::client::NodeClient;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Connect `ants[1..]` to the gateway of `ants[0]`.
///
/// # Errors
///
/// `Topology` if fewer than two ants are given (nothing is attempted) or if
/// any connect fails; the remaining ants are not tried.
pub async fn connect_ants(ants: &[Arc<Ant>]) -> Result<()> {
    let [bootstrap, rest @ ..] = ants else {
        return Err(Error::Topology("no ants to connect".to_string()));
    };
    if rest.is_empty() {
        return Err(Error::Topology(
            "at least two ants are needed to form a topology".to_string(),
        ));
    }
    let peers: Vec<&str> = rest.iter().map(|ant| ant.rpc_addr()).collect();
    connect_peers(bootstrap.client().as_ref(), &peers).await?;
    info!(bootstrap = %bootstrap.label(), peers = rest.len(), "connected ants");
    Ok(())
}

/// Ask `bootstrap` to connect to each of `peer_addrs` in turn. Addresses
/// without a host part are taken to be loopback.
pub async fn connect_peers(bootstrap: &dyn NodeClient, peer_addrs: &[&str]) -> Result<()> {
    for addr in peer_addrs {
        let addr = with_loopback_default(addr);
        debug!(peer = %addr, "connecting gateway");
        bootstrap
            .gateway_connect(&addr)
            .await
            .map_err(|e| Error::Topology(format!("could not connect to {addr}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockNode;
    use crate::config::ResolvedAntConfig;
    use crate::jobs::tests::test_config;

    fn ant_with_rpc(node: Arc<MockNode>, rpc: &str) -> Arc<Ant> {
        let mut config: ResolvedAntConfig = (*test_config()).clone();
        config.addrs.rpc = rpc.to_string();
        Arc::new(Ant::attach(config, node, None))
    }

    #[tokio::test]
    async fn test_connect_reaches_every_peer() {
        let bootstrap = Arc::new(MockNode::new());
        let mut ants = vec![ant_with_rpc(bootstrap.clone(), "127.0.0.1:9000")];
        for i in 1..5 {
            ants.push(ant_with_rpc(
                Arc::new(MockNode::new()),
                &format!("127.0.0.1:{}", 9000 + i),
            ));
        }

        connect_ants(&ants).await.unwrap();
        let info = bootstrap.gateway().await.unwrap();
        for ant in &ants[1..] {
            assert!(info.has_peer(ant.rpc_addr()));
        }
    }

    #[tokio::test]
    async fn test_connect_needs_two_ants() {
        let node = Arc::new(MockNode::new());
        let single = vec![ant_with_rpc(node.clone(), "127.0.0.1:9000")];

        let err = connect_ants(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
        let err = connect_ants(&single).await.unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
        assert!(node.state.lock().connect_calls.is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let bootstrap = Arc::new(MockNode::new());
        bootstrap.state.lock().refuse = vec!["127.0.0.1:9002".to_string()];
        let ants = vec![
            ant_with_rpc(bootstrap.clone(), "127.0.0.1:9000"),
            ant_with_rpc(Arc::new(MockNode::new()), "127.0.0.1:9001"),
            ant_with_rpc(Arc::new(MockNode::new()), "127.0.0.1:9002"),
            ant_with_rpc(Arc::new(MockNode::new()), "127.0.0.1:9003"),
        ];

        let err = connect_ants(&ants).await.unwrap_err();
        assert!(matches!(err, Error::Topology(ref msg) if msg.contains("9002")));
        assert_eq!(
            bootstrap.state.lock().connect_calls,
            vec!["127.0.0.1:9001", "127.0.0.1:9002"]
        );
    }

    #[tokio::test]
    async fn test_bare_port_defaults_to_loopback() {
        let bootstrap = MockNode::new();
        connect_peers(&bootstrap, &[":9981"]).await.unwrap();
        assert_eq!(bootstrap.state.lock().connect_calls, vec!["127.0.0.1:9981"]);
    }
}
