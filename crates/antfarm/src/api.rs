//! Farm control surface.
//!
//! # Endpoints
//!
//! - `GET /ants` - JSON array of [`AntInfo`] for every ant in the farm
//!
//! The same endpoint is what [`fetch_ants`] reads when one farm joins
//! another.

use crate::addr::with_loopback_default;
use crate::ant::{Ant, AntInfo};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;

/// Timeout for requests to another farm's control surface.
const FARM_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Control surface routes.
pub fn farm_routes(
    ants: Arc<Vec<Arc<Ant>>>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("ants")
        .and(warp::get())
        .and(with_ants(ants))
        .and_then(get_ants)
}

fn with_ants(
    ants: Arc<Vec<Arc<Ant>>>,
) -> impl Filter<Extract = (Arc<Vec<Arc<Ant>>>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || ants.clone())
}

async fn get_ants(ants: Arc<Vec<Arc<Ant>>>) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    let infos: Vec<AntInfo> = ants.iter().map(|ant| ant.info()).collect();
    Ok(warp::reply::json(&infos))
}

/// Read the ant list of the farm whose control surface is at `addr`.
pub async fn fetch_ants(addr: &str) -> Result<Vec<AntInfo>> {
    let url = format!("http://{}/ants", with_loopback_default(addr));
    let http = reqwest::Client::builder()
        .timeout(FARM_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::ResourceAcquisition(format!("http client: {e}")))?;
    let res = http
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::remote(&url, e))?;
    if !res.status().is_success() {
        return Err(Error::remote(&url, res.status()));
    }
    res.json().await.map_err(|e| Error::remote(&url, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockNode;

    #[tokio::test]
    async fn test_get_ants_lists_every_ant() {
        let ants: Vec<_> = (0..3)
            .map(|_| Ant::detached_for_test(Arc::new(MockNode::new())))
            .collect();
        let routes = farm_routes(Arc::new(ants));

        let res = warp::test::request()
            .method("GET")
            .path("/ants")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 200);
        let infos: Vec<AntInfo> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0].rpc_address, "127.0.0.1:9981");
    }

    #[tokio::test]
    async fn test_unknown_path_rejected() {
        let routes = farm_routes(Arc::new(Vec::new()));
        let res = warp::test::request()
            .method("GET")
            .path("/peers")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_fetch_ants_over_http() {
        let ants = vec![Ant::detached_for_test(Arc::new(MockNode::new()))];
        let (addr, server) =
            warp::serve(farm_routes(Arc::new(ants))).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let infos = fetch_ants(&addr.to_string()).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name.as_deref(), Some("test-ant"));
    }

    #[tokio::test]
    async fn test_fetch_ants_unreachable() {
        let port = crate::addr::PortAllocator::new().free_ports(1).unwrap()[0];
        let err = fetch_ants(&format!("127.0.0.1:{port}")).await.unwrap_err();
        assert!(matches!(err, Error::RemoteCall { .. }));
    }
}
