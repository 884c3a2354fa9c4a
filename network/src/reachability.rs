//! Live TCP reachability probes for join candidates.

use shoal_types::NodeInfo;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::{NetworkError, PeerAddr, Transport};

/// Default time allowed for one connect attempt.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Open (and immediately drop) a TCP connection to `ip:port`.
pub async fn probe(ip: &str, port: u16, timeout: Duration) -> Result<(), NetworkError> {
    let addr = format!("{ip}:{port}");
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(NetworkError::Unreachable {
            addr,
            reason: e.to_string(),
        }),
        Err(_) => Err(NetworkError::Unreachable {
            addr,
            reason: "connect timed out".into(),
        }),
    }
}

/// Probe both ports a candidate claims through `transport`. The external
/// port is checked first.
pub async fn probe_node(transport: &dyn Transport, info: &NodeInfo) -> Result<(), NetworkError> {
    for addr in [
        PeerAddr::new(info.external_ip.clone(), info.external_port),
        PeerAddr::new(info.internal_ip.clone(), info.internal_port),
    ] {
        transport.probe(&addr).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        probe("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = probe("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn node_probe_checks_both_ports() {
        let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = open.local_addr().unwrap().port();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let info = |external_port, internal_port| NodeInfo {
            public_key: shoal_types::PublicKey([1; 32]),
            curve_public_key: shoal_types::CurvePublicKey([1; 32]),
            external_ip: "127.0.0.1".into(),
            external_port,
            internal_ip: "127.0.0.1".into(),
            internal_port,
        };
        let transport = crate::HttpTransport::new(Duration::from_secs(1)).unwrap();
        probe_node(&transport, &info(open_port, open_port)).await.unwrap();

        let err = probe_node(&transport, &info(open_port, closed_port))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, NetworkError::Unreachable { addr, .. } if addr.ends_with(&format!(":{closed_port}")))
        );
    }
}
