//! JSON-over-HTTP transport backed by `reqwest`.

use async_trait::async_trait;
use serde_json::Value;
use shoal_messages::{routes, GossipEnvelope};
use std::time::Duration;

use crate::transport::{PeerAddr, Transport};
use crate::NetworkError;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client })
    }

    fn url(to: &PeerAddr, path: &str) -> String {
        format!("http://{}:{}{}", to.ip, to.port, path)
    }

    async fn read_body(url: String, resp: reqwest::Response) -> Result<Value, NetworkError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(NetworkError::Http {
                url,
                status: status.as_u16(),
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{url}: {e}")))
    }
}

fn map_send_error(url: &str, e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout(url.to_string())
    } else {
        NetworkError::ConnectionFailed(format!("{url}: {e}"))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_gossip(
        &self,
        to: &PeerAddr,
        envelope: &GossipEnvelope,
    ) -> Result<(), NetworkError> {
        let url = Self::url(to, routes::HTTP_GOSSIP);
        let resp = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| map_send_error(&url, e))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(NetworkError::Http {
                url,
                status: resp.status().as_u16(),
            })
        }
    }

    async fn get_json(&self, to: &PeerAddr, path: &str) -> Result<Value, NetworkError> {
        let url = Self::url(to, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_send_error(&url, e))?;
        Self::read_body(url, resp).await
    }

    async fn post_json(
        &self,
        to: &PeerAddr,
        path: &str,
        body: &Value,
    ) -> Result<Value, NetworkError> {
        let url = Self::url(to, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(&url, e))?;
        Self::read_body(url, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_addr_and_path() {
        let to = PeerAddr::new("10.1.2.3", 9001);
        assert_eq!(
            HttpTransport::url(&to, routes::HTTP_CYCLE_MARKER),
            "http://10.1.2.3:9001/cyclemarker"
        );
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let t = HttpTransport::new(Duration::from_millis(500)).unwrap();
        // Port 1 on loopback is not listening in test environments.
        let err = t
            .get_json(&PeerAddr::new("127.0.0.1", 1), "/cyclemarker")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::ConnectionFailed(_) | NetworkError::Timeout(_)
        ));
    }
}
