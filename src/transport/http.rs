use std::time::Duration;

use async_trait::async_trait;

use crate::config::PeerId;
use crate::error::{BoardError, Result};
use crate::rpc::{PeerRequest, PeerResponse};
use crate::transport::PeerTransport;

/// JSON-over-HTTP transport. Each request is a POST to
/// `http://{peer.addr}/{request.path()}` with a per-request timeout.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send(&self, peer: &PeerId, request: PeerRequest) -> Result<PeerResponse> {
        let url = format!("http://{}/{}", peer.addr, request.path());
        let body = request.body()?;

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BoardError::Transport {
                peer: peer.id,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BoardError::Remote {
                peer: peer.id,
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<PeerResponse>()
            .await
            .map_err(|e| BoardError::Transport {
                peer: peer.id,
                reason: format!("malformed response: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_peer_is_a_transport_error() {
        let transport = HttpTransport::new(Duration::from_millis(200)).unwrap();
        // Port 9 (discard) on loopback is essentially never listening.
        let peer = PeerId::new(4, "127.0.0.1:9");
        let err = transport
            .send(
                &peer,
                PeerRequest::ElectionAnswer(crate::rpc::ElectionAnswer { from_id: 1 }),
            )
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(err.is_retryable());
    }
}
