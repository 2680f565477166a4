pub mod messages;
pub mod server;

pub use messages::{
    BoardWrite, CoordinatorAnnouncement, ElectionAnswer, ElectionProposal, LeaderSnapshot,
    PeerRequest, PeerResponse, PubkeyAnnouncement, SignRequestDecision, WriteReceipt,
};

use async_trait::async_trait;

use crate::error::Result;

/// Anything that can serve the peer RPC surface. Implemented by the node and
/// invoked by both the HTTP server and the in-memory transport.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: PeerRequest) -> Result<PeerResponse>;
}
