use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::board::WriteOp;
use crate::error::{BoardError, Result};
use crate::ledger::{Block, SignRequestMessage, Transaction};
use crate::node::Node;
use crate::rpc::messages::{
    BoardWrite, CoordinatorAnnouncement, ElectionAnswer, ElectionProposal, LeaderSnapshot,
    PeerRequest, PeerResponse, PubkeyAnnouncement, SignRequestDecision,
};
use crate::rpc::RequestHandler;

/// HTTP form of a [`BoardError`]: a status code and `{"error": "..."}`.
pub struct ApiError(pub BoardError);

impl From<BoardError> for ApiError {
    fn from(e: BoardError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(error: &BoardError) -> StatusCode {
    match error {
        BoardError::NotLeader(_) | BoardError::Superseded { .. } => StatusCode::CONFLICT,
        BoardError::EntryNotFound(_) | BoardError::SignRequestNotFound(_) => StatusCode::NOT_FOUND,
        BoardError::InvalidTransaction(_)
        | BoardError::InvalidBlock(_)
        | BoardError::UnknownSigner(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BoardError::UnknownPeer(_) | BoardError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        BoardError::NoLeaderAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        // A leader's rejection of a forwarded write reaches the client as is.
        BoardError::Remote { status, .. } if (400..500).contains(status) => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        BoardError::Transport { .. } | BoardError::Http(_) | BoardError::Remote { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct AddEntryRequest {
    pub entry: String,
}

/// Body of `POST /board/entries/:key`: replace the value, or delete the entry
/// when `delete` is set.
#[derive(Debug, Deserialize)]
pub struct ModifyEntryRequest {
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, Deserialize)]
pub struct CosignRequest {
    pub counterpart: u64,
    pub payload: String,
}

#[derive(Debug, Serialize)]
struct CosignResponse {
    request_id: Uuid,
}

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        // peer surface
        .route("/election/propose", post(election_propose))
        .route("/election/answer", post(election_answer))
        .route("/election/coordinator", post(election_coordinator))
        .route("/pubkey/announce", post(pubkey_announce))
        .route("/block/submit", post(block_submit))
        .route("/transaction/submit", post(transaction_submit))
        .route("/signrequest/submit", post(signrequest_submit))
        .route("/signrequest/approve/:id", post(signrequest_approve))
        .route("/board/write", post(board_write))
        .route("/board/snapshot", post(board_snapshot))
        // client surface
        .route("/board", get(list_board))
        .route("/board/entries", post(add_entry))
        .route("/board/entries/:key", post(modify_entry))
        .route("/status", get(status))
        .route("/cosign", post(cosign))
        .route("/signrequests", get(list_sign_requests))
        .with_state(node)
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(node: Arc<Node>, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BoardError::Internal(format!("failed to bind {}: {}", addr, e)))?;
    tracing::info!(node_id = node.id(), addr = %addr, "RPC server listening");

    axum::serve(listener, router(node))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| BoardError::Internal(format!("RPC server failed: {}", e)))
}

async fn dispatch(node: &Node, request: PeerRequest) -> ApiResult<PeerResponse> {
    Ok(Json(node.handle(request).await?))
}

async fn election_propose(
    State(node): State<Arc<Node>>,
    Json(proposal): Json<ElectionProposal>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::ElectionPropose(proposal)).await
}

async fn election_answer(
    State(node): State<Arc<Node>>,
    Json(answer): Json<ElectionAnswer>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::ElectionAnswer(answer)).await
}

async fn election_coordinator(
    State(node): State<Arc<Node>>,
    Json(announcement): Json<CoordinatorAnnouncement>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::ElectionCoordinator(announcement)).await
}

async fn pubkey_announce(
    State(node): State<Arc<Node>>,
    Json(announcement): Json<PubkeyAnnouncement>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::PubkeyAnnounce(announcement)).await
}

async fn block_submit(
    State(node): State<Arc<Node>>,
    Json(block): Json<Block>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::BlockSubmit(block)).await
}

async fn transaction_submit(
    State(node): State<Arc<Node>>,
    Json(tx): Json<Transaction>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::TransactionSubmit(tx)).await
}

async fn signrequest_submit(
    State(node): State<Arc<Node>>,
    Json(message): Json<SignRequestMessage>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::SignRequestSubmit(message)).await
}

async fn signrequest_approve(
    State(node): State<Arc<Node>>,
    Path(id): Path<Uuid>,
    Json(decision): Json<SignRequestDecision>,
) -> ApiResult<PeerResponse> {
    dispatch(
        &node,
        PeerRequest::SignRequestApprove {
            id,
            accept: decision.accept,
        },
    )
    .await
}

async fn board_write(
    State(node): State<Arc<Node>>,
    Json(write): Json<BoardWrite>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::BoardWrite(write)).await
}

async fn board_snapshot(
    State(node): State<Arc<Node>>,
    Json(push): Json<LeaderSnapshot>,
) -> ApiResult<PeerResponse> {
    dispatch(&node, PeerRequest::BoardSnapshot(push)).await
}

async fn list_board(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.entries().await)
}

async fn add_entry(
    State(node): State<Arc<Node>>,
    Json(request): Json<AddEntryRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let receipt = node.write(WriteOp::add(request.entry)).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn modify_entry(
    State(node): State<Arc<Node>>,
    Path(key): Path<String>,
    Json(request): Json<ModifyEntryRequest>,
) -> ApiResult<crate::rpc::WriteReceipt> {
    let op = if request.delete {
        WriteOp::delete(key)
    } else {
        let value = request.entry.ok_or_else(|| {
            BoardError::InvalidRequest("modify requires an entry value".to_string())
        })?;
        WriteOp::modify(key, value)
    };
    Ok(Json(node.write(op).await?))
}

async fn status(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.status().await)
}

async fn cosign(
    State(node): State<Arc<Node>>,
    Json(request): Json<CosignRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let request_id = node
        .propose_cosigned(request.counterpart, request.payload)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(CosignResponse { request_id })))
}

async fn list_sign_requests(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.sign_requests().await)
}
