//! HTTP surface tests: routes driven in-process through the router, plus a
//! two-node cluster talking over loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use blackboard_lite::board::WriteOp;
use blackboard_lite::config::NodeConfig;
use blackboard_lite::error::BoardError;
use blackboard_lite::node::Node;
use blackboard_lite::rpc::server::router;
use blackboard_lite::transport::{HttpTransport, MemoryNetwork};

fn single_node() -> Arc<Node> {
    let network = MemoryNetwork::new();
    let mut config = NodeConfig::default()
        .with_priority(1)
        .with_peer(2, "127.0.0.1:8002");
    config.election.answer_window_ms = 20;
    Arc::new(Node::new(
        config,
        Arc::new(network.transport(1)),
        CancellationToken::new(),
    ))
}

async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_empty_board_lists_nothing() {
    let node = single_node();
    let (status, body) = call(router(node), "GET", "/board", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_add_modify_delete_through_routes() {
    let node = single_node();

    let (status, receipt) = call(
        router(node.clone()),
        "POST",
        "/board/entries",
        Some(json!({ "entry": "first" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["leader"], 1);
    let key = receipt["key"].as_str().unwrap().to_string();

    let (status, _) = call(
        router(node.clone()),
        "POST",
        &format!("/board/entries/{}", key),
        Some(json!({ "entry": "second" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, board) = call(router(node.clone()), "GET", "/board", None).await;
    assert_eq!(board, json!([{ "key": key, "value": "second" }]));

    let (status, _) = call(
        router(node.clone()),
        "POST",
        &format!("/board/entries/{}", key),
        Some(json!({ "delete": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(node.board.is_empty().await);
}

#[tokio::test]
async fn test_modify_of_missing_entry_is_not_found() {
    let node = single_node();
    node.election.start_election().await;
    node.election.wait_for_leader(Duration::from_secs(1)).await;

    let (status, body) = call(
        router(node),
        "POST",
        "/board/entries/nothing-here",
        Some(json!({ "entry": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nothing-here"));
}

#[tokio::test]
async fn test_modify_without_value_is_bad_request() {
    let node = single_node();
    let (status, _) = call(router(node), "POST", "/board/entries/k", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_snapshot_push_replaces_board() {
    let node = single_node();
    node.board.insert("old", "gone").await;

    let (status, body) = call(
        router(node.clone()),
        "POST",
        "/board/snapshot",
        Some(json!({
            "from_id": 2,
            "priority": 5,
            "version": { "term": 1, "leader": 2, "seq": 1 },
            "snapshot": { "entries": { "k": "v" } }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ack");

    let (_, board) = call(router(node.clone()), "GET", "/board", None).await;
    assert_eq!(board, json!([{ "key": "k", "value": "v" }]));
    assert_eq!(node.election.current_leader().await, Some(2));
}

#[tokio::test]
async fn test_older_snapshot_push_gets_newer_board_back() {
    let node = single_node();
    let newer = json!({
        "from_id": 2,
        "priority": 5,
        "version": { "term": 2, "leader": 2, "seq": 4 },
        "snapshot": { "entries": { "acked": "yes" } }
    });
    let (status, _) = call(router(node.clone()), "POST", "/board/snapshot", Some(newer)).await;
    assert_eq!(status, StatusCode::OK);

    let older = json!({
        "from_id": 2,
        "priority": 5,
        "version": { "term": 1, "leader": 2, "seq": 9 },
        "snapshot": { "entries": {} }
    });
    let (status, body) = call(router(node.clone()), "POST", "/board/snapshot", Some(older)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "snapshot_kept");
    assert_eq!(body["version"]["term"], 2);
    assert_eq!(body["snapshot"]["entries"]["acked"], "yes");
    assert_eq!(node.board.get("acked").await.as_deref(), Some("yes"));
}

#[tokio::test]
async fn test_snapshot_from_unknown_node_is_bad_request() {
    let node = single_node();
    let (status, _) = call(
        router(node),
        "POST",
        "/board/snapshot",
        Some(json!({
            "from_id": 9,
            "priority": 0,
            "version": { "term": 1, "leader": 9, "seq": 1 },
            "snapshot": { "entries": {} }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_forward_to_follower_is_conflict() {
    let node = single_node();
    let (status, body) = call(
        router(node),
        "POST",
        "/board/write",
        Some(json!({ "mode": "forward", "op": { "kind": "add", "key": "k", "value": "v" } })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_status_route_reports_node() {
    let node = single_node();
    let (status, body) = call(router(node.clone()), "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node_id"], 1);
    assert_eq!(body["mode"], "leader_mediated");
    assert_eq!(body["election"]["priority"], 1);
    assert_eq!(body["public_key"], node.public_key().to_hex());
}

#[tokio::test]
async fn test_unknown_sign_request_is_not_found() {
    let node = single_node();
    let (status, _) = call(
        router(node),
        "POST",
        &format!("/signrequest/approve/{}", uuid::Uuid::new_v4()),
        Some(json!({ "accept": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Two real nodes over loopback: election, forwarded write, snapshot fan-out,
/// and a remote rejection surfacing with its status code.
#[tokio::test]
async fn test_two_nodes_over_http() {
    let addrs = [free_addr(), free_addr()];
    let shutdown = CancellationToken::new();
    let mut nodes = Vec::new();
    let mut handles = Vec::new();

    for (i, addr) in addrs.iter().enumerate() {
        let node_id = i as u64 + 1;
        let other = addrs[1 - i];
        let mut config = NodeConfig::new(node_id, *addr)
            .with_peer(3 - node_id, other.to_string())
            .with_priority(node_id as u32);
        config.election.answer_window_ms = 200;
        config.election.startup_delay_ms = 100;

        let transport = HttpTransport::new(Duration::from_millis(500)).unwrap();
        let node = Arc::new(Node::new(config, Arc::new(transport), shutdown.child_token()));
        handles.push(tokio::spawn(node.clone().run()));
        nodes.push(node);
    }

    let mut leaders = Vec::new();
    for node in &nodes {
        leaders.push(node.election.wait_for_leader(Duration::from_secs(5)).await);
    }
    assert_eq!(leaders, vec![Some(1), Some(1)]);

    let receipt = nodes[1].write(WriteOp::add("over http")).await.unwrap();
    assert_eq!(receipt.leader, Some(1));
    assert_eq!(receipt.replicated_to, 1);
    for node in &nodes {
        assert_eq!(node.board.get(&receipt.key).await.as_deref(), Some("over http"));
    }

    let err = nodes[1]
        .write(WriteOp::modify("missing", "x"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, BoardError::Remote { peer: 1, status: 404, .. }),
        "unexpected error: {err}"
    );

    // A client sees the same status whichever node it talks to.
    for node in &nodes {
        let (status, body) = call(
            router(node.clone()),
            "POST",
            "/board/entries/missing",
            Some(json!({ "entry": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "through node {}", node.id());
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    shutdown.cancel();
    for handle in handles {
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("node should stop after shutdown")
            .unwrap();
        assert!(result.is_ok());
    }
}
