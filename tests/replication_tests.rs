//! Scalar-clock replication tests.


use std::time::Duration;

use blackboard_lite::board::{Snapshot, WriteOp};
use blackboard_lite::config::ReplicationMode;
use blackboard_lite::rpc::{BoardWrite, PeerRequest, PeerResponse, RequestHandler};
use test_harness::TestCluster;

fn snapshot(pairs: &[(&str, &str)]) -> Snapshot {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_clocked_write_reaches_every_node() {
    let cluster = TestCluster::with_mode(&[1, 2, 3], ReplicationMode::ScalarClock).await;

    let receipt = cluster.node(1).write(WriteOp::add("first")).await.unwrap();
    assert_eq!(receipt.clock, Some(1));
    assert_eq!(receipt.replicated_to, 2);

    for node in cluster.nodes.values() {
        assert_eq!(node.board.get(&receipt.key).await.as_deref(), Some("first"));
        assert_eq!(node.replication.clock().await, 1);
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_writes_from_different_nodes_accumulate() {
    let cluster = TestCluster::with_mode(&[1, 2, 3], ReplicationMode::ScalarClock).await;

    let a = cluster.node(1).write(WriteOp::add("a")).await.unwrap();
    let b = cluster.node(2).write(WriteOp::add("b")).await.unwrap();
    let c = cluster.node(3).write(WriteOp::add("c")).await.unwrap();
    assert_eq!((a.clock, b.clock, c.clock), (Some(1), Some(2), Some(3)));

    let reference = cluster.node(1).board.snapshot().await;
    assert_eq!(reference.len(), 3);
    for node in cluster.nodes.values() {
        assert_eq!(node.board.snapshot().await, reference);
    }

    cluster.shutdown().await;
}

/// Delivery order does not matter: the higher clock wins on every node.
#[tokio::test]
async fn test_higher_clock_wins_regardless_of_delivery_order() {
    let cluster = TestCluster::build(&[1, 2], |config| {
        config.replication.mode = ReplicationMode::ScalarClock;
    })
    .await;
    let w1 = snapshot(&[("shared", "W1")]);
    let w2 = snapshot(&[("shared", "W2")]);

    let first = cluster.node(1);
    first
        .handle(PeerRequest::BoardWrite(BoardWrite::Clocked { clock: 5, snapshot: w1.clone() }))
        .await
        .unwrap();
    first
        .handle(PeerRequest::BoardWrite(BoardWrite::Clocked { clock: 7, snapshot: w2.clone() }))
        .await
        .unwrap();

    let second = cluster.node(2);
    second
        .handle(PeerRequest::BoardWrite(BoardWrite::Clocked { clock: 7, snapshot: w2 }))
        .await
        .unwrap();
    let stale = second
        .handle(PeerRequest::BoardWrite(BoardWrite::Clocked { clock: 5, snapshot: w1 }))
        .await
        .unwrap();
    assert_eq!(stale, PeerResponse::ClockedUpdate { applied: false });

    assert_eq!(first.board.get("shared").await.as_deref(), Some("W2"));
    assert_eq!(second.board.get("shared").await.as_deref(), Some("W2"));

    cluster.shutdown().await;
}

/// Equal clocks: whichever arrives first is kept, the board holds one of them.
#[tokio::test]
async fn test_equal_clocks_keep_one_write() {
    let cluster = TestCluster::build(&[1], |config| {
        config.replication.mode = ReplicationMode::ScalarClock;
    })
    .await;
    let node = cluster.node(1);

    let a = node.replication.receive_clocked(3, snapshot(&[("k", "A")]));
    let b = node.replication.receive_clocked(3, snapshot(&[("k", "B")]));
    let (applied_a, applied_b) = tokio::join!(a, b);

    assert!(applied_a ^ applied_b, "Exactly one install should win");
    let value = node.board.get("k").await;
    assert!(matches!(value.as_deref(), Some("A") | Some("B")));

    cluster.shutdown().await;
}

/// A partitioned node keeps its own state and catches up on the next newer write.
#[tokio::test]
async fn test_partitioned_node_catches_up_on_next_write() {
    let cluster = TestCluster::with_mode(&[1, 2, 3], ReplicationMode::ScalarClock).await;
    cluster.network.isolate(3).await;

    let missed = cluster.node(1).write(WriteOp::add("missed")).await.unwrap();
    assert_eq!(missed.replicated_to, 1);
    assert!(cluster.node(3).board.is_empty().await);

    cluster.network.heal(3).await;
    let next = cluster.node(2).write(WriteOp::add("next")).await.unwrap();
    assert_eq!(next.clock, Some(2));

    let board = cluster.node(3).board.snapshot().await;
    assert_eq!(board.get(&missed.key), Some("missed"));
    assert_eq!(board.get(&next.key), Some("next"));
    assert!(tokio::time::timeout(Duration::from_secs(1), cluster.shutdown())
        .await
        .is_ok());
}
