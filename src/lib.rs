pub mod board;
pub mod config;
pub mod election;
pub mod error;
pub mod ledger;
pub mod node;
pub mod replication;
pub mod rpc;
pub mod shutdown;
pub mod tasks;
pub mod transport;
