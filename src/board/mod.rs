pub mod entry;
pub mod store;

pub use entry::{BoardEntry, BoardVersion, Snapshot, WriteOp};
pub use store::{Blackboard, SnapshotInstall};
