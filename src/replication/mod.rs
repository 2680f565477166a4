//! Getting client writes onto every board, either through the elected
//! leader or by scalar-clock stamped broadcast.

pub mod clock;
pub mod manager;
pub mod retry;

pub use clock::LogicalClock;
pub use manager::ReplicationManager;
pub use retry::RetryPolicy;
