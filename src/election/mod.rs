pub mod coordinator;
pub mod state;

pub use coordinator::{ElectionCoordinator, ElectionStatus};
pub use state::{ElectionRole, ElectionState, Eligibility, ROUND_BASELINE};
