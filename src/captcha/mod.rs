//! Challenge handling: presence monitoring, the attempt state machine,
//! and debug artifacts.

pub mod debug;
pub mod monitor;
pub mod state;

pub use debug::DebugStore;
pub use monitor::ChallengeMonitor;
pub use state::{ChallengeOutcome, ChallengeSolver, ChallengeState};
