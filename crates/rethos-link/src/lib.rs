//! Stop-and-wait link engine and statistics for the rethos serial bridge.
//!
//! The state machines in this crate are deliberately decoupled from I/O:
//! they track protocol state and produce decisions — frames to transmit,
//! timers to arm or cancel, payloads to deliver — that the caller acts on.

pub mod link;
pub mod stats;

pub use link::{ControlDisposition, DataDisposition, DataOutcome, LinkState};
pub use stats::{ChannelStats, GlobalStats, Stats, SNAPSHOT_LEN};
