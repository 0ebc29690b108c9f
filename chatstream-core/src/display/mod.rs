//! Presentation side of a streamed reply.
//!
//! - `scheduler` - deterministic typewriter state machine
//! - `task` - tokio driver publishing the revealed prefix on a watch channel
//! - `batch` - coalescing of small deltas before they reach the conversation

mod batch;
mod scheduler;
mod task;

pub use batch::{BatchPolicy, DeltaBatcher};
pub use scheduler::{AfterComplete, RevealConfig, RevealScheduler, RevealState, TickOutcome};
pub use task::{RevealTask, RevealView};
