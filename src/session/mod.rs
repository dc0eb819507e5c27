//! Session orchestration
//!
//! One [`SessionOrchestrator`] owns capture, the peer connection and the
//! applied configuration. [`spawn_session`] runs it as a single task fed by
//! signaling events and [`SessionHandle`] commands; [`BatchController`]
//! stages operator edits on top of a handle.

pub mod batch;
pub mod orchestrator;
pub mod orientation;
pub mod runner;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{
    AlwaysGranted, BatchController, CommitOutcome, CommitStep, PendingEdit, PermissionGate, SessionControl,
};
pub use orchestrator::{SessionDeps, SessionOrchestrator, SessionSettings};
pub use orientation::OrientationTracker;
pub use runner::{spawn_session, SessionCommand, SessionHandle};
pub use state::{clamp_bitrate, AppliedState, SessionPhase, SessionSnapshot};
