//! The write and test passes.
//!
//! Both passes are chunked loops over `[start, end)` of the configured
//! region, driven by the same keystream and the same device simulator:
//!
//! ```text
//!  WriteEngine                          TestEngine
//!  ───────────                          ──────────
//!  keystream.fill(chunk)                expected ← simulator segments
//!  fuzz(chunk)                                     + keystream
//!  zero if simulated                    actual   ← channel.read
//!  channel.write(chunk)                 diff → MismatchSink
//! ```
//!
//! Each pass checks its [`CancelToken`](crate::CancelToken) before every
//! chunk.  A cancelled or failed pass reports the position of the first
//! chunk it did not finish, so resuming there redoes at most one chunk.

mod sink;
mod verify;
mod write;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use sink::{LogSink, Mismatch, MismatchSink, SuppressedChunk};
pub use verify::{SuppressionPolicy, TestEngine, TestStats};
pub use write::{WriteEngine, WriteStats};

/// Lifecycle of a single pass.
///
/// ```text
/// Idle ──→ Running ──┬──→ Completed
///                    ├──→ Interrupted   (cancelled between chunks)
///                    └──→ Failed        (channel error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    #[default]
    Idle,
    Running,
    Completed,
    Interrupted,
    Failed,
}

/// Which pass a resume point refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Write,
    Test,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Write => f.write_str("write"),
            Stage::Test => f.write_str("test"),
        }
    }
}

/// How a pass that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome<S> {
    Completed(S),
    /// Cancelled; everything before `position` is done.
    Interrupted { position: u64, stats: S },
}

impl<S> PassOutcome<S> {
    pub fn stats(&self) -> &S {
        match self {
            PassOutcome::Completed(stats) | PassOutcome::Interrupted { stats, .. } => stats,
        }
    }

    pub fn into_stats(self) -> S {
        match self {
            PassOutcome::Completed(stats) | PassOutcome::Interrupted { stats, .. } => stats,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed(_))
    }
}

fn settle<S, E>(result: &Result<PassOutcome<S>, E>) -> PassState {
    match result {
        Ok(PassOutcome::Completed(_)) => PassState::Completed,
        Ok(PassOutcome::Interrupted { .. }) => PassState::Interrupted,
        Err(_) => PassState::Failed,
    }
}
