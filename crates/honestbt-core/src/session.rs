//! Sequencing of the write and test passes.
//!
//! A session runs the write pass (unless resuming straight into the test
//! pass), then the test pass (unless skipped).  When a pass stops early
//! the session captures a [`ResumeToken`] at the first unfinished chunk:
//!
//! ```text
//! fresh ──→ write [begin, end) ──→ test [begin, end) ──→ Completed
//!               │                       │
//!               ├─ cancelled ─→ Cancelled { token: write@pos }
//!               └─ I/O error ─→ Err(Pass { token: write@pos })
//!                                       ├─ cancelled ─→ Cancelled { token: test@pos }
//!                                       └─ I/O error ─→ Err(Pass { token: test@pos })
//! ```
//!
//! Resuming a write still tests the whole region afterwards: chunks
//! written before the interruption are as suspect as the rest.

use rand::Rng;

use crate::cancel::CancelToken;
use crate::channel::IoChannel;
use crate::config::RunConfig;
use crate::engine::{
    MismatchSink, PassOutcome, Stage, TestEngine, TestStats, WriteEngine, WriteStats,
};
use crate::error::{ConfigError, SessionError};
use crate::resume::ResumeToken;

/// Which passes to run and where each starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub write_from: Option<u64>,
    pub test_from: Option<u64>,
}

impl Plan {
    /// Write and then test the whole region.
    pub fn fresh(config: &RunConfig) -> Self {
        Self {
            write_from: Some(config.region.begin),
            test_from: (!config.skip_test).then_some(config.region.begin),
        }
    }

    /// Continue writing at `offset`, then test from the beginning.
    pub fn resume_write(config: &RunConfig, offset: u64) -> Self {
        Self {
            write_from: Some(offset),
            test_from: (!config.skip_test).then_some(config.region.begin),
        }
    }

    /// Skip writing and continue testing at `offset`.
    pub fn resume_test(offset: u64) -> Self {
        Self {
            write_from: None,
            test_from: Some(offset),
        }
    }

    /// The plan a token asks for.
    pub fn from_token(config: &RunConfig, token: &ResumeToken) -> Self {
        match token.stage {
            Stage::Write => Self::resume_write(config, token.position),
            Stage::Test => Self::resume_test(token.position),
        }
    }

    pub fn validate(&self, config: &RunConfig) -> Result<(), ConfigError> {
        if let Some(offset) = self.write_from {
            config.validate_resume("write start", offset)?;
        }
        if let Some(offset) = self.test_from {
            config.validate_resume("test start", offset)?;
        }
        Ok(())
    }
}

/// Stats of the passes that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub write: Option<WriteStats>,
    pub test: Option<TestStats>,
}

impl SessionReport {
    pub fn mismatched_bytes(&self) -> u64 {
        self.test.as_ref().map_or(0, |t| t.mismatched_bytes)
    }
}

/// How a session that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(SessionReport),
    Cancelled {
        token: ResumeToken,
        report: SessionReport,
    },
}

impl SessionOutcome {
    pub fn report(&self) -> &SessionReport {
        match self {
            SessionOutcome::Completed(report) | SessionOutcome::Cancelled { report, .. } => report,
        }
    }
}

/// Runs a [`Plan`] against one channel.
pub struct Session<'a> {
    config: &'a RunConfig,
    cancel: CancelToken,
    progress: bool,
}

impl<'a> Session<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
            progress: false,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub fn run<C, R, S>(
        &self,
        plan: &Plan,
        channel: &mut C,
        rng: &mut R,
        sink: &mut S,
    ) -> Result<SessionOutcome, SessionError>
    where
        C: IoChannel + ?Sized,
        R: Rng + ?Sized,
        S: MismatchSink + ?Sized,
    {
        let config = self.config;
        plan.validate(config)?;
        let mut report = SessionReport::default();

        if let Some(start) = plan.write_from {
            let mut engine = WriteEngine::new(config)
                .with_cancel(self.cancel.clone())
                .with_progress(self.progress);
            match engine.run(channel, start, rng) {
                Ok(PassOutcome::Completed(stats)) => report.write = Some(stats),
                Ok(PassOutcome::Interrupted { position, stats }) => {
                    report.write = Some(stats);
                    let token = ResumeToken::capture(config, Stage::Write, position);
                    return Ok(SessionOutcome::Cancelled { token, report });
                }
                Err(source) => {
                    let token = ResumeToken::capture(config, Stage::Write, source.position());
                    return Err(SessionError::Pass {
                        token: Box::new(token),
                        source,
                    });
                }
            }
        }

        if let Some(start) = plan.test_from {
            let mut engine = TestEngine::new(config)
                .with_cancel(self.cancel.clone())
                .with_progress(self.progress);
            match engine.run(channel, start, sink) {
                Ok(PassOutcome::Completed(stats)) => report.test = Some(stats),
                Ok(PassOutcome::Interrupted { position, stats }) => {
                    report.test = Some(stats);
                    let token = ResumeToken::capture(config, Stage::Test, position);
                    return Ok(SessionOutcome::Cancelled { token, report });
                }
                Err(source) => {
                    let token = ResumeToken::capture(config, Stage::Test, source.position());
                    return Err(SessionError::Pass {
                        token: Box::new(token),
                        source,
                    });
                }
            }
        }

        Ok(SessionOutcome::Completed(report))
    }
}
