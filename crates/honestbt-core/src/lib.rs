//! Verified streaming overwrite engine for destructive block device testing.
//!
//! honestbt fills a target with an AES-CTR keystream and reads it back,
//! regenerating the expected bytes from the key and the absolute offset
//! instead of keeping a reference copy.  Any chunk of the stream can be
//! rebuilt from `(key, position)` alone, which is what makes passes
//! resumable and lets the verifier run without a reference buffer.
//!
//! # Architecture
//!
//! ```text
//! Key ──→ KeystreamGenerator ──┬──→ WriteEngine ──→ FaultInjector ──┐
//!                              │                                    ├──→ DeviceSimulator ──→ IoChannel
//!                              └──→ TestEngine ─────────────────────┘
//!                                        │
//!                                        └──→ MismatchSink
//!
//! interruption / I/O failure ──→ ResumeToken ──→ replayable command line
//! ```
//!
//! - [`key`] — AES keys, random generation, base64 encoding
//! - [`config`] — validated, immutable [`RunConfig`](config::RunConfig)
//! - [`keystream`] — positionable counter-mode keystream
//! - [`fault`] — probabilistic byte corruption ("fuzz")
//! - [`simulator`] — fake-rollover / fake-zeroed device lies
//! - [`channel`] — the I/O channel contract plus file and in-memory backends
//! - [`engine`] — the write and test passes
//! - [`resume`] — resume tokens and their textual form
//! - [`session`] — sequencing of the write and test passes

pub mod buffer;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod key;
pub mod keystream;
pub mod progress;
pub mod resume;
pub mod session;
pub mod simulator;

pub use cancel::CancelToken;
pub use channel::{FileChannel, IoChannel, MemoryDevice, OpenMode};
pub use config::{FuzzRate, Region, RunConfig, RunConfigBuilder};
pub use engine::{
    LogSink, Mismatch, MismatchSink, PassOutcome, PassState, Stage, SuppressedChunk,
    SuppressionPolicy, TestEngine, TestStats, WriteEngine, WriteStats,
};
pub use error::{ConfigError, PassError, SessionError, TokenError};
pub use key::{Key, KeySize};
pub use keystream::KeystreamGenerator;
pub use resume::{ConfigSnapshot, ResumeToken};
pub use session::{Plan, Session, SessionOutcome, SessionReport};

/// Size of the AES block; keystream positions are counted in these units.
pub const CIPHER_BLOCK_SIZE: u64 = 16;
