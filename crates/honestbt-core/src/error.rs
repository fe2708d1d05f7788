//! Error types shared across the engine.
//!
//! The taxonomy follows the life of a run: configuration problems are
//! caught before any pass starts and never produce a resume token, I/O
//! failures stop a pass at a chunk boundary and always carry one.
//! Verification mismatches are not errors at all; they are reported
//! through a [`MismatchSink`](crate::engine::MismatchSink).

use std::fmt;
use std::io;

use thiserror::Error;

use crate::resume::ResumeToken;

/// Invalid run parameters, detected before any I/O happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid key length {0} bytes (expected 16, 24 or 32)")]
    KeyLength(usize),

    #[error("invalid key size {0} bits (expected 128, 192 or 256)")]
    KeyBits(u32),

    #[error("key is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),

    #[error("chunk size {0} must be a positive multiple of 16 bytes and at most 1 GiB")]
    ChunkSize(u64),

    #[error("{what} {offset} is not aligned to the 16-byte cipher block")]
    Unaligned { what: &'static str, offset: u64 },

    #[error("empty region: end {end} must be greater than begin {begin}")]
    EmptyRegion { begin: u64, end: u64 },

    #[error("region end {end} lies beyond the end of the target ({device_size} bytes)")]
    RegionBeyondDevice { end: u64, device_size: u64 },

    #[error("{what} {offset} lies outside the region [{begin}, {end})")]
    OutsideRegion {
        what: &'static str,
        offset: u64,
        begin: u64,
        end: u64,
    },

    #[error("fuzz rate {0}% is outside 0..=100")]
    FuzzRate(f64),

    #[error("fake rollover window {window} must be a positive multiple of the chunk size {chunk_size}")]
    RolloverWindow { window: u64, chunk_size: u64 },

    #[error("invalid size {0:?}")]
    Size(String),
}

/// The channel operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Seek,
    Read,
    Write,
    Flush,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOp::Seek => "seek",
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Flush => "flush",
        };
        f.write_str(name)
    }
}

/// A pass stopped because the channel failed.
///
/// `position` is the logical stream position of the chunk that was being
/// processed; every chunk before it completed.  `offset` is the physical
/// offset the channel was asked to touch, which differs from `position`
/// when fake-rollover redirects I/O.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("{op} failed at offset {offset} (stream position {position})")]
    Io {
        op: IoOp,
        offset: u64,
        position: u64,
        #[source]
        source: io::Error,
    },
}

impl PassError {
    /// Logical position of the first chunk that did not complete.
    pub fn position(&self) -> u64 {
        match self {
            PassError::Io { position, .. } => *position,
        }
    }
}

/// Errors from a full write+test session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A pass failed; `token` resumes at the failed chunk.
    #[error("{source}")]
    Pass {
        token: Box<ResumeToken>,
        #[source]
        source: PassError,
    },
}

/// Errors reading or writing a resume state file.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
