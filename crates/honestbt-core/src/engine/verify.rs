//! The test (verification) pass.
//!
//! For each chunk the expected bytes are rebuilt from the key and the
//! chunk's stream position, the actual bytes are read from the channel,
//! and every differing byte goes to the [`MismatchSink`].
//!
//! A device that lies usually lies about everything past some point, and
//! a byte-per-line report of a terabyte of garbage helps nobody.  With a
//! [`SuppressionPolicy`] in place, once enough consecutive chunks come
//! back almost entirely wrong, further such chunks are reported as a
//! whole.  Chunks with only a few bad bytes are always reported byte by
//! byte.

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::buffer::AlignedBuffer;
use crate::cancel::CancelToken;
use crate::channel::IoChannel;
use crate::config::RunConfig;
use crate::engine::sink::{Mismatch, MismatchSink, SuppressedChunk};
use crate::engine::{settle, PassOutcome, PassState};
use crate::error::{IoOp, PassError};
use crate::keystream::KeystreamGenerator;
use crate::progress::{format_bytes, ProgressMeter};
use crate::simulator::DeviceSimulator;

/// Counters for one test pass (or the part of it that ran).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestStats {
    pub bytes_tested: u64,
    pub mismatched_bytes: u64,
    /// Chunks with at least one mismatched byte.
    pub bad_chunks: u64,
    /// Bad chunks reported as a whole rather than per byte.
    pub suppressed_chunks: u64,
    pub elapsed: Duration,
}

/// When to stop reporting individual bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppressionPolicy {
    /// Consecutive noisy chunks before suppression engages.
    pub streak_threshold: u32,
    /// A chunk is noisy when more than this share of its bytes differ.
    pub noisy_percent: u32,
    /// How much one clean chunk reduces the streak.  A bad chunk that is
    /// not noisy resets it.
    pub decay: u32,
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self {
            streak_threshold: 10,
            noisy_percent: 90,
            decay: 1,
        }
    }
}

/// Running streak of noisy chunks.
#[derive(Debug)]
struct Suppression {
    policy: Option<SuppressionPolicy>,
    streak: u32,
}

impl Suppression {
    fn new(policy: Option<SuppressionPolicy>) -> Self {
        Self { policy, streak: 0 }
    }

    fn is_noisy(&self, differing: usize, len: usize) -> bool {
        self.policy.is_some_and(|p| {
            differing as u64 * 100 > len as u64 * u64::from(p.noisy_percent)
        })
    }

    fn is_engaged(&self) -> bool {
        self.policy.is_some_and(|p| self.streak >= p.streak_threshold)
    }

    fn record_noisy(&mut self) {
        if let Some(p) = self.policy {
            let was_engaged = self.is_engaged();
            self.streak = (self.streak + 1).min(p.streak_threshold);
            if !was_engaged && self.is_engaged() {
                warn!(
                    "{} consecutive chunks almost entirely wrong, reporting whole chunks from now on",
                    p.streak_threshold
                );
            }
        }
    }

    /// A bad chunk that is not noisy breaks the run of noisy ones.
    fn record_partial(&mut self) {
        if self.policy.is_some() {
            if self.is_engaged() {
                info!("device reads back mostly correctly again, reporting individual bytes");
            }
            self.streak = 0;
        }
    }

    fn record_clean(&mut self) {
        if let Some(p) = self.policy {
            let was_engaged = self.is_engaged();
            self.streak = self.streak.saturating_sub(p.decay);
            if was_engaged && !self.is_engaged() {
                info!("device reads back correctly again, reporting individual bytes");
            }
        }
    }
}

/// Reads `[start, end)` back and compares it with the keystream.
pub struct TestEngine<'a> {
    config: &'a RunConfig,
    simulator: DeviceSimulator,
    cancel: CancelToken,
    progress: bool,
    suppression: Option<SuppressionPolicy>,
    state: PassState,
}

impl<'a> TestEngine<'a> {
    /// Suppression defaults to on unless the config asks for an
    /// exhaustive diff.
    pub fn new(config: &'a RunConfig) -> Self {
        let suppression = (!config.exhaustive_diff).then(SuppressionPolicy::default);
        Self {
            config,
            simulator: DeviceSimulator::new(config),
            cancel: CancelToken::new(),
            progress: false,
            suppression,
            state: PassState::Idle,
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

    pub fn with_suppression(mut self, policy: Option<SuppressionPolicy>) -> Self {
        self.suppression = policy;
        self
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    /// Verify from `start` to the end of the region.
    ///
    /// Mismatches are findings, not errors: the pass completes and the
    /// caller inspects [`TestStats::mismatched_bytes`].
    pub fn run<C, S>(
        &mut self,
        channel: &mut C,
        start: u64,
        sink: &mut S,
    ) -> Result<PassOutcome<TestStats>, PassError>
    where
        C: IoChannel + ?Sized,
        S: MismatchSink + ?Sized,
    {
        self.state = PassState::Running;
        let result = self.test_loop(channel, start, sink);
        self.state = settle(&result);
        result
    }

    fn test_loop<C, S>(
        &mut self,
        channel: &mut C,
        start: u64,
        sink: &mut S,
    ) -> Result<PassOutcome<TestStats>, PassError>
    where
        C: IoChannel + ?Sized,
        S: MismatchSink + ?Sized,
    {
        let config = self.config;
        let region = config.region;
        debug_assert!(start >= region.begin && start <= region.end);

        let started = Instant::now();
        let mut stats = TestStats::default();
        let mut meter = ProgressMeter::new("test", region, start, self.progress);
        let mut suppression = Suppression::new(self.suppression);
        let mut keystream = KeystreamGenerator::derive(&config.key, start);
        let mut expected = AlignedBuffer::zeroed(config.chunk_len());
        let mut actual = AlignedBuffer::zeroed(config.chunk_len());
        let mut position = start;
        let mut cursor = None;

        info!(
            "test pass: {} from offset {start}",
            format_bytes(region.end - start)
        );

        while position < region.end {
            if self.cancel.is_cancelled() {
                stats.elapsed = started.elapsed();
                info!("test pass interrupted at offset {position}");
                return Ok(PassOutcome::Interrupted { position, stats });
            }

            let len = (region.end - position).min(config.chunk_size) as usize;
            for seg in self.simulator.expected_segments(position, len) {
                let out = &mut expected[seg.start..seg.start + seg.len];
                if seg.zeroed {
                    out.fill(0);
                    continue;
                }
                if keystream.position() != seg.source {
                    keystream = KeystreamGenerator::derive(&config.key, seg.source);
                }
                keystream.fill(out);
            }

            let offset = self.simulator.physical_offset(position);
            let io_err = |op, source| PassError::Io {
                op,
                offset,
                position,
                source,
            };
            if cursor != Some(offset) {
                channel.seek(offset).map_err(|e| io_err(IoOp::Seek, e))?;
            }
            channel
                .read_exact(&mut actual[..len])
                .map_err(|e| io_err(IoOp::Read, e))?;
            cursor = Some(offset + len as u64);

            let (want, got) = (&expected[..len], &actual[..len]);
            let differing = want.iter().zip(got).filter(|(a, b)| a != b).count();
            if differing == 0 {
                suppression.record_clean();
            } else {
                stats.mismatched_bytes += differing as u64;
                stats.bad_chunks += 1;

                let noisy = suppression.is_noisy(differing, len);
                if noisy && suppression.is_engaged() {
                    stats.suppressed_chunks += 1;
                    sink.chunk_suppressed(SuppressedChunk {
                        position,
                        len,
                        differing,
                    });
                } else {
                    for (i, (&e, &a)) in want.iter().zip(got).enumerate() {
                        if e != a {
                            sink.byte_mismatch(Mismatch {
                                offset: position + i as u64,
                                expected: e,
                                actual: a,
                            });
                        }
                    }
                }
                if noisy {
                    suppression.record_noisy();
                } else {
                    suppression.record_partial();
                }
            }

            position += len as u64;
            stats.bytes_tested += len as u64;
            meter.update(position);
        }

        stats.elapsed = started.elapsed();
        meter.finish(position);
        info!(
            "test pass complete: {} tested, {} bytes mismatched in {} chunks",
            format_bytes(stats.bytes_tested),
            stats.mismatched_bytes,
            stats.bad_chunks
        );
        Ok(PassOutcome::Completed(stats))
    }
}
