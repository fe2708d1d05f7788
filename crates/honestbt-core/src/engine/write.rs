//! The write pass.

use std::io;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::Rng;

use crate::buffer::AlignedBuffer;
use crate::cancel::CancelToken;
use crate::channel::IoChannel;
use crate::config::RunConfig;
use crate::engine::{settle, PassOutcome, PassState};
use crate::error::{IoOp, PassError};
use crate::fault::FaultInjector;
use crate::keystream::KeystreamGenerator;
use crate::progress::{format_bytes, ProgressMeter};
use crate::simulator::DeviceSimulator;

/// Counters for one write pass (or the part of it that ran).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub bytes_written: u64,
    pub chunks: u64,
    /// Bytes deliberately corrupted by fuzzing.
    pub corrupted_bytes: u64,
    pub elapsed: Duration,
}

/// Streams the keystream for `[start, end)` onto a channel.
pub struct WriteEngine<'a> {
    config: &'a RunConfig,
    simulator: DeviceSimulator,
    cancel: CancelToken,
    progress: bool,
    state: PassState,
}

impl<'a> WriteEngine<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            simulator: DeviceSimulator::new(config),
            cancel: CancelToken::new(),
            progress: false,
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

    pub fn state(&self) -> PassState {
        self.state
    }

    /// Write from `start` to the end of the region.
    ///
    /// `start` must be cipher-block aligned and inside the region; the
    /// session validates resume offsets before calling this.  `rng` only
    /// drives fuzzing and is never touched when fuzz is off.
    pub fn run<C, R>(
        &mut self,
        channel: &mut C,
        start: u64,
        rng: &mut R,
    ) -> Result<PassOutcome<WriteStats>, PassError>
    where
        C: IoChannel + ?Sized,
        R: Rng + ?Sized,
    {
        self.state = PassState::Running;
        let result = self.write_loop(channel, start, rng);
        self.state = settle(&result);
        result
    }

    fn write_loop<C, R>(
        &mut self,
        channel: &mut C,
        start: u64,
        rng: &mut R,
    ) -> Result<PassOutcome<WriteStats>, PassError>
    where
        C: IoChannel + ?Sized,
        R: Rng + ?Sized,
    {
        let config = self.config;
        let region = config.region;
        debug_assert!(start >= region.begin && start <= region.end);

        let started = Instant::now();
        let mut stats = WriteStats::default();
        let mut meter = ProgressMeter::new("write", region, start, self.progress);
        let mut keystream = KeystreamGenerator::derive(&config.key, start);
        let mut buf = AlignedBuffer::zeroed(config.chunk_len());
        let mut position = start;
        // Physical offset the channel cursor sits at, when known.
        let mut cursor = None;

        info!(
            "write pass: {} from offset {start}",
            format_bytes(region.end - start)
        );
        if self.simulator.is_active() {
            info!(
                "simulating a dishonest device (rollover {:?}, zeroed past {:?})",
                config.fake_rollover, config.fake_zeroed
            );
        }

        while position < region.end {
            if self.cancel.is_cancelled() {
                stats.elapsed = started.elapsed();
                info!("write pass interrupted at offset {position}");
                return Ok(PassOutcome::Interrupted { position, stats });
            }

            let len = (region.end - position).min(config.chunk_size) as usize;
            let chunk = &mut buf[..len];
            keystream.fill(chunk);

            if !config.fuzz.is_zero() {
                let corruptions = FaultInjector::corrupt(chunk, position, config.fuzz, rng);
                for c in &corruptions {
                    debug!(
                        "fuzz: offset {:#x}: {:#04x} -> {:#04x}",
                        c.offset, c.old, c.new
                    );
                }
                stats.corrupted_bytes += corruptions.len() as u64;
            }

            if self.simulator.zeroes_chunk(position) {
                chunk.fill(0);
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
            let written = channel.write(chunk).map_err(|e| io_err(IoOp::Write, e))?;
            if written != len {
                let short = io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {written} of {len} bytes"),
                );
                return Err(io_err(IoOp::Write, short));
            }

            cursor = Some(offset + len as u64);
            position += len as u64;
            stats.bytes_written += len as u64;
            stats.chunks += 1;
            meter.update(position);
        }

        // Nothing written by this pass is known durable until the flush
        // succeeds, so a failure here resumes from the pass start.
        channel.flush().map_err(|source| PassError::Io {
            op: IoOp::Flush,
            offset: cursor.unwrap_or(start),
            position: start,
            source,
        })?;

        stats.elapsed = started.elapsed();
        meter.finish(position);
        info!(
            "write pass complete: {} in {:.1}s",
            format_bytes(stats.bytes_written),
            stats.elapsed.as_secs_f64()
        );
        Ok(PassOutcome::Completed(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DeviceFault, MemoryDevice};
    use crate::config::FuzzRate;
    use crate::engine::testutil::{config, key, TripWire};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(0x5EED)
    }

    #[test]
    fn writes_the_keystream_over_the_region() {
        let cfg = config(10_000, 1024).build().unwrap();
        let mut dev = MemoryDevice::new(10_000);
        let mut engine = WriteEngine::new(&cfg);
        assert_eq!(engine.state(), PassState::Idle);

        let outcome = engine.run(&mut dev, 0, &mut rng()).unwrap();
        assert_eq!(engine.state(), PassState::Completed);

        let stats = outcome.into_stats();
        assert_eq!(stats.bytes_written, 10_000);
        assert_eq!(stats.chunks, 10);
        assert_eq!(stats.corrupted_bytes, 0);
        assert_eq!(dev.data(), &KeystreamGenerator::derive(&key(), 0).next(10_000)[..]);
        assert_eq!(dev.stats().flushes, 1);
    }

    #[test]
    fn leaves_bytes_outside_the_region_alone() {
        let cfg = config(8192, 1024).begin(1024).build().unwrap();
        let mut dev = MemoryDevice::from_image(vec![0xEE; 9000]);
        WriteEngine::new(&cfg).run(&mut dev, 1024, &mut rng()).unwrap();

        assert!(dev.data()[..1024].iter().all(|&b| b == 0xEE));
        assert!(dev.data()[8192..].iter().all(|&b| b == 0xEE));
        assert_eq!(
            &dev.data()[1024..8192],
            &KeystreamGenerator::derive(&key(), 1024).next(7168)[..]
        );
    }

    #[test]
    fn starts_mid_region_with_the_matching_stream() {
        let cfg = config(8192, 1024).build().unwrap();
        let mut dev = MemoryDevice::new(8192);
        let stats = WriteEngine::new(&cfg)
            .run(&mut dev, 3072, &mut rng())
            .unwrap()
            .into_stats();

        assert_eq!(stats.bytes_written, 5120);
        assert!(dev.data()[..3072].iter().all(|&b| b == 0));
        assert_eq!(
            &dev.data()[3072..],
            &KeystreamGenerator::derive(&key(), 0).next(8192)[3072..]
        );
    }

    #[test]
    fn start_at_end_writes_nothing() {
        let cfg = config(4096, 1024).build().unwrap();
        let mut dev = MemoryDevice::new(4096);
        let outcome = WriteEngine::new(&cfg).run(&mut dev, 4096, &mut rng()).unwrap();
        assert_eq!(outcome.stats().bytes_written, 0);
        assert!(outcome.is_completed());
    }

    #[test]
    fn fuzz_corrupts_what_reaches_the_device() {
        let cfg = config(64 * 1024, 4096)
            .fuzz(FuzzRate::from_percent(1.0).unwrap())
            .build()
            .unwrap();
        let mut dev = MemoryDevice::new(64 * 1024);
        let stats = WriteEngine::new(&cfg).run(&mut dev, 0, &mut rng()).unwrap().into_stats();

        let clean = KeystreamGenerator::derive(&key(), 0).next(64 * 1024);
        let differing = clean.iter().zip(dev.data()).filter(|(a, b)| a != b).count() as u64;
        assert_eq!(differing, stats.corrupted_bytes);
        assert!(differing > 0);
    }

    #[test]
    fn fake_zeroed_writes_zeros_past_the_threshold() {
        let cfg = config(8192, 1024).fake_zeroed(Some(4096)).build().unwrap();
        let mut dev = MemoryDevice::from_image(vec![0xFF; 8192]);
        WriteEngine::new(&cfg).run(&mut dev, 0, &mut rng()).unwrap();

        let stream = KeystreamGenerator::derive(&key(), 0).next(4096);
        assert_eq!(&dev.data()[..4096], &stream[..]);
        assert!(dev.data()[4096..].iter().all(|&b| b == 0));
    }

    #[test]
    fn fake_rollover_keeps_the_last_lap() {
        let cfg = config(4096 * 3, 1024).fake_rollover(Some(4096)).build().unwrap();
        let mut dev = MemoryDevice::new(4096 * 3);
        WriteEngine::new(&cfg).run(&mut dev, 0, &mut rng()).unwrap();

        let stream = KeystreamGenerator::derive(&key(), 0).next(4096 * 3);
        assert_eq!(&dev.data()[..4096], &stream[8192..]);
        assert!(dev.data()[4096..].iter().all(|&b| b == 0));
    }

    #[test]
    fn write_error_reports_the_failed_chunk() {
        let cfg = config(8192, 1024).build().unwrap();
        let mut dev = MemoryDevice::new(8192);
        dev.inject_fault(DeviceFault::WriteError { offset: 5000 });

        let mut engine = WriteEngine::new(&cfg);
        let err = engine.run(&mut dev, 0, &mut rng()).unwrap_err();
        assert_eq!(engine.state(), PassState::Failed);
        assert_eq!(err.position(), 4096);
        assert!(matches!(err, PassError::Io { op: IoOp::Write, offset: 4096, .. }));
        // Chunks before the failure landed.
        assert_eq!(
            &dev.data()[..4096],
            &KeystreamGenerator::derive(&key(), 0).next(4096)[..]
        );
    }

    #[test]
    fn flush_error_points_back_at_the_pass_start() {
        let cfg = config(16 * 1024, 1024).build().unwrap();
        let mut dev = MemoryDevice::new(16 * 1024);
        dev.inject_fault(DeviceFault::FlushError);

        let mut engine = WriteEngine::new(&cfg);
        let err = engine.run(&mut dev, 4096, &mut rng()).unwrap_err();
        assert_eq!(engine.state(), PassState::Failed);
        assert!(matches!(
            err,
            PassError::Io { op: IoOp::Flush, offset: 16384, position: 4096, .. }
        ));
        // Every chunk reached the device before the flush failed.
        assert_eq!(dev.stats().bytes_written, 12 * 1024);
    }

    #[test]
    fn cancellation_stops_on_a_chunk_boundary() {
        let cfg = config(16 * 1024, 1024).build().unwrap();
        let token = CancelToken::new();
        let mut dev = TripWire::after_writes(MemoryDevice::new(16 * 1024), token.clone(), 5);

        let mut engine = WriteEngine::new(&cfg).with_cancel(token);
        let outcome = engine.run(&mut dev, 0, &mut rng()).unwrap();
        assert_eq!(engine.state(), PassState::Interrupted);
        match outcome {
            PassOutcome::Interrupted { position, stats } => {
                assert_eq!(position, 5 * 1024);
                assert_eq!(stats.chunks, 5);
            }
            other => panic!("expected interruption, got {other:?}"),
        }
        assert!(dev.inner.data()[5 * 1024..].iter().all(|&b| b == 0));
    }

    #[test]
    fn already_cancelled_writes_nothing() {
        let cfg = config(4096, 1024).build().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let mut dev = MemoryDevice::new(4096);
        let outcome = WriteEngine::new(&cfg)
            .with_cancel(token)
            .run(&mut dev, 1024, &mut rng())
            .unwrap();
        assert!(matches!(outcome, PassOutcome::Interrupted { position: 1024, .. }));
        assert_eq!(dev.stats().writes, 0);
    }
}
