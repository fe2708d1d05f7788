//! Run configuration.
//!
//! A [`RunConfig`] is built once, validated, and then shared read-only by
//! both engines.  Nothing in it changes during a pass; the only mutable
//! progress state is the stream position owned by the running engine.

use crate::error::ConfigError;
use crate::key::Key;
use crate::CIPHER_BLOCK_SIZE;

/// Default I/O granularity.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Largest accepted chunk; one chunk is held in memory per buffer.
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// A half-open byte range `[begin, end)` of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub begin: u64,
    pub end: u64,
}

impl Region {
    pub fn new(begin: u64, end: u64) -> Result<Self, ConfigError> {
        if end <= begin {
            return Err(ConfigError::EmptyRegion { begin, end });
        }
        Ok(Self { begin, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }
}

/// Fuzz probability in parts per million.
///
/// Fixed point keeps the value exact when it is written into a resume
/// command and parsed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FuzzRate {
    ppm: u32,
}

impl FuzzRate {
    pub const NONE: FuzzRate = FuzzRate { ppm: 0 };
    pub const ALWAYS: FuzzRate = FuzzRate { ppm: 1_000_000 };

    /// Rate from a percentage in `0.0..=100.0`, rounded to 0.0001%.
    pub fn from_percent(percent: f64) -> Result<Self, ConfigError> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(ConfigError::FuzzRate(percent));
        }
        Ok(Self {
            ppm: (percent * 10_000.0).round() as u32,
        })
    }

    pub fn from_ppm(ppm: u32) -> Result<Self, ConfigError> {
        if ppm > 1_000_000 {
            return Err(ConfigError::FuzzRate(ppm as f64 / 10_000.0));
        }
        Ok(Self { ppm })
    }

    pub fn ppm(self) -> u32 {
        self.ppm
    }

    pub fn is_zero(self) -> bool {
        self.ppm == 0
    }

    /// Per-byte corruption probability as a fraction.
    pub fn probability(self) -> f64 {
        self.ppm as f64 / 1_000_000.0
    }

    /// Shortest exact percentage string, e.g. `"0.1"` or `"100"`.
    pub fn to_percent_string(self) -> String {
        let whole = self.ppm / 10_000;
        let frac = self.ppm % 10_000;
        if frac == 0 {
            return whole.to_string();
        }
        let digits = format!("{frac:04}");
        format!("{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// Immutable parameters of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub key: Key,
    pub region: Region,
    pub chunk_size: u64,
    pub fuzz: FuzzRate,
    /// Simulated physical capacity; I/O wraps within `begin..begin + window`.
    pub fake_rollover: Option<u64>,
    /// Offset from `begin` past which the simulated device stores nothing.
    pub fake_zeroed: Option<u64>,
    pub skip_test: bool,
    pub direct_io: bool,
    /// Report every differing byte even for chunks that are almost entirely wrong.
    pub exhaustive_diff: bool,
    /// Size reported by the target, when known; the default region end.
    pub device_size: Option<u64>,
}

impl RunConfig {
    pub fn builder(key: Key) -> RunConfigBuilder {
        RunConfigBuilder::new(key)
    }

    /// Chunk size as a buffer length.
    pub fn chunk_len(&self) -> usize {
        self.chunk_size as usize
    }

    /// Check a resume offset: cipher-block aligned and inside `[begin, end]`.
    ///
    /// `end` itself is accepted and means "nothing left to do".
    pub fn validate_resume(&self, what: &'static str, offset: u64) -> Result<(), ConfigError> {
        if offset % CIPHER_BLOCK_SIZE != 0 {
            return Err(ConfigError::Unaligned { what, offset });
        }
        if offset < self.region.begin || offset > self.region.end {
            return Err(ConfigError::OutsideRegion {
                what,
                offset,
                begin: self.region.begin,
                end: self.region.end,
            });
        }
        Ok(())
    }
}

/// Builder for [`RunConfig`]; all checks happen in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    key: Key,
    begin: u64,
    end: Option<u64>,
    device_size: Option<u64>,
    chunk_size: u64,
    fuzz: FuzzRate,
    fake_rollover: Option<u64>,
    fake_zeroed: Option<u64>,
    skip_test: bool,
    direct_io: bool,
    exhaustive_diff: bool,
}

impl RunConfigBuilder {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            begin: 0,
            end: None,
            device_size: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fuzz: FuzzRate::NONE,
            fake_rollover: None,
            fake_zeroed: None,
            skip_test: false,
            direct_io: true,
            exhaustive_diff: false,
        }
    }

    pub fn begin(mut self, begin: u64) -> Self {
        self.begin = begin;
        self
    }

    /// Explicit region end; defaults to the device size.
    pub fn end(mut self, end: Option<u64>) -> Self {
        self.end = end;
        self
    }

    pub fn device_size(mut self, size: Option<u64>) -> Self {
        self.device_size = size;
        self
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn fuzz(mut self, fuzz: FuzzRate) -> Self {
        self.fuzz = fuzz;
        self
    }

    pub fn fake_rollover(mut self, window: Option<u64>) -> Self {
        self.fake_rollover = window;
        self
    }

    pub fn fake_zeroed(mut self, threshold: Option<u64>) -> Self {
        self.fake_zeroed = threshold;
        self
    }

    pub fn skip_test(mut self, skip: bool) -> Self {
        self.skip_test = skip;
        self
    }

    pub fn direct_io(mut self, direct: bool) -> Self {
        self.direct_io = direct;
        self
    }

    pub fn exhaustive_diff(mut self, exhaustive: bool) -> Self {
        self.exhaustive_diff = exhaustive;
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let chunk_size = self.chunk_size;
        if chunk_size == 0 || chunk_size % CIPHER_BLOCK_SIZE != 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkSize(chunk_size));
        }

        if self.begin % CIPHER_BLOCK_SIZE != 0 {
            return Err(ConfigError::Unaligned {
                what: "region begin",
                offset: self.begin,
            });
        }

        let end = match (self.end, self.device_size) {
            (Some(end), _) => end,
            (None, Some(size)) => size,
            (None, None) => self.begin,
        };
        let region = Region::new(self.begin, end)?;
        if let Some(device_size) = self.device_size {
            if end > device_size {
                return Err(ConfigError::RegionBeyondDevice { end, device_size });
            }
        }

        if let Some(window) = self.fake_rollover {
            if window == 0 || window % chunk_size != 0 {
                return Err(ConfigError::RolloverWindow { window, chunk_size });
            }
        }

        Ok(RunConfig {
            key: self.key,
            region,
            chunk_size,
            fuzz: self.fuzz,
            fake_rollover: self.fake_rollover,
            fake_zeroed: self.fake_zeroed,
            skip_test: self.skip_test,
            direct_io: self.direct_io,
            exhaustive_diff: self.exhaustive_diff,
            device_size: self.device_size,
        })
    }
}
