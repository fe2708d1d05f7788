//! Simulated device lies.
//!
//! Counterfeit flash devices typically lie in one of two ways: they wrap
//! writes around a small physical store while reporting a large capacity
//! (rollover), or they accept writes past some point and never keep them
//! (zeroed).  [`DeviceSimulator`] reproduces both on an honest target so
//! the detection logic can be exercised without owning a fake device.
//!
//! Both engines consult the same simulator, which keeps the two sides
//! self-consistent: the write pass decides *where* bytes go and *what* is
//! stored, the test pass asks the simulator what a device behaving that
//! way would return for a chunk.
//!
//! Every function here is pure: values in, values out, no I/O.

use crate::config::RunConfig;

/// One contiguous run of a chunk whose expected bytes share a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Offset of the run within the chunk.
    pub start: usize,
    pub len: usize,
    /// Logical stream position of the byte that was last written to the
    /// first byte of the run.
    pub source: u64,
    /// The writing chunk was forced to zero.
    pub zeroed: bool,
}

/// Fake-rollover and fake-zeroed transforms for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSimulator {
    begin: u64,
    end: u64,
    rollover: Option<u64>,
    zeroed: Option<u64>,
}

impl DeviceSimulator {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            begin: config.region.begin,
            end: config.region.end,
            rollover: config.fake_rollover,
            zeroed: config.fake_zeroed,
        }
    }

    pub fn is_active(&self) -> bool {
        self.rollover.is_some() || self.zeroed.is_some()
    }

    /// Physical offset the channel is asked to touch for `logical`.
    ///
    /// With a rollover window `w` this is `begin + (logical - begin) mod w`.
    pub fn physical_offset(&self, logical: u64) -> u64 {
        let Some(window) = self.rollover else {
            return logical;
        };
        debug_assert!(logical >= self.begin);
        let physical = self.begin + (logical - self.begin) % window;

        // Postcondition: inside the simulated physical store.
        debug_assert!(physical >= self.begin && physical < self.begin + window);
        physical
    }

    /// Whether the chunk starting at `chunk_start` is stored as zeros.
    pub fn zeroes_chunk(&self, chunk_start: u64) -> bool {
        match self.zeroed {
            Some(threshold) => chunk_start >= self.begin.saturating_add(threshold),
            None => false,
        }
    }

    /// Describe what the simulated device returns for the chunk at
    /// logical `position` of length `len`.
    ///
    /// Without rollover the chunk reads back what was written at
    /// `position`.  With rollover the physical slot was overwritten on
    /// every lap, so each byte `x` holds whatever was written at the last
    /// logical position `y ≡ x (mod window)` inside the region.  Within a
    /// chunk that writer shifts at most once, where the final lap ends, so
    /// the result has one or two segments.
    pub fn expected_segments(&self, position: u64, len: usize) -> Vec<Segment> {
        debug_assert!(position >= self.begin && position < self.end);
        debug_assert!(len > 0 && position + len as u64 <= self.end);

        let Some(window) = self.rollover else {
            return vec![Segment {
                start: 0,
                len,
                source: position,
                zeroed: self.zeroes_chunk(position),
            }];
        };
        debug_assert!(len as u64 <= window);

        // Laps after this one that land on the same physical slot.
        let laps = (self.end - 1 - position) / window;
        if laps == 0 {
            return vec![Segment {
                start: 0,
                len,
                source: position,
                zeroed: self.zeroes_chunk(position),
            }];
        }

        let last_lap_start = position + laps * window;
        // Bytes at or past `split` are not reached by the last lap.
        let split = self.end - laps * window;
        let head_len = (split - position).min(len as u64) as usize;

        let mut segments = vec![Segment {
            start: 0,
            len: head_len,
            source: last_lap_start,
            zeroed: self.zeroes_chunk(last_lap_start),
        }];
        if head_len < len {
            let prev_lap_start = position + (laps - 1) * window;
            segments.push(Segment {
                start: head_len,
                len: len - head_len,
                source: split + (laps - 1) * window,
                zeroed: self.zeroes_chunk(prev_lap_start),
            });
        }

        // Postcondition: segments tile the chunk.
        debug_assert_eq!(segments.iter().map(|s| s.len).sum::<usize>(), len);
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::key::Key;

    fn sim(
        begin: u64,
        end: u64,
        chunk: u64,
        rollover: Option<u64>,
        zeroed: Option<u64>,
    ) -> (DeviceSimulator, RunConfig) {
        let config = RunConfig::builder(Key::from_bytes(&[0u8; 16]).unwrap())
            .begin(begin)
            .end(Some(end))
            .chunk_size(chunk)
            .fake_rollover(rollover)
            .fake_zeroed(zeroed)
            .build()
            .unwrap();
        (DeviceSimulator::new(&config), config)
    }

    /// A recognisable stand-in for the keystream.
    fn pattern(pos: u64) -> u8 {
        (pos.wrapping_mul(31) ^ (pos >> 8)) as u8 | 1
    }

    /// Brute force: run the write loop against a byte map, then read
    /// every chunk back through the simulator's segments.
    fn check_against_brute_force(begin: u64, end: u64, chunk: u64, window: Option<u64>, zeroed: Option<u64>) {
        let (sim, _) = sim(begin, end, chunk, window, zeroed);
        let mut device = vec![0u8; end as usize];

        let mut pos = begin;
        while pos < end {
            let len = chunk.min(end - pos);
            let phys = sim.physical_offset(pos);
            for i in 0..len {
                let byte = if sim.zeroes_chunk(pos) { 0 } else { pattern(pos + i) };
                device[(phys + i) as usize] = byte;
            }
            pos += len;
        }

        let mut pos = begin;
        while pos < end {
            let len = chunk.min(end - pos) as usize;
            let phys = sim.physical_offset(pos) as usize;
            let mut expected = vec![0u8; len];
            for seg in sim.expected_segments(pos, len) {
                for i in 0..seg.len {
                    expected[seg.start + i] = if seg.zeroed { 0 } else { pattern(seg.source + i as u64) };
                }
            }
            assert_eq!(
                &device[phys..phys + len],
                &expected[..],
                "chunk at {pos} (window {window:?}, zeroed {zeroed:?})"
            );
            pos += len as u64;
        }
    }

    #[test]
    fn either_simulation_activates_the_simulator() {
        assert!(sim(0, 1 << 20, 4096, Some(1 << 16), None).0.is_active());
        assert!(sim(0, 1 << 20, 4096, None, Some(1 << 19)).0.is_active());
    }

    #[test]
    fn disabled_simulator_is_identity() {
        let (s, _) = sim(0, 1 << 20, 4096, None, None);
        assert!(!s.is_active());
        assert_eq!(s.physical_offset(12345 * 16), 12345 * 16);
        assert!(!s.zeroes_chunk(1 << 19));
        assert_eq!(
            s.expected_segments(8192, 4096),
            vec![Segment { start: 0, len: 4096, source: 8192, zeroed: false }]
        );
    }

    #[test]
    fn rollover_wraps_relative_to_begin() {
        let (s, _) = sim(4096, 4096 + 10 * 1024, 1024, Some(4096), None);
        assert_eq!(s.physical_offset(4096), 4096);
        assert_eq!(s.physical_offset(4096 + 4096), 4096);
        assert_eq!(s.physical_offset(4096 + 5 * 1024), 4096 + 1024);
    }

    #[test]
    fn zeroed_threshold_is_relative_to_begin() {
        let (s, _) = sim(1024, 1024 + 8192, 1024, None, Some(4096));
        assert!(!s.zeroes_chunk(1024 + 3072));
        assert!(s.zeroes_chunk(1024 + 4096));
        assert!(s.zeroes_chunk(1024 + 7168));
    }

    #[test]
    fn rollover_last_lap_owns_the_slot() {
        // Three full laps: the slot of chunk 0 holds lap three.
        let (s, _) = sim(0, 3 * 4096, 1024, Some(4096), None);
        assert_eq!(
            s.expected_segments(0, 1024),
            vec![Segment { start: 0, len: 1024, source: 8192, zeroed: false }]
        );
        assert_eq!(
            s.expected_segments(8192 + 1024, 1024),
            vec![Segment { start: 0, len: 1024, source: 8192 + 1024, zeroed: false }]
        );
    }

    #[test]
    fn rollover_with_partial_last_lap_splits_chunk() {
        // Region ends 512 bytes into the second lap's first chunk.
        let (s, _) = sim(0, 4096 + 512, 1024, Some(4096), None);
        assert_eq!(
            s.expected_segments(0, 1024),
            vec![
                Segment { start: 0, len: 512, source: 4096, zeroed: false },
                Segment { start: 512, len: 512, source: 512, zeroed: false },
            ]
        );
    }

    #[test]
    fn segments_match_brute_force_write() {
        check_against_brute_force(0, 16 * 1024, 1024, None, None);
        check_against_brute_force(0, 16 * 1024, 1024, None, Some(5000));
        check_against_brute_force(0, 16 * 1024, 1024, Some(4096), None);
        check_against_brute_force(0, 16 * 1024 + 512, 1024, Some(4096), None);
        check_against_brute_force(2048, 2048 + 9 * 1024 + 16, 1024, Some(3072), None);
        check_against_brute_force(0, 20 * 1024 + 272, 1024, Some(4096), Some(6 * 1024));
        check_against_brute_force(512, 512 + 7 * 512 + 48, 512, Some(1024), Some(2048));
        check_against_brute_force(0, 1000, 1024, Some(1024), None);
    }
}
