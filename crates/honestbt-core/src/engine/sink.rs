//! Where verification findings go.

use log::warn;

/// One byte that did not read back as expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Logical stream offset of the byte.
    pub offset: u64,
    pub expected: u8,
    pub actual: u8,
}

/// A chunk reported as a whole instead of byte by byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppressedChunk {
    pub position: u64,
    pub len: usize,
    pub differing: usize,
}

/// Receives mismatches in ascending offset order.
pub trait MismatchSink {
    fn byte_mismatch(&mut self, mismatch: Mismatch);

    /// Called instead of `byte_mismatch` for chunks under suppression.
    fn chunk_suppressed(&mut self, _chunk: SuppressedChunk) {}
}

/// Logs every finding at `warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MismatchSink for LogSink {
    fn byte_mismatch(&mut self, m: Mismatch) {
        warn!(
            "mismatch at offset {:#x}: expected {:#04x}, got {:#04x}",
            m.offset, m.expected, m.actual
        );
    }

    fn chunk_suppressed(&mut self, c: SuppressedChunk) {
        warn!(
            "bad chunk at offset {:#x}: {} of {} bytes differ",
            c.position, c.differing, c.len
        );
    }
}

/// Collects per-byte mismatches only.  Chunks reported as a whole are
/// not recorded; run the test pass without a
/// [`SuppressionPolicy`](crate::SuppressionPolicy) when every byte must
/// land in the vector.
impl MismatchSink for Vec<Mismatch> {
    fn byte_mismatch(&mut self, mismatch: Mismatch) {
        self.push(mismatch);
    }
}

impl<S: MismatchSink + ?Sized> MismatchSink for &mut S {
    fn byte_mismatch(&mut self, mismatch: Mismatch) {
        (**self).byte_mismatch(mismatch)
    }

    fn chunk_suppressed(&mut self, chunk: SuppressedChunk) {
        (**self).chunk_suppressed(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryDevice;
    use crate::config::FuzzRate;
    use crate::engine::testutil::config;
    use crate::engine::{TestEngine, WriteEngine};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn vec_sink_keeps_bytes_and_skips_suppressed_chunks() {
        let cfg = config(16 * 1024, 1024).fuzz(FuzzRate::ALWAYS).build().unwrap();
        let mut dev = MemoryDevice::new(16 * 1024);
        WriteEngine::new(&cfg)
            .run(&mut dev, 0, &mut ChaCha20Rng::seed_from_u64(5))
            .unwrap();

        let mut found = Vec::<Mismatch>::new();
        let stats = TestEngine::new(&cfg)
            .run(&mut dev, 0, &mut found)
            .unwrap()
            .into_stats();
        assert_eq!(stats.suppressed_chunks, 6);
        assert_eq!(found.len(), 10 * 1024);
        assert_eq!(found.last().map(|m| m.offset), Some(10 * 1024 - 1));

        let mut every = Vec::<Mismatch>::new();
        TestEngine::new(&cfg)
            .with_suppression(None)
            .run(&mut dev, 0, &mut every)
            .unwrap();
        assert_eq!(every.len(), 16 * 1024);
        assert_eq!(&every[..found.len()], &found[..]);
    }
}
