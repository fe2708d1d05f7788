//! Probabilistic byte corruption ("fuzz").
//!
//! Fuzzing corrupts the write buffer right before it reaches the channel,
//! so the device stores something other than the keystream.  A working
//! test pass must then flag every corrupted offset; fuzzing exists to
//! prove that it does.
//!
//! The injector is a pure function of its inputs: the buffer, the
//! absolute offset of its first byte, the rate and the random source.
//! Same seed, same corruptions.

use rand::Rng;

use crate::config::FuzzRate;

/// One corrupted byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corruption {
    /// Absolute stream offset of the byte.
    pub offset: u64,
    pub old: u8,
    pub new: u8,
}

/// Stateless byte corrupter.
pub struct FaultInjector;

impl FaultInjector {
    /// Corrupt each byte of `buf` independently with probability `rate`.
    ///
    /// A corrupted byte is replaced with a value drawn uniformly from the
    /// 255 values different from the original, so every corruption is
    /// observable on read-back.  A zero rate returns immediately without
    /// drawing from `rng`.
    pub fn corrupt<R: Rng + ?Sized>(
        buf: &mut [u8],
        base_offset: u64,
        rate: FuzzRate,
        rng: &mut R,
    ) -> Vec<Corruption> {
        if rate.is_zero() {
            return Vec::new();
        }

        let always = rate == FuzzRate::ALWAYS;
        let probability = rate.probability();
        let mut corruptions = Vec::new();

        for (i, byte) in buf.iter_mut().enumerate() {
            if !always && !rng.gen_bool(probability) {
                continue;
            }
            let old = *byte;
            let new = old ^ rng.gen_range(1..=u8::MAX);
            *byte = new;
            corruptions.push(Corruption {
                offset: base_offset + i as u64,
                old,
                new,
            });
        }

        debug_assert!(corruptions.iter().all(|c| c.old != c.new));
        corruptions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn rng(seed: u64) -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(seed)
    }

    #[test]
    fn zero_rate_is_identity() {
        let mut buf = vec![0xA5u8; 4096];
        let mut r = rng(1);
        let before = r.clone();
        let out = FaultInjector::corrupt(&mut buf, 0, FuzzRate::NONE, &mut r);
        assert!(out.is_empty());
        assert!(buf.iter().all(|&b| b == 0xA5));
        // No randomness consumed.
        assert_eq!(r.get_word_pos(), before.get_word_pos());
    }

    #[test]
    fn full_rate_changes_every_byte() {
        let original: Vec<u8> = (0..=255u8).cycle().take(8192).collect();
        let mut buf = original.clone();
        let out = FaultInjector::corrupt(&mut buf, 1 << 30, FuzzRate::ALWAYS, &mut rng(2));

        assert_eq!(out.len(), buf.len());
        for (i, (a, b)) in original.iter().zip(&buf).enumerate() {
            assert_ne!(a, b, "byte {i} survived");
        }
        assert_eq!(out[0].offset, 1 << 30);
        assert_eq!(out[8191].offset, (1 << 30) + 8191);
        assert_eq!(out[10].old, original[10]);
        assert_eq!(out[10].new, buf[10]);
    }

    #[test]
    fn same_seed_same_corruptions() {
        let rate = FuzzRate::from_percent(5.0).unwrap();
        let mut a = vec![0u8; 10_000];
        let mut b = vec![0u8; 10_000];
        let ca = FaultInjector::corrupt(&mut a, 0, rate, &mut rng(7));
        let cb = FaultInjector::corrupt(&mut b, 0, rate, &mut rng(7));
        assert_eq!(ca, cb);
        assert_eq!(a, b);

        let mut c = vec![0u8; 10_000];
        let cc = FaultInjector::corrupt(&mut c, 0, rate, &mut rng(8));
        assert_ne!(ca, cc);
    }

    #[test]
    fn partial_rate_is_roughly_proportional() {
        let rate = FuzzRate::from_percent(1.0).unwrap();
        let mut buf = vec![0u8; 100_000];
        let out = FaultInjector::corrupt(&mut buf, 0, rate, &mut rng(9));
        // Expect ~1000; allow a wide band.
        assert!((700..1300).contains(&out.len()), "{} corruptions", out.len());
        let changed = buf.iter().filter(|&&b| b != 0).count();
        assert_eq!(changed, out.len());
    }
}
