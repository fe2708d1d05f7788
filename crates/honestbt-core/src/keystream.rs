//! Positionable counter-mode keystream.
//!
//! The stream is AES in CTR mode with a 128-bit big-endian counter that
//! starts at zero for byte offset zero.  Byte `p` of the stream therefore
//! lives in counter block `p / 16`, and a generator can be derived at any
//! offset without replaying the bytes before it:
//!
//! ```
//! use honestbt_core::{Key, KeystreamGenerator};
//!
//! let key = Key::from_bytes(&[9u8; 32]).unwrap();
//! let streamed = KeystreamGenerator::derive(&key, 0).next(4096 + 64);
//! let derived = KeystreamGenerator::derive(&key, 4096).next(64);
//! assert_eq!(&streamed[4096..], &derived[..]);
//! ```
//!
//! This is what lets the test pass regenerate exactly what the write pass
//! wrote, chunk by chunk, with no reference copy.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::generic_array::GenericArray;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::key::{Key, KeySize};
use crate::CIPHER_BLOCK_SIZE;

enum Cipher {
    Aes128(Ctr128BE<Aes128>),
    Aes192(Ctr128BE<Aes192>),
    Aes256(Ctr128BE<Aes256>),
}

impl Cipher {
    fn new(key: &Key, counter: u128) -> Self {
        let iv = GenericArray::from(counter.to_be_bytes());
        let k = key.as_bytes();
        match key.size() {
            KeySize::Aes128 => Cipher::Aes128(Ctr128BE::new(GenericArray::from_slice(k), &iv)),
            KeySize::Aes192 => Cipher::Aes192(Ctr128BE::new(GenericArray::from_slice(k), &iv)),
            KeySize::Aes256 => Cipher::Aes256(Ctr128BE::new(GenericArray::from_slice(k), &iv)),
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Cipher::Aes128(c) => c.apply_keystream(buf),
            Cipher::Aes192(c) => c.apply_keystream(buf),
            Cipher::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// A keystream cursor positioned at an absolute byte offset.
pub struct KeystreamGenerator {
    cipher: Cipher,
    position: u64,
}

impl KeystreamGenerator {
    /// Derive a generator whose first output byte is stream byte `position`.
    ///
    /// Passes always start on a cipher block boundary; an unaligned
    /// position still works by discarding the head of the first block.
    pub fn derive(key: &Key, position: u64) -> Self {
        let counter = (position / CIPHER_BLOCK_SIZE) as u128;
        let mut cipher = Cipher::new(key, counter);

        let skip = (position % CIPHER_BLOCK_SIZE) as usize;
        if skip > 0 {
            let mut discard = [0u8; CIPHER_BLOCK_SIZE as usize];
            cipher.apply(&mut discard[..skip]);
        }

        Self { cipher, position }
    }

    /// Absolute offset of the next byte this generator will produce.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Overwrite `out` with the next `out.len()` keystream bytes.
    ///
    /// Equivalent to encrypting an all-zero plaintext in place.
    pub fn fill(&mut self, out: &mut [u8]) {
        out.fill(0);
        self.cipher.apply(out);
        self.position += out.len() as u64;
    }

    /// The next `n` keystream bytes.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        self.fill(&mut out);
        out
    }
}

impl fmt::Debug for KeystreamGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystreamGenerator")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
