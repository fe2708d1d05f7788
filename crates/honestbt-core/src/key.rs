//! AES keys for the keystream.
//!
//! A run uses exactly one key for its whole lifetime.  The key is either
//! supplied by the user (base64 on the command line or in a resume state
//! file) or drawn from an injected random source.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// Supported AES key sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySize {
    Aes128,
    Aes192,
    #[default]
    Aes256,
}

impl KeySize {
    /// Key size for a bit count of 128, 192 or 256.
    pub fn from_bits(bits: u32) -> Result<Self, ConfigError> {
        match bits {
            128 => Ok(KeySize::Aes128),
            192 => Ok(KeySize::Aes192),
            256 => Ok(KeySize::Aes256),
            other => Err(ConfigError::KeyBits(other)),
        }
    }

    /// Key size for a byte length of 16, 24 or 32.
    pub fn from_len(len: usize) -> Result<Self, ConfigError> {
        match len {
            16 => Ok(KeySize::Aes128),
            24 => Ok(KeySize::Aes192),
            32 => Ok(KeySize::Aes256),
            other => Err(ConfigError::KeyLength(other)),
        }
    }

    pub fn len(self) -> usize {
        match self {
            KeySize::Aes128 => 16,
            KeySize::Aes192 => 24,
            KeySize::Aes256 => 32,
        }
    }

    pub fn bits(self) -> u32 {
        self.len() as u32 * 8
    }
}

/// An immutable AES key.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    bytes: Vec<u8>,
}

impl Key {
    /// Wrap raw key bytes, rejecting lengths AES does not accept.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        KeySize::from_len(bytes.len())?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Draw a fresh key of `size` from `rng`.
    pub fn generate<R: RngCore + ?Sized>(size: KeySize, rng: &mut R) -> Self {
        let mut bytes = vec![0u8; size.len()];
        rng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Parse a standard (padded) base64 key.
    pub fn from_base64(encoded: &str) -> Result<Self, ConfigError> {
        let bytes = BASE64_STANDARD.decode(encoded.trim())?;
        Self::from_bytes(&bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> KeySize {
        // Length is checked on construction.
        match self.bytes.len() {
            16 => KeySize::Aes128,
            24 => KeySize::Aes192,
            _ => KeySize::Aes256,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({} bits)", self.size().bits())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Key::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}
