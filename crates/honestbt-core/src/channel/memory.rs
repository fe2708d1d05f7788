//! In-memory block device with programmable dishonesty.
//!
//! Backs the engine tests and lets a full write+test session run against
//! a device that really does lie, instead of one that is merely simulated
//! to lie:
//!
//! - **wrapping capacity**: reports `size` bytes but physically keeps only
//!   `capacity`, so offsets wrap modulo `capacity`
//! - **dead zone**: accepts writes past `dead_from` and drops them; reads
//!   there return zeros
//! - **injected faults**: FIFO queue of read/write errors and silent
//!   corruption, consumed by the first I/O that touches their offset,
//!   plus flush failures consumed by the next flush

use std::collections::VecDeque;
use std::io;

use crate::channel::IoChannel;

/// Errors returned by device operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DeviceError {
    /// The requested range falls outside the reported size.
    #[error("out of bounds: offset {offset}, len {len}, device size {device_size}")]
    OutOfBounds {
        offset: u64,
        len: u64,
        device_size: u64,
    },

    #[error("injected read error at offset {offset}")]
    InjectedReadError { offset: u64 },

    #[error("injected write error at offset {offset}")]
    InjectedWriteError { offset: u64 },

    #[error("injected flush error")]
    InjectedFlushError,
}

impl From<DeviceError> for io::Error {
    fn from(err: DeviceError) -> Self {
        let kind = match err {
            DeviceError::OutOfBounds { .. } => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// A fault that can be injected into the device.
///
/// Faults are consumed in FIFO order by the first matching operation
/// whose byte range contains `offset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceFault {
    /// Fail the next read touching `offset`.
    ReadError { offset: u64 },
    /// Fail the next write touching `offset`; nothing is stored.
    WriteError { offset: u64 },
    /// Store the next write touching `offset`, then invert `len` bytes
    /// starting at `offset`.
    Corruption { offset: u64, len: usize },
    /// Fail the next flush; the data written so far stays in place.
    FlushError,
}

/// Read/write statistics for a [`MemoryDevice`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub flushes: u64,
}

/// An in-memory device addressed through a cursor.
///
/// # Examples
///
/// ```
/// use honestbt_core::channel::{IoChannel, MemoryDevice};
///
/// // Claims 16 KiB, stores 4 KiB.
/// let mut dev = MemoryDevice::with_capacity(16 * 1024, 4096);
/// dev.seek(4096).unwrap();
/// dev.write(&[0xAA; 16]).unwrap();
///
/// let mut buf = [0u8; 16];
/// dev.seek(0).unwrap();
/// dev.read_exact(&mut buf).unwrap();
/// assert_eq!(buf, [0xAA; 16]);
/// ```
#[derive(Clone, Debug)]
pub struct MemoryDevice {
    data: Vec<u8>,
    size: u64,
    dead_from: Option<u64>,
    cursor: u64,
    faults: VecDeque<DeviceFault>,
    stats: DeviceStats,
}

impl MemoryDevice {
    /// An honest, zero-filled device of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_image(vec![0u8; size])
    }

    /// An honest device pre-loaded with `data`.
    pub fn from_image(data: Vec<u8>) -> Self {
        Self {
            size: data.len() as u64,
            data,
            dead_from: None,
            cursor: 0,
            faults: VecDeque::new(),
            stats: DeviceStats::default(),
        }
    }

    /// A device reporting `size` bytes that physically stores `capacity`.
    pub fn with_capacity(size: u64, capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            data: vec![0u8; capacity],
            size,
            dead_from: None,
            cursor: 0,
            faults: VecDeque::new(),
            stats: DeviceStats::default(),
        }
    }

    /// A device of `size` bytes that silently drops everything at or past
    /// `dead_from`.
    pub fn with_dead_zone(size: usize, dead_from: u64) -> Self {
        let mut dev = Self::new(size);
        dev.dead_from = Some(dead_from);
        dev
    }

    /// Enqueue a fault for a future I/O operation.
    pub fn inject_fault(&mut self, fault: DeviceFault) {
        self.faults.push_back(fault);
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Physical backing store.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Read `buf.len()` bytes at `offset` without moving the cursor.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        let len = buf.len() as u64;
        self.check_bounds(offset, len)?;

        if let Some(idx) = self.find_fault(offset, len, |f| matches!(f, DeviceFault::ReadError { .. })) {
            if let Some(DeviceFault::ReadError { offset }) = self.faults.remove(idx) {
                return Err(DeviceError::InjectedReadError { offset });
            }
        }

        for (i, byte) in buf.iter_mut().enumerate() {
            let logical = offset + i as u64;
            *byte = if self.is_dead(logical) {
                0
            } else {
                self.data[self.locate(logical)]
            };
        }

        self.stats.reads += 1;
        self.stats.bytes_read += len;
        Ok(())
    }

    /// Write `data` at `offset` without moving the cursor.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let len = data.len() as u64;
        self.check_bounds(offset, len)?;

        let mut corruption = None;
        if let Some(idx) = self.find_fault(offset, len, |f| {
            matches!(f, DeviceFault::WriteError { .. } | DeviceFault::Corruption { .. })
        }) {
            match self.faults.remove(idx) {
                Some(DeviceFault::WriteError { offset }) => {
                    return Err(DeviceError::InjectedWriteError { offset });
                }
                Some(DeviceFault::Corruption { offset, len }) => corruption = Some((offset, len)),
                _ => {}
            }
        }

        for (i, &byte) in data.iter().enumerate() {
            let logical = offset + i as u64;
            if !self.is_dead(logical) {
                let idx = self.locate(logical);
                self.data[idx] = byte;
            }
        }

        if let Some((at, corrupt_len)) = corruption {
            let end = (at + corrupt_len as u64).min(offset + len);
            for logical in at..end {
                let idx = self.locate(logical);
                self.data[idx] = !self.data[idx];
            }
        }

        self.stats.writes += 1;
        self.stats.bytes_written += len;
        Ok(())
    }

    // ── internal helpers ──────────────────────────────────────────────

    fn check_bounds(&self, offset: u64, len: u64) -> Result<(), DeviceError> {
        if offset.saturating_add(len) > self.size {
            return Err(DeviceError::OutOfBounds {
                offset,
                len,
                device_size: self.size,
            });
        }
        Ok(())
    }

    /// Index of the first queued fault of the right kind inside
    /// `[offset, offset + len)`.
    fn find_fault(
        &self,
        offset: u64,
        len: u64,
        kind: impl Fn(&DeviceFault) -> bool,
    ) -> Option<usize> {
        self.faults.iter().position(|f| {
            let at = match f {
                DeviceFault::ReadError { offset }
                | DeviceFault::WriteError { offset }
                | DeviceFault::Corruption { offset, .. } => *offset,
                DeviceFault::FlushError => return false,
            };
            kind(f) && at >= offset && at < offset + len
        })
    }

    fn locate(&self, logical: u64) -> usize {
        (logical % self.data.len() as u64) as usize
    }

    fn is_dead(&self, logical: u64) -> bool {
        self.dead_from.is_some_and(|from| logical >= from)
    }
}

impl IoChannel for MemoryDevice {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.cursor = offset;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(self.cursor, buf)?;
        self.cursor += buf.len() as u64;
        Ok(buf.len())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_at(self.cursor, buf)?;
        self.cursor += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(idx) = self.faults.iter().position(|f| *f == DeviceFault::FlushError) {
            self.faults.remove(idx);
            return Err(DeviceError::InjectedFlushError.into());
        }
        self.stats.flushes += 1;
        Ok(())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.size)
    }
}
