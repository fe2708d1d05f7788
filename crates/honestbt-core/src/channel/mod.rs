//! The I/O channel contract and its backends.
//!
//! Engines see the target only through [`IoChannel`]: a cursor over a flat
//! byte range with blocking seek/read/write/flush.  Two backends exist:
//!
//! - [`FileChannel`] — a block device or regular file, opened for direct
//!   (unbuffered) I/O where the platform and target allow it
//! - [`MemoryDevice`] — an in-memory device that can also play a
//!   counterfeit one (wrapping capacity, dead zones, injected faults)

pub mod file;
pub mod memory;

use std::io;

pub use file::{FileChannel, OpenMode};
pub use memory::{DeviceError, DeviceFault, DeviceStats, MemoryDevice};

/// Sequential access to the target byte range.
pub trait IoChannel {
    /// Move the cursor to an absolute offset.
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    /// Write all of `buf` at the cursor and advance it.
    ///
    /// Returns the number of bytes written, which callers expect to equal
    /// `buf.len()` for full and final partial chunks alike.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Fill `buf` from the cursor and advance it, or fail.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Make every prior write durable.
    fn flush(&mut self) -> io::Result<()>;

    /// Total size of the target in bytes.
    fn size(&mut self) -> io::Result<u64>;
}

impl<C: IoChannel + ?Sized> IoChannel for &mut C {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        (**self).seek(offset)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn size(&mut self) -> io::Result<u64> {
        (**self).size()
    }
}
