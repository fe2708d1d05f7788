//! Block device / regular file backend.
//!
//! On Linux the target is opened with `O_DIRECT` so reads come from the
//! device rather than the page cache.  A test pass that reads back its own
//! cached writes would miss exactly the lies it exists to catch.
//!
//! Direct I/O is negotiated, not required: if the open fails with
//! `EINVAL` (tmpfs, some FUSE mounts) or a later transfer does (unaligned
//! tail chunk on a device with a larger logical block), the file is
//! reopened buffered and the transfer retried at the same offset.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::channel::IoChannel;

/// How the target should be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Bypass the page cache where possible.
    #[default]
    Direct,
    Buffered,
}

/// An [`IoChannel`] over a file or block device.
#[derive(Debug)]
pub struct FileChannel {
    file: File,
    path: PathBuf,
    direct: bool,
    position: u64,
}

impl FileChannel {
    /// Open `path` read-write.  The target must already exist.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (file, direct) = match mode {
            OpenMode::Direct => match open_direct(&path) {
                Ok(file) => (file, true),
                Err(e) if is_einval(&e) => {
                    warn!("{}: direct I/O not supported, using buffered I/O", path.display());
                    (open_buffered(&path)?, false)
                }
                Err(e) => return Err(e),
            },
            OpenMode::Buffered => (open_buffered(&path)?, false),
        };
        debug!("opened {} (direct: {direct})", path.display());
        Ok(Self {
            file,
            path,
            direct,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether transfers currently bypass the page cache.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    fn fall_back_to_buffered(&mut self) -> io::Result<()> {
        warn!(
            "{}: direct transfer rejected at offset {}, continuing with buffered I/O",
            self.path.display(),
            self.position
        );
        let mut file = open_buffered(&self.path)?;
        file.seek(SeekFrom::Start(self.position))?;
        self.file = file;
        self.direct = false;
        Ok(())
    }
}

impl IoChannel for FileChannel {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.write_all(buf) {
            Err(e) if self.direct && is_einval(&e) => {
                self.fall_back_to_buffered()?;
                self.file.write_all(buf)?;
            }
            result => result?,
        }
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self.file.read_exact(buf) {
            Err(e) if self.direct && is_einval(&e) => {
                self.fall_back_to_buffered()?;
                self.file.read_exact(buf)?;
            }
            result => result?,
        }
        self.position += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    fn size(&mut self) -> io::Result<u64> {
        // Block devices report zero through metadata; seeking works for both.
        let size = self.file.seek(SeekFrom::End(0))?;
        self.file.seek(SeekFrom::Start(self.position))?;
        Ok(size)
    }
}

// ── internal helpers ──────────────────────────────────────────────────

fn open_buffered(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

#[cfg(target_os = "linux")]
fn open_direct(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
}

#[cfg(not(target_os = "linux"))]
fn open_direct(path: &Path) -> io::Result<File> {
    debug!("direct I/O is only implemented on Linux");
    open_buffered(path)
}

#[cfg(target_os = "linux")]
fn is_einval(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINVAL)
}

#[cfg(not(target_os = "linux"))]
fn is_einval(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AlignedBuffer;

    fn target(len: usize) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(len as u64).unwrap();
        file
    }

    #[test]
    fn size_reports_file_length() {
        let tmp = target(64 * 1024);
        let mut ch = FileChannel::open(tmp.path(), OpenMode::Buffered).unwrap();
        assert_eq!(ch.size().unwrap(), 64 * 1024);
        assert!(!ch.is_direct());
    }

    #[test]
    fn buffered_roundtrip() {
        let tmp = target(8192);
        let mut ch = FileChannel::open(tmp.path(), OpenMode::Buffered).unwrap();
        ch.seek(4096).unwrap();
        assert_eq!(ch.write(&[0x5Au8; 100]).unwrap(), 100);
        ch.flush().unwrap();

        let mut buf = [0u8; 100];
        ch.seek(4096).unwrap();
        ch.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x5A; 100]);
        assert_eq!(std::fs::read(tmp.path()).unwrap()[4096..4196], [0x5A; 100]);
    }

    #[test]
    fn size_does_not_move_the_cursor() {
        let tmp = target(8192);
        let mut ch = FileChannel::open(tmp.path(), OpenMode::Buffered).unwrap();
        ch.seek(1024).unwrap();
        ch.size().unwrap();
        ch.write(&[1u8; 16]).unwrap();
        assert_eq!(std::fs::read(tmp.path()).unwrap()[1024..1040], [1u8; 16]);
    }

    #[test]
    fn direct_mode_works_or_falls_back() {
        // Whether O_DIRECT is honoured depends on the filesystem under the
        // temp dir; either way the data must arrive.
        let tmp = target(16 * 1024);
        let mut ch = FileChannel::open(tmp.path(), OpenMode::Direct).unwrap();

        let mut out = AlignedBuffer::zeroed(4096);
        out.fill(0xC3);
        ch.seek(4096).unwrap();
        ch.write(&out).unwrap();
        // Unaligned tail length.
        ch.write(&out[..100]).unwrap();
        ch.flush().unwrap();

        let mut back = AlignedBuffer::zeroed(4096);
        ch.seek(4096).unwrap();
        ch.read_exact(&mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0xC3));

        let on_disk = std::fs::read(tmp.path()).unwrap();
        assert!(on_disk[4096..8192 + 100].iter().all(|&b| b == 0xC3));
        assert_eq!(on_disk[8192 + 100], 0);
    }

    #[test]
    fn short_read_is_an_error() {
        let tmp = target(1000);
        let mut ch = FileChannel::open(tmp.path(), OpenMode::Buffered).unwrap();
        let mut buf = [0u8; 64];
        ch.seek(980).unwrap();
        let err = ch.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn missing_target_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileChannel::open(dir.path().join("nope"), OpenMode::Buffered).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
