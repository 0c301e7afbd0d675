//! # File Backing
//!
//! Executable pages and memory-mapped pages are backed by a region of a file
//! instead of swap. This module defines the file interface the subsystem
//! consumes from the file system and [`FileSpan`], the `(file, offset,
//! length)` triple that describes one page's worth of backing.
//!
//! Every access goes through the global file-system lock ([`FsLock`]) that
//! the syscall layer also takes, so paging I/O never interleaves with a
//! `read`/`write` system call on the same inode.

use crate::error::IoError;
use alloc::sync::Arc;
use core::fmt;
use kernel_info::memory::PAGE_BYTES;

/// Global file-system lock shared with the syscall layer.
pub type FsLock = spin::Mutex<()>;

/// Shared handle to an open file.
pub type FileHandle = Arc<dyn File>;

/// An open file as seen by the paging subsystem.
pub trait File: Send + Sync {
    /// Current length in bytes.
    fn length(&self) -> u64;

    /// Read up to `buf.len()` bytes at `offset`; returns the number read.
    ///
    /// # Errors
    /// Returns [`IoError`] if the underlying storage fails.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError>;

    /// Write `buf` at `offset`; returns the number written. Must not extend
    /// the file beyond its current length.
    ///
    /// # Errors
    /// Returns [`IoError`] if the underlying storage fails.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, IoError>;

    /// A fresh handle onto the same inode that stays valid after the
    /// process closes the descriptor this handle came from.
    fn reopen(&self) -> FileHandle;
}

/// One page's worth of file backing: `length` bytes at `offset`, the rest of
/// the page is zero.
#[derive(Clone)]
pub struct FileSpan {
    pub file: FileHandle,
    pub offset: u64,
    pub length: usize,
}

impl FileSpan {
    /// # Panics
    /// If `length` exceeds one page.
    #[must_use]
    pub fn new(file: FileHandle, offset: u64, length: usize) -> Self {
        assert!(length <= PAGE_BYTES, "file span longer than a page: {length}");
        Self {
            file,
            offset,
            length,
        }
    }

    /// Fill `frame` with the span's bytes and zero the remainder.
    ///
    /// # Panics
    /// On I/O errors or short reads; backing-store failures are fatal.
    pub(crate) fn fill(&self, fs: &FsLock, frame: &mut [u8; PAGE_BYTES]) {
        let (head, tail) = frame.split_at_mut(self.length);
        let read = {
            let _fs = fs.lock();
            self.file.read_at(head, self.offset)
        };
        match read {
            Ok(n) if n == self.length => {}
            Ok(n) => panic!(
                "short read at offset {}: wanted {} bytes, got {n}",
                self.offset, self.length
            ),
            Err(e) => panic!("reading page backing at offset {}: {e}", self.offset),
        }
        tail.fill(0);
    }

    /// Write the span's bytes from `frame` back to the file.
    ///
    /// # Panics
    /// On I/O errors or short writes.
    pub(crate) fn write_back(&self, fs: &FsLock, frame: &[u8; PAGE_BYTES]) {
        let written = {
            let _fs = fs.lock();
            self.file.write_at(&frame[..self.length], self.offset)
        };
        match written {
            Ok(n) if n == self.length => {}
            Ok(n) => panic!(
                "short write at offset {}: wanted {} bytes, wrote {n}",
                self.offset, self.length
            ),
            Err(e) => panic!("writing back page at offset {}: {e}", self.offset),
        }
    }
}

impl fmt::Debug for FileSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSpan")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
