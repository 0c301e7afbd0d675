use crate::addresses::{UserAddress, UserPage};
use crate::mmap::MapId;

/// Failure reported by a [`BlockDevice`](crate::hal::BlockDevice) or a
/// [`File`](crate::file::File).
///
/// Backing-store failures are fatal to the paging subsystem; they are only
/// returned by the collaborator traits so the caller can name the failure
/// when it panics.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum IoError {
    #[error("device error at sector {0}")]
    Device(u64),
    #[error("sector {0} is beyond the end of the device")]
    OutOfRange(u64),
    #[error("file access failed")]
    File,
}

/// A user-facing page fault that could not be resolved.
///
/// The process layer terminates the faulting process; the kernel continues.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageFault {
    #[error("segmentation fault at {addr}")]
    Segmentation { addr: UserAddress },
    #[error("protection violation at {addr} (write: {write})")]
    Protection { addr: UserAddress, write: bool },
}

/// Rejected `mmap`/`munmap` request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("cannot map at the null address")]
    NullAddress,
    #[error("mapping address {0} is not page aligned")]
    Misaligned(UserAddress),
    #[error("cannot map an empty file")]
    EmptyFile,
    #[error("mapping does not fit into user space")]
    OutOfUserSpace,
    #[error("page {0} is already in use")]
    Overlap(UserPage),
    #[error("no mapping with id {0}")]
    UnknownMapping(MapId),
}

/// Misuse of the supplemental page table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SptError {
    #[error("page {0} already has an entry")]
    AlreadyPresent(UserPage),
    #[error("page {0} has no entry")]
    Missing(UserPage),
}

