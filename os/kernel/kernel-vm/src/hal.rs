//! # Collaborator Interfaces
//!
//! The paging subsystem sits between three pieces of the kernel it does not
//! own: the base physical-page allocator, the per-process hardware page
//! directory and the block-device driver backing swap. Each is consumed
//! through a small trait so the kernel can plug in its real implementation
//! and tests can plug in RAM-backed doubles.

use crate::addresses::{KernelPage, UserPage};
use crate::error::IoError;
use kernel_info::block::SECTOR_SIZE;

/// Base allocator for user frames.
///
/// The implementation decides where frames come from (user pool, buddy
/// allocator, ...). Returned frames **must** be page aligned, zero filled,
/// and dereferenceable through their [`KernelPage`] address until freed.
///
/// Returns `None` when the pool is exhausted; the frame table then evicts.
pub trait PageAllocator: Send {
    /// Allocate one zero-filled frame.
    fn alloc_zeroed(&mut self) -> Option<KernelPage>;

    /// Return a frame obtained from [`alloc_zeroed`](Self::alloc_zeroed).
    fn free(&mut self, page: KernelPage);
}

/// A process's hardware page directory, reduced to what demand paging needs.
///
/// Implementations own TLB maintenance: after [`unmap`](Self::unmap) returns,
/// the next user access to the page must fault.
pub trait PageDirectory: Send {
    /// Install `upage → kpage`. Returns `false` if `upage` is already mapped.
    fn map(&mut self, upage: UserPage, kpage: KernelPage, writable: bool) -> bool;

    /// Remove the mapping for `upage`, if any, and report whether the
    /// removed PTE was dirty.
    ///
    /// Reading D and clearing the PTE must be one step with respect to the
    /// owning process: a store that lands before the unmap is reported, a
    /// store after it faults.
    fn unmap(&mut self, upage: UserPage) -> bool;

    /// Frame currently mapped at `upage`.
    fn translate(&self, upage: UserPage) -> Option<KernelPage>;

    /// Accessed bit of the PTE for `upage`; `false` if unmapped.
    fn is_accessed(&self, upage: UserPage) -> bool;

    fn set_accessed(&mut self, upage: UserPage, accessed: bool);
}

/// Sector-addressed block device, e.g. the swap partition.
///
/// Transfers are synchronous and polled: the calling thread does not yield
/// while a sector moves.
pub trait BlockDevice: Send + Sync {
    /// Number of sectors on the device.
    fn sector_count(&self) -> u64;

    /// # Errors
    /// Returns [`IoError`] if the device reports a failure.
    fn read_sector(&self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), IoError>;

    /// # Errors
    /// Returns [`IoError`] if the device reports a failure.
    fn write_sector(&self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), IoError>;
}
