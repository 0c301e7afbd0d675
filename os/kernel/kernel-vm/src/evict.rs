//! # Eviction
//!
//! When the base allocator has no free frame, the frame table asks for one
//! resident page to be pushed out. Victims are chosen with the clock
//! (second-chance) policy:
//!
//! 1. Starting at the hand, skip frames that are pinned.
//! 2. A frame whose accessed bit is set gets the bit cleared and is passed
//!    over once.
//! 3. The first unpinned frame with a clear accessed bit is the victim.
//!
//! Two sweeps always suffice unless every frame is pinned, which is fatal.
//!
//! The victim's contents then go wherever its page lives when not resident:
//!
//! | Page kind | Write-back | New status |
//! |-----------|------------|------------|
//! | anonymous (zero-fill, stack, executable) | swap slot | `Swapped` |
//! | mapped file, dirty | `length` bytes at the file offset | `Mmapped` |
//! | mapped file, clean | none | `Mmapped` |
//!
//! Eviction runs with the frame-table lock held and takes the owner's
//! process lock for the duration of the write-back.

use crate::addresses::{KernelPage, UserPage};
use crate::frame::FrameTable;
use crate::process::ProcessVm;
use crate::spt::PageStatus;
use crate::vm::VirtualMemory;

/// What the clock sees when it looks at a frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Hand {
    Pinned,
    /// Accessed bit was set and has now been cleared.
    SecondChance,
    Victim,
}

/// Advance the clock over `ring` until `inspect` reports a victim.
///
/// `hand` is left pointing at the frame after the victim. Returns `None`
/// after two full sweeps without a victim.
pub(crate) fn select_victim(
    ring: &[KernelPage],
    hand: &mut usize,
    mut inspect: impl FnMut(KernelPage) -> Hand,
) -> Option<KernelPage> {
    if ring.is_empty() {
        return None;
    }
    for _ in 0..2 * ring.len() {
        let kpage = ring[*hand % ring.len()];
        *hand = (*hand + 1) % ring.len();
        if inspect(kpage) == Hand::Victim {
            return Some(kpage);
        }
    }
    None
}

impl VirtualMemory {
    /// Push one resident page out of memory and free its frame.
    ///
    /// # Panics
    /// If every frame is pinned, if the victim's SPT entry is not `Loaded`,
    /// or if swap space is exhausted.
    pub(crate) fn evict_one(&self, frames: &mut FrameTable) {
        let (ring, hand, table) = frames.clock();
        let victim = select_victim(ring, hand, |kpage| {
            let Some(frame) = table.get(&kpage) else {
                panic!("clock ring holds unknown frame {kpage}");
            };
            if frame.pinned {
                return Hand::Pinned;
            }
            let process = self.processes.get(frame.owner);
            let mut vm = process.lock();
            if vm.page_dir.is_accessed(frame.page) {
                vm.page_dir.set_accessed(frame.page, false);
                Hand::SecondChance
            } else {
                Hand::Victim
            }
        })
        .unwrap_or_else(|| panic!("no evictable frame: all {} frames pinned", ring.len()));

        let Some(&frame) = frames.lookup(victim) else {
            unreachable!("victim {victim} vanished from the frame table");
        };
        let process = self.processes.get(frame.owner);
        let mut vm = process.lock();
        let status = self.page_out(&mut vm, victim, frame.page);
        frames.release(victim, &mut *vm.page_dir);
        log::debug!(
            "evict: {} {} from {victim} -> {status:?}",
            frame.owner,
            frame.page
        );
    }

    /// Save the contents of `kpage` (backing `page` of `vm`) and update the
    /// page's status. The frame itself is left for the caller to release.
    fn page_out(&self, vm: &mut ProcessVm, kpage: KernelPage, page: UserPage) -> PageStatus {
        let current = vm.spt.status(page);
        assert!(
            current == Some(PageStatus::Loaded),
            "evicting {page} of {} in state {current:?}",
            vm.pid
        );

        // D comes from the PTE being removed; any later store faults back in.
        let dirty = vm.page_dir.unmap(page);

        // SAFETY: the frame is in the table, the frame-table lock is held and
        // the only user mapping was just removed.
        let bytes = unsafe { kpage.bytes_mut() };
        let status = if let Some(entry) = vm.mmap.get(page) {
            if dirty {
                entry.span.write_back(&self.fs, bytes);
            }
            PageStatus::Mmapped
        } else {
            self.swap.swap_out(&mut vm.swap, page, bytes);
            PageStatus::Swapped
        };
        vm.spt
            .set_status(page, status)
            .unwrap_or_else(|e| panic!("{e}"));
        status
    }
}
