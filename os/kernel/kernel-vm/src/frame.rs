//! # Frame Table
//!
//! Global record of every physical frame currently holding a user page.
//! Frames come from the kernel's [`PageAllocator`]; when it runs dry the
//! table evicts a victim (see [`crate::evict`]) and retries once.
//!
//! Each frame remembers its owner only by [`Pid`] and the [`UserPage`] it
//! backs. Besides the address-keyed map the table keeps the *clock ring*,
//! the order in which eviction sweeps over frames.
//!
//! ## Pinning
//!
//! A freshly acquired frame is **pinned**: it is in the table but not yet
//! filled or mapped, and its owner's SPT entry does not say `Loaded` yet.
//! Eviction never picks a pinned frame. The fault path unpins once the page
//! is installed.

use crate::addresses::{KernelPage, UserPage};
use crate::hal::{PageAllocator, PageDirectory};
use crate::process::Pid;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use hashbrown::HashMap;

/// One frame-table entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Frame {
    pub owner: Pid,
    pub page: UserPage,
    pub pinned: bool,
}

pub struct FrameTable {
    frames: HashMap<KernelPage, Frame>,
    ring: Vec<KernelPage>,
    hand: usize,
    allocator: Box<dyn PageAllocator>,
}

impl FrameTable {
    #[must_use]
    pub fn new(allocator: Box<dyn PageAllocator>) -> Self {
        Self {
            frames: HashMap::new(),
            ring: Vec::new(),
            hand: 0,
            allocator,
        }
    }

    /// Get a zeroed frame for `page` of `owner`, evicting once if the
    /// allocator is empty. The frame is returned pinned.
    ///
    /// # Panics
    /// If no frame is available even after eviction.
    pub fn acquire(
        &mut self,
        owner: Pid,
        page: UserPage,
        evict: impl FnOnce(&mut Self),
    ) -> KernelPage {
        let kpage = if let Some(kpage) = self.allocator.alloc_zeroed() {
            kpage
        } else {
            evict(self);
            self.allocator
                .alloc_zeroed()
                .unwrap_or_else(|| panic!("out of frames after eviction"))
        };

        let previous = self.frames.insert(
            kpage,
            Frame {
                owner,
                page,
                pinned: true,
            },
        );
        assert!(previous.is_none(), "allocator handed out live frame {kpage}");
        self.ring.push(kpage);
        log::trace!("frame: {kpage} -> {owner} {page} (pinned)");
        kpage
    }

    /// Make `kpage` eligible for eviction again.
    ///
    /// # Panics
    /// If `kpage` is not in the table.
    pub fn unpin(&mut self, kpage: KernelPage) {
        let Some(frame) = self.frames.get_mut(&kpage) else {
            panic!("unpin of unknown frame {kpage}");
        };
        frame.pinned = false;
    }

    /// Remove `kpage` from the table, unmap it from its owner and give it
    /// back to the allocator.
    ///
    /// # Panics
    /// If `kpage` is not in the table.
    pub fn release(&mut self, kpage: KernelPage, page_dir: &mut dyn PageDirectory) -> Frame {
        let Some(frame) = self.frames.remove(&kpage) else {
            panic!("release of unknown frame {kpage}");
        };
        let slot = self
            .ring
            .iter()
            .position(|k| *k == kpage)
            .unwrap_or_else(|| panic!("frame {kpage} missing from clock ring"));
        self.ring.remove(slot);
        if slot < self.hand {
            self.hand -= 1;
        }
        if self.hand >= self.ring.len() {
            self.hand = 0;
        }

        // Already unmapped when the caller needed the dirty bit.
        let _ = page_dir.unmap(frame.page);
        self.allocator.free(kpage);
        log::trace!("frame: released {kpage} of {} {}", frame.owner, frame.page);
        frame
    }

    #[must_use]
    pub fn lookup(&self, kpage: KernelPage) -> Option<&Frame> {
        self.frames.get(&kpage)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames owned by `pid` as `(frame, page)` pairs, ordered by page.
    #[must_use]
    pub fn frames_of(&self, pid: Pid) -> Vec<(KernelPage, UserPage)> {
        let mut frames: Vec<_> = self
            .frames
            .iter()
            .filter(|(_, f)| f.owner == pid)
            .map(|(k, f)| (*k, f.page))
            .collect();
        frames.sort_unstable_by_key(|(_, page)| *page);
        frames
    }

    /// Frames in clock order, starting at the hand.
    pub(crate) fn clock(&mut self) -> (&[KernelPage], &mut usize, &HashMap<KernelPage, Frame>) {
        (&self.ring, &mut self.hand, &self.frames)
    }
}

impl fmt::Debug for FrameTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTable")
            .field("frames", &self.frames.len())
            .field("hand", &self.hand)
            .finish_non_exhaustive()
    }
}
