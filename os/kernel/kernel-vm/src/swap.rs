//! # Swap Store
//!
//! Anonymous pages evicted from memory are written to a swap device, one
//! page per *slot*. A slot is [`SECTORS_PER_PAGE`] consecutive sectors; slot
//! `i` starts at sector `i * SECTORS_PER_PAGE`. Occupancy is tracked in a
//! word bitmap (1 = used) and slots are handed out first-fit.
//!
//! Each process additionally owns a [`SwapTable`] recording which slot holds
//! which of its pages. The paired operations [`SwapStore::swap_out`],
//! [`SwapStore::swap_in`] and [`SwapStore::release_all`] update both under
//! the swap lock, so the bitmap and the tables never disagree.
//!
//! ## Locking
//!
//! The bitmap lock ranks below the process lock: callers hold their process
//! lock (which guards the [`SwapTable`]) when they get here. Device I/O runs
//! under the bitmap lock; the driver polls and does not yield.

use crate::addresses::UserPage;
use crate::hal::BlockDevice;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use hashbrown::HashMap;
use kernel_info::block::{SECTOR_SIZE, SECTORS_PER_PAGE};
use kernel_info::memory::PAGE_BYTES;
use spin::Mutex;

/// Index of a page-sized region on the swap device.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    /// First device sector of this slot.
    #[must_use]
    pub const fn first_sector(self) -> u64 {
        (self.0 * SECTORS_PER_PAGE) as u64
    }
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Per-process map of swapped-out pages to their slots.
#[derive(Debug, Default)]
pub struct SwapTable {
    slots: HashMap<UserPage, SwapSlot>,
}

impl SwapTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, page: UserPage) -> Option<SwapSlot> {
        self.slots.get(&page).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Occupancy bitmap, one bit per slot.
struct SlotBitmap {
    words: Vec<u64>,
    capacity: usize,
    used: usize,
}

impl SlotBitmap {
    fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            capacity,
            used: 0,
        }
    }

    fn allocate(&mut self) -> Option<SwapSlot> {
        if self.used == self.capacity {
            return None;
        }
        let (w, word) = self
            .words
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;
        let bit = word.trailing_ones() as usize;
        let index = w * 64 + bit;
        if index >= self.capacity {
            return None;
        }
        *word |= 1 << bit;
        self.used += 1;
        Some(SwapSlot(index))
    }

    fn free(&mut self, slot: SwapSlot) {
        assert!(slot.0 < self.capacity, "{slot} is beyond the swap device");
        let (w, bit) = (slot.0 / 64, slot.0 % 64);
        let mask = 1u64 << bit;
        assert!(self.words[w] & mask != 0, "double free of swap {slot}");
        self.words[w] &= !mask;
        self.used -= 1;
    }
}

/// Global slot allocator over the swap device.
pub struct SwapStore {
    device: Box<dyn BlockDevice>,
    bitmap: Mutex<SlotBitmap>,
}

impl SwapStore {
    /// Wrap `device`; every whole page of it becomes a slot.
    #[must_use]
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        let sectors = usize::try_from(device.sector_count()).unwrap_or(usize::MAX);
        let capacity = sectors / SECTORS_PER_PAGE;
        log::info!("swap: {capacity} slots on a {sectors}-sector device");
        Self {
            device,
            bitmap: Mutex::new(SlotBitmap::new(capacity)),
        }
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bitmap.lock().capacity
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn used(&self) -> usize {
        self.bitmap.lock().used
    }

    /// Claim the lowest free slot, or `None` if the device is full.
    pub fn allocate_slot(&self) -> Option<SwapSlot> {
        let slot = self.bitmap.lock().allocate();
        if let Some(slot) = slot {
            log::trace!("swap: allocated {slot}");
        }
        slot
    }

    /// # Panics
    /// If `slot` is not currently allocated.
    pub fn free_slot(&self, slot: SwapSlot) {
        self.bitmap.lock().free(slot);
        log::trace!("swap: freed {slot}");
    }

    /// Write one page to `slot`.
    ///
    /// # Panics
    /// On device errors.
    pub fn write_out(&self, slot: SwapSlot, page: &[u8; PAGE_BYTES]) {
        for (i, chunk) in page.as_chunks::<SECTOR_SIZE>().0.iter().enumerate() {
            let sector = slot.first_sector() + i as u64;
            if let Err(e) = self.device.write_sector(sector, chunk) {
                panic!("swap write to {slot} failed: {e}");
            }
        }
    }

    /// Read one page from `slot` into `buf`.
    ///
    /// # Panics
    /// On device errors.
    pub fn read_in(&self, slot: SwapSlot, buf: &mut [u8; PAGE_BYTES]) {
        for (i, chunk) in buf.as_chunks_mut::<SECTOR_SIZE>().0.iter_mut().enumerate() {
            let sector = slot.first_sector() + i as u64;
            if let Err(e) = self.device.read_sector(sector, chunk) {
                panic!("swap read from {slot} failed: {e}");
            }
        }
    }

    /// Move `bytes` (the contents of `page`) to a fresh slot and record it.
    ///
    /// # Panics
    /// If the swap device is full, or if `page` already owns a slot.
    pub fn swap_out(
        &self,
        table: &mut SwapTable,
        page: UserPage,
        bytes: &[u8; PAGE_BYTES],
    ) -> SwapSlot {
        let mut bitmap = self.bitmap.lock();
        let Some(slot) = bitmap.allocate() else {
            panic!("swap space exhausted ({} slots)", bitmap.capacity);
        };
        self.write_out(slot, bytes);
        let previous = table.slots.insert(page, slot);
        assert!(previous.is_none(), "{page} swapped out twice");
        log::trace!("swap: {page} -> {slot}");
        slot
    }

    /// Read `page` back from its slot into `buf`, then free the slot.
    ///
    /// # Panics
    /// If `page` has no slot.
    pub fn swap_in(&self, table: &mut SwapTable, page: UserPage, buf: &mut [u8; PAGE_BYTES]) {
        let mut bitmap = self.bitmap.lock();
        let Some(slot) = table.slots.remove(&page) else {
            panic!("{page} has no swap slot");
        };
        self.read_in(slot, buf);
        bitmap.free(slot);
        log::trace!("swap: {page} <- {slot}");
    }

    /// Free every slot recorded in `table`.
    pub fn release_all(&self, table: &mut SwapTable) {
        let mut bitmap = self.bitmap.lock();
        for (_, slot) in table.slots.drain() {
            bitmap.free(slot);
        }
    }
}

impl fmt::Debug for SwapStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bitmap = self.bitmap.lock();
        f.debug_struct("SwapStore")
            .field("capacity", &bitmap.capacity)
            .field("used", &bitmap.used)
            .finish_non_exhaustive()
    }
}
