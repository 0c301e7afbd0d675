//! # Per-Process State
//!
//! Everything the paging subsystem knows about one user process lives in a
//! [`ProcessVm`]: its supplemental page table, its mmap table, the swap slots
//! it owns and its hardware page directory. A `ProcessVm` is guarded by its
//! own lock and reached through the [`ProcessRegistry`] by [`Pid`], which is
//! also how frame-table entries refer to their owner.

use crate::hal::PageDirectory;
use crate::mmap::MmapTable;
use crate::spt::SupplementalPageTable;
use crate::swap::SwapTable;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use hashbrown::HashMap;
use spin::Mutex;

/// Process identifier.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u32);

impl Pid {
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Paging state of one process.
pub struct ProcessVm {
    pub(crate) pid: Pid,
    pub(crate) spt: SupplementalPageTable,
    pub(crate) mmap: MmapTable,
    pub(crate) swap: SwapTable,
    pub(crate) page_dir: Box<dyn PageDirectory>,
}

impl ProcessVm {
    pub(crate) fn new(pid: Pid, page_dir: Box<dyn PageDirectory>) -> Self {
        Self {
            pid,
            spt: SupplementalPageTable::new(),
            mmap: MmapTable::new(),
            swap: SwapTable::new(),
            page_dir,
        }
    }
}

impl fmt::Debug for ProcessVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessVm")
            .field("pid", &self.pid)
            .field("pages", &self.spt.len())
            .field("mapped", &self.mmap.len())
            .field("swapped", &self.swap.len())
            .finish_non_exhaustive()
    }
}

pub(crate) type ProcessHandle = Arc<Mutex<ProcessVm>>;

/// Live processes by [`Pid`].
///
/// The registry lock is held only for the map operation itself and never
/// while another lock is taken.
#[derive(Default)]
pub(crate) struct ProcessRegistry {
    processes: Mutex<HashMap<Pid, ProcessHandle>>,
}

impl ProcessRegistry {
    /// # Panics
    /// If `pid` is already registered.
    pub fn insert(&self, pid: Pid, page_dir: Box<dyn PageDirectory>) {
        let handle = Arc::new(Mutex::new(ProcessVm::new(pid, page_dir)));
        let previous = self.processes.lock().insert(pid, handle);
        assert!(previous.is_none(), "{pid} registered twice");
    }

    pub fn try_get(&self, pid: Pid) -> Option<ProcessHandle> {
        self.processes.lock().get(&pid).cloned()
    }

    /// # Panics
    /// If `pid` is not registered.
    pub fn get(&self, pid: Pid) -> ProcessHandle {
        self.try_get(pid)
            .unwrap_or_else(|| panic!("{pid} is not registered"))
    }

    pub fn remove(&self, pid: Pid) -> Option<ProcessHandle> {
        self.processes.lock().remove(&pid)
    }

    /// Snapshot of all live processes.
    pub fn all(&self) -> alloc::vec::Vec<ProcessHandle> {
        self.processes.lock().values().cloned().collect()
    }
}
