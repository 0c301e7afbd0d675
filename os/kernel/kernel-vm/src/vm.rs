//! # Virtual Memory Façade
//!
//! [`VirtualMemory`] owns the global paging state (frame table, swap store,
//! process registry and the file-system lock) and exposes the operations the
//! rest of the kernel calls: process registration, lazy page declaration for
//! the loader, `mmap`/`munmap`, page-fault resolution and teardown.
//!
//! ## Lock order
//!
//! ```text
//! frame table → process → swap bitmap → file system
//! ```
//!
//! The registry lock is leaf-only. No path takes the frame-table lock while
//! holding a process lock.

use crate::addresses::{KernelPage, UserAddress, UserPage};
use crate::error::{MapError, SptError};
use crate::file::{FileHandle, FileSpan, FsLock};
use crate::frame::FrameTable;
use crate::hal::{BlockDevice, PageAllocator, PageDirectory};
use crate::mmap::{MapId, MmapPage};
use crate::process::{Pid, ProcessRegistry, ProcessVm};
use crate::spt::{PageRecord, PageStatus};
use crate::swap::SwapStore;
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_info::memory::{PAGE_BYTES, PAGE_SIZE, USER_SPACE_END, USER_STACK_TOP};
use spin::Mutex;

/// Global paging state.
pub struct VirtualMemory {
    pub(crate) frames: Mutex<FrameTable>,
    pub(crate) swap: SwapStore,
    pub(crate) processes: ProcessRegistry,
    pub(crate) fs: FsLock,
}

/// Snapshot of the subsystem's bookkeeping, see
/// [`VirtualMemory::accounting`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Accounting {
    /// Live processes.
    pub processes: usize,
    /// Frame-table entries.
    pub frames: usize,
    /// SPT entries with status `Loaded`, over all processes.
    pub loaded: usize,
    /// SPT entries with status `Swapped`, over all processes.
    pub swapped: usize,
    /// SPT entries with status `Mmapped`, over all processes.
    pub mmapped: usize,
    /// Occupied swap slots.
    pub swap_used: usize,
    /// Total swap slots.
    pub swap_capacity: usize,
}

impl VirtualMemory {
    /// Build the subsystem over the kernel's user-frame allocator and the
    /// swap partition.
    #[must_use]
    pub fn new(allocator: Box<dyn PageAllocator>, swap_device: Box<dyn BlockDevice>) -> Self {
        let vm = Self {
            frames: Mutex::new(FrameTable::new(allocator)),
            swap: SwapStore::new(swap_device),
            processes: ProcessRegistry::default(),
            fs: FsLock::new(()),
        };
        log::info!("vm: demand paging ready ({} swap slots)", vm.swap.capacity());
        vm
    }

    /// The global file-system lock, shared with the syscall layer.
    #[must_use]
    pub const fn fs_lock(&self) -> &FsLock {
        &self.fs
    }

    /// The swap store.
    #[must_use]
    pub const fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// Create the paging state of a new process.
    ///
    /// # Panics
    /// If `pid` is already registered.
    pub fn register_process(&self, pid: Pid, page_dir: Box<dyn PageDirectory>) {
        self.processes.insert(pid, page_dir);
        log::info!("vm: {pid} registered");
    }

    /// Map a zeroed page just below [`USER_STACK_TOP`] and return the initial
    /// stack pointer.
    ///
    /// # Panics
    /// If the stack page is already declared.
    pub fn setup_stack(&self, pid: Pid) -> UserAddress {
        let top = UserAddress::new(USER_STACK_TOP);
        let page = UserAddress::new(USER_STACK_TOP - PAGE_SIZE).page();
        self.page_in_zeroed(pid, page, true);
        log::debug!("vm: {pid} stack at {page}");
        top
    }

    /// Declare a lazily loaded executable page. A zero-length span declares
    /// a zero-fill page instead.
    ///
    /// # Errors
    /// [`SptError::AlreadyPresent`] if `page` is already declared.
    pub fn register_lazy_page(
        &self,
        pid: Pid,
        page: UserPage,
        span: FileSpan,
        writable: bool,
    ) -> Result<(), SptError> {
        let record = if span.length == 0 {
            PageRecord::zeroed(writable)
        } else {
            PageRecord::in_filesys(span, writable)
        };
        self.processes.get(pid).lock().spt.insert(page, record)
    }

    /// Declare an anonymous zero-fill page.
    ///
    /// # Errors
    /// [`SptError::AlreadyPresent`] if `page` is already declared.
    pub fn register_zero_page(
        &self,
        pid: Pid,
        page: UserPage,
        writable: bool,
    ) -> Result<(), SptError> {
        self.processes
            .get(pid)
            .lock()
            .spt
            .insert(page, PageRecord::zeroed(writable))
    }

    /// Declare every page of a loadable segment: `read_bytes` bytes from
    /// `file` at `offset` followed by `zero_bytes` zero bytes, starting at
    /// `start`. Nothing is declared if any page is already taken.
    ///
    /// # Errors
    /// [`SptError::AlreadyPresent`] for the first page already declared.
    ///
    /// # Panics
    /// If the segment does not cover a whole number of pages.
    #[allow(clippy::too_many_arguments)]
    pub fn register_segment(
        &self,
        pid: Pid,
        file: &FileHandle,
        offset: u64,
        start: UserPage,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), SptError> {
        let total = read_bytes + zero_bytes;
        assert!(
            total.is_multiple_of(PAGE_BYTES),
            "segment of {total} bytes is not page sized"
        );

        let mut records = Vec::with_capacity(total / PAGE_BYTES);
        let mut remaining = read_bytes;
        let mut file_offset = offset;
        for n in 0..total / PAGE_BYTES {
            let Some(page) = start.checked_add(n as u64) else {
                panic!("segment at {start} wraps the address space");
            };
            let length = remaining.min(PAGE_BYTES);
            let span = FileSpan::new(file.clone(), file_offset, length);
            let record = if length == 0 {
                PageRecord::zeroed(writable)
            } else {
                PageRecord::in_filesys(span, writable)
            };
            records.push((page, record));
            remaining -= length;
            file_offset += length as u64;
        }

        let process = self.processes.get(pid);
        let mut vm = process.lock();
        if let Some((page, _)) = records.iter().find(|(p, _)| vm.spt.contains(*p)) {
            return Err(SptError::AlreadyPresent(*page));
        }
        let pages = records.len();
        for (page, record) in records {
            vm.spt.insert(page, record)?;
        }
        log::debug!("vm: {pid} segment at {start}, {pages} pages");
        Ok(())
    }

    /// Map `file` at `addr`. The whole file is mapped, the tail of the last
    /// page reads as zero and is never written back.
    ///
    /// # Errors
    /// See [`MapError`]; on error nothing is mapped.
    pub fn map(
        &self,
        pid: Pid,
        file: &FileHandle,
        addr: UserAddress,
        writable: bool,
    ) -> Result<MapId, MapError> {
        if addr.as_u64() == 0 {
            return Err(MapError::NullAddress);
        }
        if !addr.is_page_aligned() {
            return Err(MapError::Misaligned(addr));
        }

        let (length, file) = {
            let _fs = self.fs.lock();
            (file.length(), file.reopen())
        };
        if length == 0 {
            return Err(MapError::EmptyFile);
        }
        let end = addr.as_u64().checked_add(length);
        if !addr.is_user() || end.is_none_or(|end| end > USER_SPACE_END) {
            return Err(MapError::OutOfUserSpace);
        }

        let start = addr.page();
        let count = length.div_ceil(PAGE_SIZE);
        let pages: Vec<UserPage> = (0..count).filter_map(|n| start.checked_add(n)).collect();

        let process = self.processes.get(pid);
        let mut vm = process.lock();
        if let Some(page) = pages.iter().find(|p| vm.spt.contains(**p)) {
            return Err(MapError::Overlap(*page));
        }

        let map_id = vm.mmap.next_id();
        for (n, page) in (0u64..).zip(pages.iter().copied()) {
            let offset = n * PAGE_SIZE;
            let span_len = (length - offset).min(PAGE_SIZE);
            #[allow(clippy::cast_possible_truncation)]
            let span = FileSpan::new(file.clone(), offset, span_len as usize);
            vm.spt
                .insert(page, PageRecord::mmapped(writable))
                .unwrap_or_else(|e| panic!("{e}"));
            vm.mmap.insert(page, MmapPage { map_id, span });
        }
        log::debug!("vm: {pid} mmap {map_id} at {addr}, {count} pages");
        Ok(map_id)
    }

    /// Remove mapping `map_id`, writing dirty resident pages back first.
    ///
    /// # Errors
    /// [`MapError::UnknownMapping`] if the process has no such mapping.
    pub fn unmap(&self, pid: Pid, map_id: MapId) -> Result<(), MapError> {
        let mut frames = self.frames.lock();
        let process = self.processes.get(pid);
        let mut vm = process.lock();
        if vm.mmap.region(map_id).is_empty() {
            return Err(MapError::UnknownMapping(map_id));
        }
        self.flush_region(&mut frames, &mut vm, map_id);
        log::debug!("vm: {pid} munmap {map_id}");
        Ok(())
    }

    /// Tear down all paging state of `pid`: flush and remove its mappings,
    /// free its frames and swap slots, and forget the process.
    ///
    /// # Panics
    /// If `pid` is not registered, or if one of its frames is still pinned.
    pub fn destroy_all(&self, pid: Pid) {
        {
            let mut frames = self.frames.lock();
            let process = self.processes.get(pid);
            let mut guard = process.lock();
            let vm = &mut *guard;

            for map_id in vm.mmap.map_ids() {
                self.flush_region(&mut frames, vm, map_id);
            }

            let ProcessVm {
                spt, page_dir, swap, ..
            } = vm;
            spt.destroy(|page| {
                let kpage = resident_frame(&frames, &**page_dir, pid, page);
                frames.release(kpage, &mut **page_dir);
            });
            self.swap.release_all(swap);
        }
        self.processes.remove(pid);
        log::info!("vm: {pid} destroyed");
    }

    /// Write back and drop every page of region `map_id`.
    fn flush_region(&self, frames: &mut FrameTable, vm: &mut ProcessVm, map_id: MapId) {
        for page in vm.mmap.region(map_id) {
            let Some(entry) = vm.mmap.remove(page) else {
                continue;
            };
            if vm.spt.status(page) == Some(PageStatus::Loaded) {
                let kpage = resident_frame(frames, &*vm.page_dir, vm.pid, page);
                if vm.page_dir.unmap(page) {
                    // SAFETY: frame-table lock held and the frame is not pinned.
                    let bytes = unsafe { kpage.bytes_mut() };
                    entry.span.write_back(&self.fs, bytes);
                }
                frames.release(kpage, &mut *vm.page_dir);
            }
            vm.spt.remove(page);
        }
    }

    /// Status of `page` in process `pid`, if declared.
    ///
    /// # Panics
    /// If `pid` is not registered.
    #[must_use]
    pub fn page_status(&self, pid: Pid, page: UserPage) -> Option<PageStatus> {
        self.processes.get(pid).lock().spt.status(page)
    }

    /// Whether a frame currently backs `page` of `pid`.
    #[must_use]
    pub fn is_resident(&self, pid: Pid, page: UserPage) -> bool {
        let frames = self.frames.lock();
        let Some(process) = self.processes.try_get(pid) else {
            return false;
        };
        let vm = process.lock();
        vm.page_dir
            .translate(page)
            .and_then(|kpage| frames.lookup(kpage))
            .is_some_and(|f| f.owner == pid && f.page == page)
    }

    /// Number of frames in use.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Frames owned by `pid` as `(frame, page)` pairs.
    #[must_use]
    pub fn frames_of(&self, pid: Pid) -> Vec<(KernelPage, UserPage)> {
        self.frames.lock().frames_of(pid)
    }

    /// Consistent snapshot of the bookkeeping counters.
    #[must_use]
    pub fn accounting(&self) -> Accounting {
        let frames = self.frames.lock();
        let processes = self.processes.all();
        let mut acc = Accounting {
            processes: processes.len(),
            frames: frames.len(),
            swap_used: self.swap.used(),
            swap_capacity: self.swap.capacity(),
            ..Accounting::default()
        };
        for process in &processes {
            let vm = process.lock();
            acc.loaded += vm.spt.count(PageStatus::Loaded);
            acc.swapped += vm.spt.count(PageStatus::Swapped);
            acc.mmapped += vm.spt.count(PageStatus::Mmapped);
        }
        acc
    }

    /// Cross-check the frame table, every process's tables and the swap
    /// bitmap against each other. Only meaningful while no fault is in
    /// flight.
    ///
    /// # Panics
    /// On the first inconsistency found.
    pub fn check_invariants(&self) {
        let frames = self.frames.lock();
        let processes = self.processes.all();
        let mut loaded = 0;
        let mut swapped = 0;

        for process in &processes {
            let vm = process.lock();
            loaded += vm.spt.count(PageStatus::Loaded);
            swapped += vm.spt.count(PageStatus::Swapped);

            for page in vm.spt.pages() {
                let status = vm.spt.status(page);
                let slot = vm.swap.get(page);
                assert_eq!(
                    status == Some(PageStatus::Swapped),
                    slot.is_some(),
                    "{} {page}: status {status:?} but swap slot {slot:?}",
                    vm.pid
                );
                if status == Some(PageStatus::Loaded) {
                    let _ = resident_frame(&frames, &*vm.page_dir, vm.pid, page);
                }
                if status == Some(PageStatus::Mmapped) {
                    assert!(vm.mmap.contains(page), "{} {page}: mapped without mmap entry", vm.pid);
                }
            }
            for page in vm.mmap.map_ids().into_iter().flat_map(|id| vm.mmap.region(id)) {
                let status = vm.spt.status(page);
                assert!(
                    matches!(status, Some(PageStatus::Mmapped | PageStatus::Loaded)),
                    "{} {page}: mmap entry but state {status:?}",
                    vm.pid
                );
            }
            for (kpage, page) in frames.frames_of(vm.pid) {
                let status = vm.spt.status(page);
                assert_eq!(
                    status,
                    Some(PageStatus::Loaded),
                    "{kpage} backs {} {page} in state {status:?}",
                    vm.pid
                );
            }
        }

        assert_eq!(loaded, frames.len(), "loaded pages vs frames");
        assert_eq!(swapped, self.swap.used(), "swapped pages vs swap slots");
    }
}

/// Frame mapped at `page` of `pid`, checked against the frame table.
fn resident_frame(
    frames: &FrameTable,
    page_dir: &dyn PageDirectory,
    pid: Pid,
    page: UserPage,
) -> KernelPage {
    let Some(kpage) = page_dir.translate(page) else {
        panic!("loaded page {page} of {pid} is not mapped");
    };
    match frames.lookup(kpage) {
        Some(frame) if frame.owner == pid && frame.page == page => {
            assert!(!frame.pinned, "{kpage} of {pid} is still pinned");
            kpage
        }
        other => panic!("{page} of {pid} maps {kpage} owned by {other:?}"),
    }
}
