//! Host-side stand-ins for the kernel pieces the paging subsystem talks to.

#![allow(dead_code)]

use hashbrown::HashMap;
use kernel_info::block::SECTOR_SIZE;
use kernel_info::memory::PAGE_BYTES;
use kernel_vm::{
    BlockDevice, File, FileHandle, IoError, KernelPage, PageAllocator, PageDirectory,
    PageFault, PageFaultErrorCode, Pid, UserAddress, UserPage, VirtualMemory,
};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Logs to stderr; the level comes from `VM_LOG` (default `warn`).
struct StderrLogger {
    max_level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

pub fn init_logger() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let max_level = std::env::var("VM_LOG")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(LevelFilter::Warn);
        let logger: &'static StderrLogger = Box::leak(Box::new(StderrLogger { max_level }));
        if log::set_logger(logger).is_ok() {
            log::set_max_level(max_level);
        }
    });
}

/// A fixed number of real, page-aligned frames.
pub struct PagePool {
    base: *mut u8,
    layout: Layout,
    free: Vec<usize>,
    outstanding: Arc<AtomicUsize>,
}

// SAFETY: the pool exclusively owns its backing allocation.
unsafe impl Send for PagePool {}

impl PagePool {
    pub fn new(frames: usize) -> Self {
        let layout = Layout::from_size_align(frames.max(1) * PAGE_BYTES, PAGE_BYTES).unwrap();
        // SAFETY: layout has a non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null());
        Self {
            base,
            layout,
            free: (0..frames).rev().collect(),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of frames currently handed out.
    pub fn outstanding(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.outstanding)
    }
}

impl PageAllocator for PagePool {
    fn alloc_zeroed(&mut self) -> Option<KernelPage> {
        let index = self.free.pop()?;
        // SAFETY: index is within the allocation.
        let ptr = unsafe { self.base.add(index * PAGE_BYTES) };
        // SAFETY: the frame is free, nobody else points into it.
        unsafe { ptr.write_bytes(0, PAGE_BYTES) };
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Some(KernelPage::from_ptr(ptr))
    }

    fn free(&mut self, page: KernelPage) {
        let offset = page.as_u64() - self.base as u64;
        let index = usize::try_from(offset).unwrap() / PAGE_BYTES;
        assert!(index * PAGE_BYTES < self.layout.size(), "foreign frame {page:?}");
        assert!(!self.free.contains(&index), "double free of {page:?}");
        self.free.push(index);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for PagePool {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.base, self.layout) };
    }
}

#[derive(Debug, Copy, Clone)]
struct Pte {
    frame: KernelPage,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// Why a simulated user access trapped.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Trap {
    NotPresent,
    ReadOnly,
}

/// Software page directory. Clones share the same entries, so a test keeps
/// one handle to play the MMU while the subsystem owns the other.
#[derive(Clone, Default)]
pub struct SoftPageDirectory {
    entries: Arc<Mutex<HashMap<UserPage, Pte>>>,
}

impl SoftPageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` at `addr` the way the CPU would, setting A and D.
    pub fn write(&self, addr: UserAddress, bytes: &[u8]) -> Result<(), Trap> {
        let offset = usize::try_from(addr.page_offset()).unwrap();
        assert!(offset + bytes.len() <= PAGE_BYTES, "access crosses a page");
        let mut entries = self.entries.lock();
        let pte = entries.get_mut(&addr.page()).ok_or(Trap::NotPresent)?;
        if !pte.writable {
            return Err(Trap::ReadOnly);
        }
        pte.accessed = true;
        pte.dirty = true;
        // SAFETY: mapped frames stay allocated while their PTE exists.
        let frame = unsafe { pte.frame.bytes_mut() };
        frame[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Load `len` bytes from `addr`, setting A.
    pub fn read(&self, addr: UserAddress, len: usize) -> Result<Vec<u8>, Trap> {
        let offset = usize::try_from(addr.page_offset()).unwrap();
        assert!(offset + len <= PAGE_BYTES, "access crosses a page");
        let mut entries = self.entries.lock();
        let pte = entries.get_mut(&addr.page()).ok_or(Trap::NotPresent)?;
        pte.accessed = true;
        // SAFETY: mapped frames stay allocated while their PTE exists.
        let frame = unsafe { pte.frame.bytes_mut() };
        Ok(frame[offset..offset + len].to_vec())
    }

    pub fn mapped_pages(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_writable(&self, page: UserPage) -> Option<bool> {
        self.entries.lock().get(&page).map(|pte| pte.writable)
    }
}

impl PageDirectory for SoftPageDirectory {
    fn map(&mut self, upage: UserPage, kpage: KernelPage, writable: bool) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&upage) {
            return false;
        }
        entries.insert(
            upage,
            Pte {
                frame: kpage,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        true
    }

    fn unmap(&mut self, upage: UserPage) -> bool {
        self.entries.lock().remove(&upage).is_some_and(|pte| pte.dirty)
    }

    fn translate(&self, upage: UserPage) -> Option<KernelPage> {
        self.entries.lock().get(&upage).map(|pte| pte.frame)
    }

    fn is_accessed(&self, upage: UserPage) -> bool {
        self.entries.lock().get(&upage).is_some_and(|pte| pte.accessed)
    }

    fn set_accessed(&mut self, upage: UserPage, accessed: bool) {
        if let Some(pte) = self.entries.lock().get_mut(&upage) {
            pte.accessed = accessed;
        }
    }
}

/// RAM-backed block device counting its transfers.
#[derive(Clone)]
pub struct RamDisk {
    sectors: Arc<Mutex<Vec<[u8; SECTOR_SIZE]>>>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl RamDisk {
    pub fn with_slots(slots: usize) -> Self {
        Self {
            sectors: Arc::new(Mutex::new(vec![
                [0; SECTOR_SIZE];
                slots * kernel_info::block::SECTORS_PER_PAGE
            ])),
            reads: Arc::default(),
            writes: Arc::default(),
        }
    }

    pub fn sector_reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn sector_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> u64 {
        self.sectors.lock().len() as u64
    }

    fn read_sector(&self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), IoError> {
        let sectors = self.sectors.lock();
        let index = usize::try_from(sector).map_err(|_| IoError::OutOfRange(sector))?;
        *buf = *sectors.get(index).ok_or(IoError::OutOfRange(sector))?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_sector(&self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), IoError> {
        let mut sectors = self.sectors.lock();
        let index = usize::try_from(sector).map_err(|_| IoError::OutOfRange(sector))?;
        *sectors.get_mut(index).ok_or(IoError::OutOfRange(sector))? = *buf;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory file; clones and reopened handles share contents and counters.
#[derive(Clone)]
pub struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl MemFile {
    pub fn new(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(Mutex::new(contents.into())),
            reads: Arc::default(),
            writes: Arc::default(),
        }
    }

    pub fn handle(&self) -> FileHandle {
        Arc::new(self.clone())
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl File for MemFile {
    fn length(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        let data = self.data.lock();
        let start = usize::try_from(offset).map_err(|_| IoError::File)?.min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, IoError> {
        let mut data = self.data.lock();
        let start = usize::try_from(offset).map_err(|_| IoError::File)?.min(data.len());
        let n = buf.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    fn reopen(&self) -> FileHandle {
        self.handle()
    }
}

/// A subsystem instance plus handles on its collaborators.
pub struct Harness {
    pub vm: VirtualMemory,
    pub disk: RamDisk,
    pub frames_out: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(frames: usize, swap_slots: usize) -> Self {
        init_logger();
        let pool = PagePool::new(frames);
        let frames_out = pool.outstanding();
        let disk = RamDisk::with_slots(swap_slots);
        let vm = VirtualMemory::new(Box::new(pool), Box::new(disk.clone()));
        Self {
            vm,
            disk,
            frames_out,
        }
    }

    /// Register `pid` and return its MMU handle.
    pub fn spawn(&self, pid: u32) -> Process<'_> {
        let pid = Pid::new(pid);
        let mmu = SoftPageDirectory::new();
        self.vm.register_process(pid, Box::new(mmu.clone()));
        Process {
            vm: &self.vm,
            pid,
            mmu,
            rsp: UserAddress::new(kernel_info::memory::USER_STACK_TOP),
        }
    }

    pub fn frames_out(&self) -> usize {
        self.frames_out.load(Ordering::SeqCst)
    }
}

/// A user process as seen from its own thread.
pub struct Process<'a> {
    pub vm: &'a VirtualMemory,
    pub pid: Pid,
    pub mmu: SoftPageDirectory,
    pub rsp: UserAddress,
}

impl Process<'_> {
    /// User-mode store: retry through the fault handler until it sticks.
    pub fn store(&self, addr: UserAddress, bytes: &[u8]) -> Result<(), PageFault> {
        loop {
            match self.mmu.write(addr, bytes) {
                Ok(()) => return Ok(()),
                Err(Trap::NotPresent) => self.vm.handle_fault(
                    self.pid,
                    addr,
                    self.rsp,
                    PageFaultErrorCode::not_present(true),
                )?,
                Err(Trap::ReadOnly) => self.vm.handle_fault(
                    self.pid,
                    addr,
                    self.rsp,
                    PageFaultErrorCode::not_present(true).with_present(true),
                )?,
            }
        }
    }

    /// User-mode load of `len` bytes.
    pub fn load(&self, addr: UserAddress, len: usize) -> Result<Vec<u8>, PageFault> {
        loop {
            match self.mmu.read(addr, len) {
                Ok(bytes) => return Ok(bytes),
                Err(_) => self.vm.handle_fault(
                    self.pid,
                    addr,
                    self.rsp,
                    PageFaultErrorCode::not_present(false),
                )?,
            }
        }
    }

    pub fn page(&self, addr: u64) -> UserPage {
        UserAddress::new(addr).page()
    }
}

pub fn addr(v: u64) -> UserAddress {
    UserAddress::new(v)
}
