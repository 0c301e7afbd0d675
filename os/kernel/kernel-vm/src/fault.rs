//! # Page Fault Resolution
//!
//! Entry point for user page faults. The interrupt handler decodes CR2, the
//! saved user stack pointer and the #PF error code and hands them to
//! [`VirtualMemory::handle_fault`], which either makes the page resident or
//! reports why it cannot.
//!
//! ## Decision order
//!
//! 1. Address outside user space: segmentation fault.
//! 2. Page present (protection violation on a mapped page): protection fault.
//! 3. No SPT entry: grow the stack if the access looks like a push below
//!    the stack pointer, otherwise segmentation fault.
//! 4. Entry is already `Loaded`: protection fault.
//! 5. Write to a read-only page: protection fault.
//! 6. Otherwise page in.
//!
//! ## Page-in protocol
//!
//! The SPT record is read under the process lock, which is then dropped so
//! that the frame table can be locked (frame lock ranks above process locks).
//! The new frame comes back pinned and is filled with no table lock held.
//! The process lock is re-taken to finish a swap-in, install the mapping
//! and mark the page `Loaded`; the frame is unpinned last.

use crate::addresses::{KernelPage, UserAddress, UserPage};
use crate::error::PageFault;
use crate::file::FileSpan;
use crate::process::{Pid, ProcessHandle};
use crate::spt::{PageRecord, PageStatus};
use crate::vm::VirtualMemory;
use bitfield_struct::bitfield;
use kernel_info::memory::{STACK_ACCESS_SLACK, USER_STACK_LIMIT, USER_STACK_TOP};

/// Page-fault error code layout (x86-64).
///
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultErrorCode {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool, // bit 0

    /// 0 = read or execute, 1 = write.
    pub write: bool, // bit 1

    /// 1 = access from user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation.
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access.
    pub shadow_stack: bool, // bit 6

    #[bits(57)]
    __: u64,
}

impl PageFaultErrorCode {
    /// Error code of a user-mode access to a non-present page.
    #[must_use]
    pub const fn not_present(write: bool) -> Self {
        Self::new().with_user(true).with_write(write)
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "non-present page"
        } else if self.instruction_fetch() {
            "instruction fetch on protected page"
        } else if self.write() {
            "write access to protected page"
        } else {
            "read access to protected page"
        }
    }
}

/// Whether an access to `addr` with the stack pointer at `rsp` is the stack
/// growing down.
///
/// The address must lie in the stack window below [`USER_STACK_TOP`] and no
/// more than [`STACK_ACCESS_SLACK`] bytes below `rsp`.
#[must_use]
pub fn is_stack_access(addr: UserAddress, rsp: UserAddress) -> bool {
    let addr = addr.as_u64();
    (USER_STACK_LIMIT..USER_STACK_TOP).contains(&addr)
        && addr.saturating_add(STACK_ACCESS_SLACK) >= rsp.as_u64()
}

/// Where the contents of a page come from on page-in.
enum Fill {
    Zero,
    File(FileSpan),
    Swap,
}

impl VirtualMemory {
    /// Resolve a user page fault of process `pid`.
    ///
    /// # Errors
    /// Returns a [`PageFault`] if the access is illegal; the caller kills
    /// the process.
    ///
    /// # Panics
    /// If `pid` is not registered, or on resource exhaustion and
    /// backing-store errors while paging in.
    pub fn handle_fault(
        &self,
        pid: Pid,
        addr: UserAddress,
        user_rsp: UserAddress,
        code: PageFaultErrorCode,
    ) -> Result<(), PageFault> {
        let result = self.resolve(pid, addr, user_rsp, code);
        match &result {
            Ok(()) => log::debug!("fault: {pid} {addr} resolved"),
            Err(e) => log::warn!("fault: {pid} {e}: {}", code.explain()),
        }
        result
    }

    fn resolve(
        &self,
        pid: Pid,
        addr: UserAddress,
        user_rsp: UserAddress,
        code: PageFaultErrorCode,
    ) -> Result<(), PageFault> {
        let protection = PageFault::Protection {
            addr,
            write: code.write(),
        };
        if !addr.is_user() {
            return Err(PageFault::Segmentation { addr });
        }
        if code.present() {
            return Err(protection);
        }

        let page = addr.page();
        let process = self.processes.get(pid);
        let (record, fill) = {
            let mut vm = process.lock();
            let existing = vm.spt.get(page).cloned();
            let record = match existing {
                Some(record) => record,
                None if is_stack_access(addr, user_rsp) => {
                    let record = PageRecord::zeroed(true);
                    vm.spt
                        .insert(page, record.clone())
                        .unwrap_or_else(|e| panic!("{e}"));
                    log::debug!("fault: {pid} stack grows to {page}");
                    record
                }
                None => return Err(PageFault::Segmentation { addr }),
            };
            let fill = match record.status() {
                PageStatus::Loaded => return Err(protection),
                PageStatus::Zeroed => Fill::Zero,
                PageStatus::Swapped => Fill::Swap,
                PageStatus::InFilesys => match record.file() {
                    Some(span) => Fill::File(span.clone()),
                    None => panic!("executable page {page} of {pid} has no file"),
                },
                PageStatus::Mmapped => match vm.mmap.get(page) {
                    Some(entry) => Fill::File(entry.span.clone()),
                    None => panic!("mapped page {page} of {pid} has no mmap entry"),
                },
            };
            (record, fill)
        };

        if code.write() && !record.writable() {
            return Err(protection);
        }

        self.page_in(pid, &process, page, record.writable(), &fill);
        Ok(())
    }

    /// Bring `page` of `pid` into a fresh frame and map it.
    fn page_in(
        &self,
        pid: Pid,
        process: &ProcessHandle,
        page: UserPage,
        writable: bool,
        fill: &Fill,
    ) -> KernelPage {
        let kpage = self
            .frames
            .lock()
            .acquire(pid, page, |frames| self.evict_one(frames));

        // SAFETY: the frame is pinned and not yet mapped; nobody else looks at it.
        let bytes = unsafe { kpage.bytes_mut() };
        if let Fill::File(span) = fill {
            span.fill(&self.fs, bytes);
        }

        {
            let mut vm = process.lock();
            if let Fill::Swap = fill {
                self.swap.swap_in(&mut vm.swap, page, bytes);
            }
            assert!(
                vm.page_dir.map(page, kpage, writable),
                "{page} of {pid} is already mapped"
            );
            vm.spt
                .set_status(page, PageStatus::Loaded)
                .unwrap_or_else(|e| panic!("{e}"));
        }

        self.frames.lock().unpin(kpage);
        log::trace!("fault: {pid} {page} now in {kpage}");
        kpage
    }

    /// Declare `page` as zero-fill and fault it in immediately.
    pub(crate) fn page_in_zeroed(&self, pid: Pid, page: UserPage, writable: bool) {
        let process = self.processes.get(pid);
        process
            .lock()
            .spt
            .insert(page, PageRecord::zeroed(writable))
            .unwrap_or_else(|e| panic!("{e}"));
        self.page_in(pid, &process, page, writable, &Fill::Zero);
    }
}
