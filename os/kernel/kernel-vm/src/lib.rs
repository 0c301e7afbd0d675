//! # Demand Paging for User Processes
//!
//! This crate is the virtual-memory manager for user processes. Pages are not
//! loaded when a program starts; they are declared lazily and brought in on
//! the first access, from one of three backing sources:
//!
//! * **zero fill** for bss, heap and stack pages,
//! * **files** for executable segments and `mmap`ed regions,
//! * **swap** for anonymous pages that were evicted.
//!
//! When physical memory runs out, a resident page is evicted with the clock
//! policy and its contents go back to where they came from.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Page Fault Resolver                   │
//! │    • Legality checks, stack growth                  │
//! │    • Page-in protocol (pin, fill, map, unpin)       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Frame Table  +  Eviction Engine            │
//! │    • Global frame ownership, clock ring             │
//! │    • Write-back to swap or file                     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │   Per process: SPT · Mmap Table · Swap Table · PD   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │      Swap Store (slot bitmap over a block device)   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Supplemental Page Table ([`spt`])
//! Per-process status of every declared page: zero-fill, in an executable,
//! loaded, mapped-file or swapped.
//!
//! ### Mmap File Table ([`mmap`])
//! Per-process file backing of mapped pages, grouped into regions by
//! [`MapId`](mmap::MapId).
//!
//! ### Frame Table ([`frame`]) and Eviction ([`evict`])
//! Global ownership of physical frames. Frames are pinned while being
//! filled; the clock hand skips them.
//!
//! ### Swap Store ([`swap`])
//! First-fit slot allocation over the swap partition.
//!
//! ### Fault Resolver ([`fault`])
//! Decides whether a fault is legal and pages the contents in.
//!
//! ## Collaborators
//!
//! The kernel plugs in its base frame allocator, per-process page
//! directories and the swap block device through the traits in [`hal`], and
//! open files through [`file::File`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! kernel_vm::init(Box::new(user_pool), Box::new(swap_disk));
//! let vm = kernel_vm::vm();
//!
//! vm.register_process(pid, Box::new(page_dir));
//! let rsp = vm.setup_stack(pid);
//! vm.register_segment(pid, &exe, 0, text_page, 0x2345, 0xcbb, false)?;
//!
//! // from the #PF handler:
//! if let Err(fault) = vm.handle_fault(pid, cr2, user_rsp, code) {
//!     kill(pid, fault);
//! }
//!
//! // on exit:
//! vm.destroy_all(pid);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod addresses;
pub mod error;
pub mod evict;
pub mod fault;
pub mod file;
pub mod frame;
pub mod hal;
pub mod mmap;
pub mod process;
pub mod spt;
pub mod swap;
pub mod vm;

pub use addresses::{KernelPage, UserAddress, UserPage};
pub use error::{IoError, MapError, PageFault, SptError};
pub use fault::PageFaultErrorCode;
pub use file::{File, FileHandle, FileSpan, FsLock};
pub use hal::{BlockDevice, PageAllocator, PageDirectory};
pub use mmap::MapId;
pub use process::Pid;
pub use spt::PageStatus;
pub use vm::{Accounting, VirtualMemory};

use alloc::boxed::Box;
use spin::Once;

static VM: Once<VirtualMemory> = Once::new();

/// Install the global paging subsystem.
///
/// # Panics
/// If called more than once.
pub fn init(
    allocator: Box<dyn PageAllocator>,
    swap_device: Box<dyn BlockDevice>,
) -> &'static VirtualMemory {
    let mut installed = false;
    let vm = VM.call_once(|| {
        installed = true;
        VirtualMemory::new(allocator, swap_device)
    });
    assert!(installed, "virtual memory initialised twice");
    vm
}

/// The global paging subsystem.
///
/// # Panics
/// If [`init`] has not run yet.
#[must_use]
pub fn vm() -> &'static VirtualMemory {
    VM.get()
        .unwrap_or_else(|| panic!("virtual memory used before init"))
}

/// Whether [`init`] has run.
#[must_use]
pub fn is_initialized() -> bool {
    VM.is_completed()
}
