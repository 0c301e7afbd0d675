//! # Kernel Virtual Memory Configuration
//!
//! This crate is the single source of truth for the constants that shape a
//! user process's virtual address space and the geometry of the backing
//! stores used by demand paging. Every component of the paging subsystem
//! (supplemental page table, frame table, swap store, fault resolver) reads
//! its limits from here so that they cannot drift apart.
//!
//! ## Overview
//!
//! ```text
//! User Virtual Address Space:
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │      Null Guard (unmapped)      │
//! USER_SPACE_START      ├─────────────────────────────────┤ 0x0000_0000_0000_1000
//!                       │  Code, data, mmap regions       │
//!                       │  (lazily paged on first touch)  │
//!                       │               ...               │
//! USER_STACK_TOP        │               ▲                 │
//!   - MAX_STACK_SIZE    ├───────────────┼─────────────────┤
//!                       │  Stack (grows down on demand)   │
//! USER_STACK_TOP        └─────────────────────────────────┘ 0x0000_8000_0000_0000
//! ```
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Page geometry**: page size and shift shared by all tables
//! * **User space bounds**: what counts as a user address at all
//! * **Stack growth**: the window and slack the fault handler uses to tell a
//!   stack access apart from a stray pointer
//!
//! ### Block Geometry ([`block`])
//! * **Sector size**: the unit the block-device driver transfers
//! * **Sectors per page**: how many sectors one swap slot spans
//!
//! ## Compile-Time Validation
//!
//! Relationships between the constants are checked with `const` assertions,
//! so an inconsistent configuration fails the build instead of corrupting
//! page tables at runtime.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod block;
pub mod memory;
