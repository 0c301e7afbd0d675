//! # Memory Layout

/// Size of one page (and of one frame) in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// [`PAGE_SIZE`] as a buffer length.
#[allow(clippy::cast_possible_truncation)]
pub const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// log2([`PAGE_SIZE`]), i.e. the number of in-page offset bits.
pub const PAGE_SHIFT: u32 = 12;

/// Lowest user address that may ever be mapped.
///
/// The page at zero stays unmapped so null dereferences always fault.
pub const USER_SPACE_START: u64 = 0x0000_0000_0000_1000;

/// End of the user VA range (exclusive). Kernel space begins above.
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Initial stack pointer of every process; the first stack page sits just
/// below it.
pub const USER_STACK_TOP: u64 = USER_SPACE_END;

/// Largest stack a process may grow to.
pub const MAX_STACK_SIZE: u64 = 8 * 1024 * 1024;

/// Lowest address the stack may grow down to.
pub const USER_STACK_LIMIT: u64 = USER_STACK_TOP - MAX_STACK_SIZE;

/// How far below the stack pointer an access may land and still count as
/// stack growth (one 32-byte multi-register push).
pub const STACK_ACCESS_SLACK: u64 = 32;

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(USER_SPACE_START.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_TOP.is_multiple_of(PAGE_SIZE));
    assert!(MAX_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_LIMIT > USER_SPACE_START);
    assert!(STACK_ACCESS_SLACK < PAGE_SIZE);
};
