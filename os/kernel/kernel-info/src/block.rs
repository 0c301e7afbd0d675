//! # Block Geometry

use crate::memory::PAGE_BYTES;

/// Size of one block-device sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Number of consecutive sectors holding one page.
pub const SECTORS_PER_PAGE: usize = PAGE_BYTES / SECTOR_SIZE;

const _: () = {
    assert!(PAGE_BYTES.is_multiple_of(SECTOR_SIZE));
    assert!(SECTORS_PER_PAGE > 0);
};
