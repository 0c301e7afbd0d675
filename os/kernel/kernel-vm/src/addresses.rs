//! # Address Types
//!
//! Thin, zero-cost wrappers that keep user virtual addresses, user pages and
//! kernel frame addresses apart at the type level. All tables in this crate
//! are keyed by one of these types, never by a bare `u64`.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`UserAddress`] | Any byte address in a process's virtual address space. |
//! | [`UserPage`] | A page-aligned user address, the key of every per-process table. |
//! | [`KernelPage`] | The kernel virtual address of a physical frame, the key of the frame table. |

use core::fmt;
use kernel_info::memory::{PAGE_BYTES, PAGE_SIZE, USER_SPACE_END, USER_SPACE_START};

/// Virtual address inside a user process.
///
/// Carries no validity guarantee; use [`UserAddress::is_user`] before trusting it.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UserAddress(u64);

impl UserAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Page that contains this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> UserPage {
        UserPage::containing(self)
    }

    /// Offset of this address within its page.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Whether the address lies in the mappable user range.
    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 >= USER_SPACE_START && self.0 < USER_SPACE_END
    }
}

impl fmt::Debug for UserAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UVA(0x{:016X})", self.0)
    }
}

impl fmt::Display for UserAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Page-aligned base of a user virtual page.
///
/// ### Invariants
/// - The low `PAGE_SHIFT` bits are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UserPage(u64);

impl UserPage {
    /// Page that contains `addr` (aligns down to the page boundary).
    #[inline]
    #[must_use]
    pub const fn containing(addr: UserAddress) -> Self {
        Self(addr.0 & !(PAGE_SIZE - 1))
    }

    /// Page starting exactly at `base`, or `None` if `base` is not aligned.
    #[inline]
    #[must_use]
    pub const fn from_base(base: u64) -> Option<Self> {
        if base & (PAGE_SIZE - 1) == 0 {
            Some(Self(base))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> UserAddress {
        UserAddress(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The page `n` pages above this one, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u64) -> Option<Self> {
        match n.checked_mul(PAGE_SIZE) {
            Some(delta) => match self.0.checked_add(delta) {
                Some(v) => Some(Self(v)),
                None => None,
            },
            None => None,
        }
    }

    /// Whether the whole page lies in the mappable user range.
    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.base().is_user()
    }
}

impl fmt::Debug for UserPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserPage({:#018X})", self.0)
    }
}

impl fmt::Display for UserPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018X}", self.0)
    }
}

/// Kernel virtual address of a physical frame handed out by the base
/// allocator.
///
/// The kernel reaches every frame through its direct map, so a `KernelPage`
/// is directly dereferenceable for [`PAGE_BYTES`] bytes while the frame is
/// allocated.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct KernelPage(u64);

impl KernelPage {
    /// Wraps a frame address.
    ///
    /// # Panics
    /// If `v` is not page aligned; the base allocator only hands out whole frames.
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        assert!(v & (PAGE_SIZE - 1) == 0, "frame address must be page aligned");
        Self(v)
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self::new(ptr as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_mut_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }

    /// Borrow the frame's contents.
    ///
    /// # Safety
    /// - The frame must currently be allocated and reachable at this address.
    /// - The caller must have exclusive access for `'a` (frame pinned or the
    ///   frame table locked), so no other mutable view exists.
    #[inline]
    #[must_use]
    pub unsafe fn bytes_mut<'a>(self) -> &'a mut [u8; PAGE_BYTES] {
        // SAFETY: upheld by the caller, see above.
        unsafe { &mut *self.as_mut_ptr().cast::<[u8; PAGE_BYTES]>() }
    }
}

impl fmt::Debug for KernelPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelPage({:#018X})", self.0)
    }
}

impl fmt::Display for KernelPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018X}", self.0)
    }
}
