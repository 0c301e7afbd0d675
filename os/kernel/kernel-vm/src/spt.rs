//! # Supplemental Page Table
//!
//! Per-process record of every user page that has ever been declared or
//! faulted in, and where its contents currently live. The hardware page
//! directory only knows about resident pages; this table also knows about
//! pages that are lazily backed by an executable, by a mapped file, by swap,
//! or by nothing at all (zero-fill).
//!
//! ## Status transitions
//!
//! ```text
//!   Zeroed ──┐
//!            ├──fault──▶ Loaded ──evict (anonymous)──▶ Swapped ──fault──┐
//! InFilesys ─┘             ▲  │                                         │
//!                          │  └──evict (mapped file)──▶ Mmapped ──fault─┤
//!                          └────────────────────────────────────────────┘
//! ```
//!
//! A resident page is always [`PageStatus::Loaded`]; whether it is file
//! backed is recorded in the mmap table, not here.

use crate::addresses::UserPage;
use crate::error::SptError;
use crate::file::FileSpan;
use alloc::vec::Vec;
use hashbrown::HashMap;

/// Where a page's contents currently live.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PageStatus {
    /// Not resident; contents are all zero.
    Zeroed,
    /// Not resident; contents come from an executable file.
    InFilesys,
    /// Resident in a frame.
    Loaded,
    /// Not resident; contents are in a mapped file.
    Mmapped,
    /// Not resident; contents are in a swap slot.
    Swapped,
}

/// One entry of the supplemental page table.
#[derive(Debug, Clone)]
pub struct PageRecord {
    status: PageStatus,
    writable: bool,
    file: Option<FileSpan>,
}

impl PageRecord {
    #[must_use]
    pub const fn zeroed(writable: bool) -> Self {
        Self {
            status: PageStatus::Zeroed,
            writable,
            file: None,
        }
    }

    /// Lazily loaded executable page.
    #[must_use]
    pub const fn in_filesys(span: FileSpan, writable: bool) -> Self {
        Self {
            status: PageStatus::InFilesys,
            writable,
            file: Some(span),
        }
    }

    /// Page of a mapped file; the backing lives in the mmap table.
    #[must_use]
    pub const fn mmapped(writable: bool) -> Self {
        Self {
            status: PageStatus::Mmapped,
            writable,
            file: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> PageStatus {
        self.status
    }

    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }

    /// Executable backing of an [`InFilesys`](PageStatus::InFilesys) page.
    #[must_use]
    pub const fn file(&self) -> Option<&FileSpan> {
        self.file.as_ref()
    }
}

/// Per-process map from [`UserPage`] to [`PageRecord`].
#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    entries: HashMap<UserPage, PageRecord>,
}

impl SupplementalPageTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry for `page`.
    ///
    /// # Errors
    /// [`SptError::AlreadyPresent`] if `page` already has an entry; the
    /// existing entry is left untouched.
    pub fn insert(&mut self, page: UserPage, record: PageRecord) -> Result<(), SptError> {
        if self.entries.contains_key(&page) {
            return Err(SptError::AlreadyPresent(page));
        }
        log::trace!("spt: {page} declared as {:?}", record.status);
        self.entries.insert(page, record);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, page: UserPage) -> Option<&PageRecord> {
        self.entries.get(&page)
    }

    #[must_use]
    pub fn status(&self, page: UserPage) -> Option<PageStatus> {
        self.entries.get(&page).map(PageRecord::status)
    }

    #[must_use]
    pub fn contains(&self, page: UserPage) -> bool {
        self.entries.contains_key(&page)
    }

    /// Change the status of an existing entry.
    ///
    /// # Errors
    /// [`SptError::Missing`] if `page` has no entry.
    pub fn set_status(&mut self, page: UserPage, status: PageStatus) -> Result<(), SptError> {
        let record = self.entries.get_mut(&page).ok_or(SptError::Missing(page))?;
        log::trace!("spt: {page} {:?} -> {status:?}", record.status);
        record.status = status;
        Ok(())
    }

    /// Discard the entry for `page`.
    pub fn remove(&mut self, page: UserPage) -> Option<PageRecord> {
        self.entries.remove(&page)
    }

    /// Number of entries with the given status.
    #[must_use]
    pub fn count(&self, status: PageStatus) -> usize {
        self.entries.values().filter(|r| r.status == status).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All pages in ascending address order.
    #[must_use]
    pub fn pages(&self) -> Vec<UserPage> {
        let mut pages: Vec<_> = self.entries.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Pages with the given status, in ascending address order.
    #[must_use]
    pub fn pages_with(&self, status: PageStatus) -> Vec<UserPage> {
        let mut pages: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(p, _)| *p)
            .collect();
        pages.sort_unstable();
        pages
    }

    /// Hand every resident page to `release`, then discard all entries.
    pub fn destroy(&mut self, mut release: impl FnMut(UserPage)) {
        for page in self.pages_with(PageStatus::Loaded) {
            release(page);
        }
        self.entries.clear();
    }
}
