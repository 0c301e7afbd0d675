//! # Mmap File Table
//!
//! Per-process table of pages that belong to a memory-mapped file. Each page
//! of a mapping is tracked individually, keyed by its [`UserPage`], and
//! carries the [`MapId`] of the region it belongs to.

use crate::addresses::UserPage;
use crate::file::FileSpan;
use alloc::vec::Vec;
use core::fmt;
use hashbrown::HashMap;

/// Identifier of one `mmap` region, unique within its process.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MapId(u32);

impl MapId {
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File backing of one mapped page. Access rights live in the SPT record.
#[derive(Debug, Clone)]
pub struct MmapPage {
    pub map_id: MapId,
    pub span: FileSpan,
}

#[derive(Debug)]
pub struct MmapTable {
    pages: HashMap<UserPage, MmapPage>,
    next_id: u32,
}

impl Default for MmapTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MmapTable {
    /// Region ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            next_id: 1,
        }
    }

    /// Hand out the next region id. Ids are never reused.
    pub const fn next_id(&mut self) -> MapId {
        let id = MapId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Record the backing of `page`, replacing nothing.
    ///
    /// # Panics
    /// If `page` is already part of a mapping; callers check the SPT first.
    pub fn insert(&mut self, page: UserPage, entry: MmapPage) {
        let previous = self.pages.insert(page, entry);
        assert!(previous.is_none(), "page {page} mapped twice");
    }

    #[must_use]
    pub fn get(&self, page: UserPage) -> Option<&MmapPage> {
        self.pages.get(&page)
    }

    #[must_use]
    pub fn contains(&self, page: UserPage) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn remove(&mut self, page: UserPage) -> Option<MmapPage> {
        self.pages.remove(&page)
    }

    /// Pages of region `id` in ascending address order.
    #[must_use]
    pub fn region(&self, id: MapId) -> Vec<UserPage> {
        let mut pages: Vec<_> = self
            .pages
            .iter()
            .filter(|(_, e)| e.map_id == id)
            .map(|(p, _)| *p)
            .collect();
        pages.sort_unstable();
        pages
    }

    /// Ids of all live regions, ascending.
    #[must_use]
    pub fn map_ids(&self) -> Vec<MapId> {
        let mut ids: Vec<_> = self.pages.values().map(|e| e.map_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
