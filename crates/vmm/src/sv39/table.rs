//! Page-table page for Sv39.

use super::{PAGE_SIZE, entry::PageEntry};

/// Number of entries in an Sv39 page table (9-bit index).
pub const ENTRY_COUNT: usize = 512;

/// One Sv39 page-table page: 512 eight-byte entries, exactly one frame.
///
/// Page-table pages live inside frames handed out by the frame allocator and
/// are constructed in place; they are never heap-allocated, because teardown
/// returns the frame to the allocator it came from.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRY_COUNT],
}

impl PageTable {
    /// Clears every entry.
    ///
    /// Freshly allocated frames carry unspecified content, so a table must be
    /// zeroed before the walker may descend into it.
    pub fn zero(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.clear();
        }
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        &mut self.entries[index]
    }

    /// Returns the number of entries in this page table.
    pub const fn len(&self) -> usize {
        ENTRY_COUNT
    }

    /// Returns true if no entry is valid.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_valid())
    }
}

// A page-table page must occupy exactly one frame for the MMU to consume it.
const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE);
const _: () = assert!(core::mem::align_of::<PageTable>() == PAGE_SIZE);
