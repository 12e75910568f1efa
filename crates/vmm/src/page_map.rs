//! Page-table walking and mapping.
//!
//! [`PageMap`] owns the root page-table frame of one address space and
//! provides the walker plus the mapping primitives built on it. Page-table
//! pages form a tree: every non-root page is reachable from exactly one
//! parent entry, and every frame in the tree belongs to the allocator the
//! map was built from.
//!
//! Nothing here takes a lock; callers must serialize access to a map.

use core::fmt;

use crate::{
    AddressTranslator, FrameAllocator, FrameNumber, PhysicalAddress, VirtualAddress,
    error::{InvariantViolation, VmError},
    sv39::{MAXVA, PAGE_SIZE, PAGE_TABLE_LEVELS, PageEntry, PageTable, PteFlags},
};

/// Reinterprets a frame as the page table stored in it.
///
/// # Safety
///
/// The caller must hold exclusive access to the page-table tree containing
/// `frame` (see the crate-level concurrency contract) and `frame` must hold a
/// page-table page.
unsafe fn table_mut<'a>(frame: PhysicalAddress) -> &'a mut PageTable {
    let translator = AddressTranslator::current();
    let ptr = translator.phys_to_ptr::<PageTable>(frame.as_usize());
    // SAFETY: per this function's contract the frame holds a table nothing
    // else is touching, and the translator maps it to accessible memory.
    unsafe { &mut *ptr }
}

/// Shared-access variant of [`table_mut`] for read-only traversal.
unsafe fn table_ref<'a>(frame: PhysicalAddress) -> &'a PageTable {
    let translator = AddressTranslator::current();
    let ptr = translator.phys_to_ptr::<PageTable>(frame.as_usize());
    // SAFETY: see table_mut; shared access suffices here.
    unsafe { &*ptr }
}

/// Owning handle to the root page table of one address space.
///
/// Dropping a `PageMap` does not release its frames: teardown needs the
/// frame allocator, so it is explicit ([`PageMap::free_walk`], or
/// [`crate::AddressSpace::destroy`] for user spaces).
pub struct PageMap {
    root: PhysicalAddress,
}

impl PageMap {
    /// Creates an empty map from one zeroed root frame.
    ///
    /// Fails only when the allocator is exhausted.
    pub fn allocate(allocator: &mut dyn FrameAllocator) -> Result<Self, VmError> {
        let root = allocator.allocate_frame().ok_or(VmError::OutOfFrames)?;
        // SAFETY: the frame was just handed out, nothing else references it.
        unsafe { table_mut(root) }.zero();
        Ok(Self { root })
    }

    /// Returns the physical address of the root page-table frame.
    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Walks to the level-0 slot for `va` without creating anything.
    ///
    /// Returns Ok(None) if an intermediate table is missing. A virtual
    /// address at or beyond `MAXVA` is an invariant violation.
    fn walk(&mut self, va: VirtualAddress) -> Result<Option<&mut PageEntry>, VmError> {
        if va.as_usize() >= MAXVA {
            return Err(InvariantViolation::AddressOutOfRange.into());
        }

        // SAFETY: &mut self gives exclusive access to the whole tree.
        let mut table = unsafe { table_mut(self.root) };
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry(va.page_index(level));
            if !entry.is_valid() {
                return Ok(None);
            }
            let child = entry.address().expect("valid entry names a frame");
            // SAFETY: a valid non-leaf entry points at a child table inside
            // the exclusively-held tree.
            table = unsafe { table_mut(child) };
        }
        Ok(Some(table.entry_mut(va.page_index(0))))
    }

    /// Walks to the level-0 slot for `va`, creating intermediate tables.
    ///
    /// Each created table is a fresh zeroed frame installed as a non-leaf
    /// entry (valid, no permission bits). Returns Ok(None) if the allocator
    /// runs dry partway; tables created up to that point stay in place.
    fn walk_or_create(
        &mut self,
        va: VirtualAddress,
        allocator: &mut dyn FrameAllocator,
    ) -> Result<Option<&mut PageEntry>, VmError> {
        if va.as_usize() >= MAXVA {
            return Err(InvariantViolation::AddressOutOfRange.into());
        }

        // SAFETY: &mut self gives exclusive access to the whole tree.
        let mut table = unsafe { table_mut(self.root) };
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry_mut(va.page_index(level));
            if entry.is_valid() {
                let child = entry.address().expect("valid entry names a frame");
                // SAFETY: as in walk.
                table = unsafe { table_mut(child) };
            } else {
                let Some(frame) = allocator.allocate_frame() else {
                    return Ok(None);
                };
                // SAFETY: freshly allocated frame, nothing else references it.
                let child = unsafe { table_mut(frame) };
                child.zero();

                let mut flags = PteFlags::empty();
                flags.set_valid(true);
                *entry = PageEntry::new(frame, flags);
                table = child;
            }
        }
        Ok(Some(table.entry_mut(va.page_index(0))))
    }

    /// Returns a copy of the level-0 entry for `va`, if the path exists.
    ///
    /// Out-of-range addresses resolve to None rather than an error; this is
    /// the read-only lookup used by translation and cloning.
    pub fn lookup(&self, va: VirtualAddress) -> Option<PageEntry> {
        if va.as_usize() >= MAXVA {
            return None;
        }

        // SAFETY: shared traversal of the tree under the caller's exclusion.
        let mut table = unsafe { table_ref(self.root) };
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry(va.page_index(level));
            if !entry.is_valid() {
                return None;
            }
            let child = entry.address().expect("valid entry names a frame");
            // SAFETY: as above.
            table = unsafe { table_ref(child) };
        }
        Some(table.entry(va.page_index(0)))
    }

    /// Installs translations for `[floor(va), floor(va + size - 1)]` onto
    /// consecutive physical frames starting at `pa`.
    ///
    /// The valid bit is set on every installed entry in addition to `flags`.
    /// Fails with [`VmError::OutOfFrames`] if an intermediate table cannot
    /// be allocated; already-installed pages of this call are not rolled
    /// back. A zero `size` and a still-valid target slot are invariant
    /// violations.
    pub fn map_pages(
        &mut self,
        va: VirtualAddress,
        size: usize,
        pa: PhysicalAddress,
        flags: PteFlags,
        allocator: &mut dyn FrameAllocator,
    ) -> Result<(), VmError> {
        if size == 0 {
            return Err(InvariantViolation::ZeroSizeMapping.into());
        }

        let first = va.align_down(PAGE_SIZE).page_number();
        let last = VirtualAddress::new(va.as_usize() + size - 1)
            .align_down(PAGE_SIZE)
            .page_number();

        let mut leaf_flags = flags;
        leaf_flags.set_valid(true);

        for (page, frame) in (first..=last).zip(FrameNumber::from(pa)..) {
            let slot = self
                .walk_or_create(page.start(), allocator)?
                .ok_or(VmError::OutOfFrames)?;
            if slot.is_valid() {
                return Err(InvariantViolation::Remap.into());
            }
            *slot = PageEntry::new(frame.start(), leaf_flags);
        }
        Ok(())
    }

    /// Removes `page_count` translations starting at the page-aligned `va`.
    ///
    /// Every removed entry must be an existing valid leaf. If `free_frames`
    /// is set, each target frame is returned to the allocator before its
    /// entry is cleared; removal verifies validity first, so a frame can
    /// never be released twice.
    pub fn unmap_pages(
        &mut self,
        va: VirtualAddress,
        page_count: usize,
        free_frames: bool,
        allocator: &mut dyn FrameAllocator,
    ) -> Result<(), VmError> {
        if !va.is_aligned(PAGE_SIZE) {
            return Err(InvariantViolation::MisalignedAddress.into());
        }

        let first = va.page_number();
        for page in first..first + page_count {
            let slot = self
                .walk(page.start())?
                .ok_or(VmError::Invariant(InvariantViolation::UnmapMissing))?;
            if !slot.is_valid() {
                return Err(InvariantViolation::UnmapMissing.into());
            }
            if !slot.is_leaf() {
                return Err(InvariantViolation::UnmapNonLeaf.into());
            }
            if free_frames {
                let frame = slot.address().expect("valid leaf names a frame");
                allocator.free_frame(frame);
            }
            slot.clear();
        }
        Ok(())
    }

    /// Removes and frees the translation at `va` if one exists.
    ///
    /// Tolerant variant of [`Self::unmap_pages`] used when shrinking past
    /// regions that were never committed. Returns whether a frame was freed.
    pub(crate) fn release_if_mapped(
        &mut self,
        va: VirtualAddress,
        allocator: &mut dyn FrameAllocator,
    ) -> bool {
        if let Ok(Some(slot)) = self.walk(va) {
            if slot.is_leaf() {
                let frame = slot.address().expect("valid leaf names a frame");
                allocator.free_frame(frame);
                slot.clear();
                return true;
            }
        }
        false
    }

    /// Resolves a user virtual address to the physical address of its frame.
    ///
    /// Only valid, user-accessible leaves resolve; kernel-only pages and
    /// out-of-range addresses are never reachable through this.
    pub fn translate_user(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.lookup(va)?;
        if !entry.is_valid() || !entry.flags().is_user() {
            return None;
        }
        entry.address()
    }

    /// Strips the user-accessible bit from the entry mapping `va`.
    ///
    /// Used to turn an existing mapping into a guard page the kernel can
    /// still reach. The entry must exist.
    pub fn clear_user_access(&mut self, va: VirtualAddress) -> Result<(), VmError> {
        let slot = self
            .walk(va)?
            .ok_or(VmError::Invariant(InvariantViolation::MissingEntry))?;
        let mut flags = slot.flags();
        flags.set_user(false);
        slot.set_flags(flags);
        Ok(())
    }

    /// Recursively frees every page-table page, including the root.
    ///
    /// All leaf translations must already have been removed; finding one is
    /// an invariant violation. Recursion depth is bounded by the fixed level
    /// count.
    pub fn free_walk(self, allocator: &mut dyn FrameAllocator) -> Result<(), VmError> {
        Self::free_subtree(self.root, PAGE_TABLE_LEVELS - 1, allocator)
    }

    fn free_subtree(
        frame: PhysicalAddress,
        level: usize,
        allocator: &mut dyn FrameAllocator,
    ) -> Result<(), VmError> {
        // SAFETY: teardown owns the whole tree.
        let table = unsafe { table_mut(frame) };
        for index in 0..table.len() {
            let entry = table.entry(index);
            if !entry.is_valid() {
                continue;
            }
            if entry.is_leaf() {
                return Err(InvariantViolation::LeafInTeardown.into());
            }
            let child = entry.address().expect("valid entry names a frame");
            if level > 0 {
                Self::free_subtree(child, level - 1, allocator)?;
            }
            table.entry_mut(index).clear();
        }
        debug_assert!(table.is_empty());
        allocator.free_frame(frame);
        Ok(())
    }

    /// Returns a displayable rendering of every valid entry in the tree.
    pub fn dumper(&self) -> PageMapDumper<'_> {
        PageMapDumper { map: self }
    }

    /// Logs the page-table dump at info level.
    pub fn dump(&self) {
        log::info!("{}", self.dumper());
    }
}

/// Display adapter printing a page table in the diagnostic dump format.
///
/// One line per valid entry, indented by `..` markers per level, showing the
/// entry index, the raw entry bits, and the physical address it names.
pub struct PageMapDumper<'a> {
    map: &'a PageMap,
}

impl PageMapDumper<'_> {
    fn fmt_subtree(
        f: &mut fmt::Formatter<'_>,
        frame: PhysicalAddress,
        level: usize,
    ) -> fmt::Result {
        // SAFETY: read-only traversal under the caller's exclusion.
        let table = unsafe { table_ref(frame) };
        for index in 0..table.len() {
            let entry = table.entry(index);
            if !entry.is_valid() {
                continue;
            }
            for depth in 0..(PAGE_TABLE_LEVELS - level) {
                if depth > 0 {
                    write!(f, " ")?;
                }
                write!(f, "..")?;
            }
            let target = entry.address().expect("valid entry names a frame");
            writeln!(f, "{}: pte {:#x} pa {}", index, entry.as_usize(), target)?;
            if level > 0 && !entry.is_leaf() {
                Self::fmt_subtree(f, target, level - 1)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for PageMapDumper<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "page table {}", self.map.root)?;
        Self::fmt_subtree(f, self.map.root, PAGE_TABLE_LEVELS - 1)
    }
}
