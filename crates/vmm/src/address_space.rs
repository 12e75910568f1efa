//! User address-space lifecycle.
//!
//! An [`AddressSpace`] pairs a [`PageMap`] with the byte size of the process
//! image mapped into it. The image occupies virtual addresses `0..size`,
//! backed page by page with freshly allocated frames; growth, shrinking,
//! duplication for fork, and teardown all go through here so the size and
//! the mappings never drift apart.

use crate::{
    AddressTranslator, FrameAllocator, PageMap, VirtualAddress,
    error::{InvariantViolation, VmError},
    frame_alloc::zero_frame,
    sv39::{self, PAGE_SIZE, PteFlags},
};

/// A user process address space.
pub struct AddressSpace {
    map: PageMap,
    size: usize,
}

impl AddressSpace {
    /// Creates an empty address space with no mappings and size zero.
    pub fn new(allocator: &mut dyn FrameAllocator) -> Result<Self, VmError> {
        Ok(Self {
            map: PageMap::allocate(allocator)?,
            size: 0,
        })
    }

    /// Returns the current image size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the underlying page map.
    pub fn map(&self) -> &PageMap {
        &self.map
    }

    /// Returns the underlying page map for mutation.
    pub fn map_mut(&mut self) -> &mut PageMap {
        &mut self.map
    }

    /// Loads an initial program image into the first page.
    ///
    /// Only images smaller than one page are supported; the first process's
    /// bootstrap code fits with room to spare. The page is mapped at virtual
    /// address zero with full user permissions and the image size becomes
    /// one page.
    pub fn seed(
        &mut self,
        image: &[u8],
        allocator: &mut dyn FrameAllocator,
    ) -> Result<(), VmError> {
        if image.len() >= PAGE_SIZE {
            return Err(InvariantViolation::ImageTooLarge.into());
        }
        log::trace!("seeding {} byte image", image.len());

        let frame = allocator.allocate_frame().ok_or(VmError::OutOfFrames)?;
        zero_frame(frame);

        let translator = AddressTranslator::current();
        let dst = translator.phys_to_ptr::<u8>(frame.as_usize());
        // SAFETY: the frame was just allocated and zeroed, nothing else
        // references it, and the image fits within the page.
        unsafe {
            core::ptr::copy_nonoverlapping(image.as_ptr(), dst, image.len());
        }

        self.map.map_pages(
            VirtualAddress::new(0),
            PAGE_SIZE,
            frame,
            PteFlags::user_rwx(),
            allocator,
        )?;
        self.size = PAGE_SIZE;
        Ok(())
    }

    /// Grows the image to `new_size` bytes, allocating and mapping zeroed
    /// frames for every new page.
    ///
    /// Returns the resulting size. A `new_size` at or below the current size
    /// is a no-op. On allocation failure the pages mapped by this call are
    /// released again and the size is unchanged.
    pub fn grow(
        &mut self,
        new_size: usize,
        allocator: &mut dyn FrameAllocator,
    ) -> Result<usize, VmError> {
        if new_size <= self.size {
            return Ok(self.size);
        }
        log::trace!("growing address space from {} to {} bytes", self.size, new_size);

        let old_size = self.size;
        let mut va = sv39::page_round_up(old_size);
        while va < new_size {
            let frame = match allocator.allocate_frame() {
                Some(frame) => frame,
                None => {
                    self.shrink_mappings(old_size, va, allocator);
                    return Err(VmError::OutOfFrames);
                }
            };
            zero_frame(frame);

            let result = self.map.map_pages(
                VirtualAddress::new(va),
                PAGE_SIZE,
                frame,
                PteFlags::user_rwx(),
                allocator,
            );
            if let Err(error) = result {
                allocator.free_frame(frame);
                self.shrink_mappings(old_size, va, allocator);
                return Err(error);
            }
            va += PAGE_SIZE;
        }

        self.size = new_size;
        Ok(self.size)
    }

    /// Shrinks the image to `new_size` bytes, freeing every whole page above
    /// the new boundary.
    ///
    /// Returns the resulting size. Pages in the shrunk range that were never
    /// committed are skipped rather than treated as errors, so a partially
    /// failed grow can always be undone.
    pub fn shrink(&mut self, new_size: usize, allocator: &mut dyn FrameAllocator) -> usize {
        if new_size >= self.size {
            return self.size;
        }
        log::trace!("shrinking address space from {} to {} bytes", self.size, new_size);
        self.shrink_mappings(new_size, self.size, allocator);
        self.size = new_size;
        self.size
    }

    /// Releases the mappings for whole pages in `[round_up(from), round_up(to))`.
    fn shrink_mappings(&mut self, from: usize, to: usize, allocator: &mut dyn FrameAllocator) {
        let mut va = sv39::page_round_up(from);
        let end = sv39::page_round_up(to);
        while va < end {
            self.map.release_if_mapped(VirtualAddress::new(va), allocator);
            va += PAGE_SIZE;
        }
    }

    /// Duplicates this image into `target`, page by page.
    ///
    /// Used by fork: `target` receives fresh frames holding copies of the
    /// source data, mapped with the same permissions, and takes on the
    /// source's size. Every page below the source size must be mapped; a
    /// hole is an invariant violation. On allocation failure the pages
    /// copied so far are removed from `target` again and its size is left
    /// unchanged.
    pub fn clone_into(
        &self,
        target: &mut AddressSpace,
        allocator: &mut dyn FrameAllocator,
    ) -> Result<(), VmError> {
        let translator = AddressTranslator::current();

        let mut va = 0;
        while va < self.size {
            let entry = match self.map.lookup(VirtualAddress::new(va)) {
                Some(entry) if entry.is_valid() => entry,
                _ => return Err(InvariantViolation::MissingEntry.into()),
            };
            let src_frame = entry.address().expect("valid entry names a frame");

            let result = allocator
                .allocate_frame()
                .ok_or(VmError::OutOfFrames)
                .and_then(|dst_frame| {
                    let src = translator.phys_to_ptr::<u8>(src_frame.as_usize());
                    let dst = translator.phys_to_ptr::<u8>(dst_frame.as_usize());
                    // SAFETY: both frames are PAGE_SIZE bytes, the source is
                    // mapped in this space and the destination was just
                    // allocated, so the ranges cannot overlap.
                    unsafe {
                        core::ptr::copy_nonoverlapping(src, dst, PAGE_SIZE);
                    }

                    let mapped = target.map.map_pages(
                        VirtualAddress::new(va),
                        PAGE_SIZE,
                        dst_frame,
                        entry.flags(),
                        allocator,
                    );
                    if let Err(error) = mapped {
                        allocator.free_frame(dst_frame);
                        return Err(error);
                    }
                    Ok(())
                });

            if let Err(error) = result {
                // Unwind the pages this call already placed in the target.
                target.shrink_mappings(0, va, allocator);
                return Err(error);
            }
            va += PAGE_SIZE;
        }
        target.size = self.size;
        Ok(())
    }

    /// Strips user access from the page at `va`, making it a guard page.
    pub fn clear_user_access(&mut self, va: VirtualAddress) -> Result<(), VmError> {
        self.map.clear_user_access(va)
    }

    /// Frees the image frames and then the page-table pages themselves.
    ///
    /// Consumes the space; after this every frame it held is back in the
    /// allocator.
    pub fn destroy(mut self, allocator: &mut dyn FrameAllocator) -> Result<(), VmError> {
        log::trace!("destroying address space of {} bytes", self.size);
        if self.size > 0 {
            let pages = sv39::page_round_up(self.size) / PAGE_SIZE;
            self.map
                .unmap_pages(VirtualAddress::new(0), pages, true, allocator)?;
        }
        self.map.free_walk(allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedFrameAllocator;

    fn setup() -> EmulatedFrameAllocator {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(4 * 1024 * 1024));
        }
        EmulatedFrameAllocator::new()
    }

    fn read_byte(space: &AddressSpace, va: usize) -> u8 {
        let frame = space
            .map()
            .translate_user(VirtualAddress::new(va & !(PAGE_SIZE - 1)))
            .expect("page must be user-mapped");
        let translator = AddressTranslator::current();
        let ptr = translator.phys_to_ptr::<u8>(frame.as_usize() + (va & (PAGE_SIZE - 1)));
        unsafe { ptr.read() }
    }

    #[test]
    fn new_space_is_empty() {
        let mut allocator = setup();
        let space = AddressSpace::new(&mut allocator).expect("space");
        assert_eq!(space.size(), 0);
        assert_eq!(space.map().translate_user(VirtualAddress::new(0)), None);
    }

    #[test]
    fn seed_places_the_image_at_address_zero() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");

        let image = [0x13u8, 0x05, 0x45, 0x03];
        space.seed(&image, &mut allocator).expect("seed");

        assert_eq!(space.size(), PAGE_SIZE);
        for (offset, byte) in image.iter().enumerate() {
            assert_eq!(read_byte(&space, offset), *byte);
        }
        // The rest of the page is zeroed.
        assert_eq!(read_byte(&space, image.len()), 0);
    }

    #[test]
    fn seed_rejects_images_of_a_page_or_more() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");
        let image = vec![0u8; PAGE_SIZE];
        let err = space.seed(&image, &mut allocator).expect_err("too large");
        assert_eq!(err, VmError::Invariant(InvariantViolation::ImageTooLarge));
    }

    #[test]
    fn grow_commits_zeroed_user_pages() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");

        let size = space.grow(3 * PAGE_SIZE, &mut allocator).expect("grow");
        assert_eq!(size, 3 * PAGE_SIZE);
        assert_eq!(space.size(), 3 * PAGE_SIZE);

        for page in 0..3 {
            let va = VirtualAddress::new(page * PAGE_SIZE);
            assert!(space.map().translate_user(va).is_some());
            assert_eq!(read_byte(&space, page * PAGE_SIZE), 0);
        }
        assert_eq!(
            space.map().translate_user(VirtualAddress::new(3 * PAGE_SIZE)),
            None
        );
    }

    #[test]
    fn grow_to_an_unaligned_size_commits_the_partial_page() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");
        let tables = allocator.live_frames();

        // 8200 bytes spill 8 bytes into a third page; all three get frames.
        let size = space.grow(8200, &mut allocator).expect("grow");
        assert_eq!(size, 8200);
        // Three data frames plus the two intermediate table pages.
        assert_eq!(allocator.live_frames() - tables, 3 + 2);

        let third = space
            .map()
            .lookup(VirtualAddress::new(2 * PAGE_SIZE))
            .expect("third page");
        assert!(third.flags().is_user());
        assert!(third.flags().is_writable());
        assert!(third.flags().is_executable());
    }

    #[test]
    fn grow_to_smaller_size_is_a_no_op() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");
        space.grow(2 * PAGE_SIZE, &mut allocator).expect("grow");

        let size = space.grow(PAGE_SIZE, &mut allocator).expect("no-op grow");
        assert_eq!(size, 2 * PAGE_SIZE);
        assert!(
            space
                .map()
                .translate_user(VirtualAddress::new(PAGE_SIZE))
                .is_some()
        );
    }

    #[test]
    fn failed_grow_unwinds_and_keeps_the_old_size() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");
        space.grow(PAGE_SIZE, &mut allocator).expect("initial grow");
        let live_before = allocator.live_frames();

        // Drain the allocator so the next grow cannot finish.
        let mut hoard = Vec::new();
        while let Some(frame) = allocator.allocate_frame() {
            hoard.push(frame);
        }
        let hoarded = hoard.len();

        let err = space
            .grow(64 * PAGE_SIZE, &mut allocator)
            .expect_err("grow must fail");
        assert_eq!(err, VmError::OutOfFrames);
        assert_eq!(space.size(), PAGE_SIZE);
        // Everything the failed grow took is back in the allocator.
        assert_eq!(allocator.live_frames(), live_before + hoarded);
        assert!(
            space
                .map()
                .translate_user(VirtualAddress::new(PAGE_SIZE))
                .is_none()
        );
    }

    #[test]
    fn shrink_frees_the_pages_above_the_boundary() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");
        space.grow(4 * PAGE_SIZE, &mut allocator).expect("grow");
        let live_before = allocator.live_frames();

        let size = space.shrink(PAGE_SIZE, &mut allocator);
        assert_eq!(size, PAGE_SIZE);
        assert_eq!(allocator.live_frames(), live_before - 3);
        assert!(
            space
                .map()
                .translate_user(VirtualAddress::new(0))
                .is_some()
        );
        assert!(
            space
                .map()
                .translate_user(VirtualAddress::new(PAGE_SIZE))
                .is_none()
        );
    }

    #[test]
    fn shrink_keeps_a_partial_final_page() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");
        space.grow(2 * PAGE_SIZE, &mut allocator).expect("grow");

        // Shrinking to a size inside the first page keeps that page mapped.
        let size = space.shrink(100, &mut allocator);
        assert_eq!(size, 100);
        assert!(
            space
                .map()
                .translate_user(VirtualAddress::new(0))
                .is_some()
        );
        assert!(
            space
                .map()
                .translate_user(VirtualAddress::new(PAGE_SIZE))
                .is_none()
        );
    }

    #[test]
    fn shrink_to_larger_size_is_a_no_op() {
        let mut allocator = setup();
        let mut space = AddressSpace::new(&mut allocator).expect("space");
        space.grow(PAGE_SIZE, &mut allocator).expect("grow");
        assert_eq!(space.shrink(5 * PAGE_SIZE, &mut allocator), PAGE_SIZE);
        assert_eq!(space.size(), PAGE_SIZE);
    }

    #[test]
    fn clone_into_copies_data_and_permissions() {
        let mut allocator = setup();
        let mut parent = AddressSpace::new(&mut allocator).expect("parent");
        let image = [0xDEu8, 0xAD, 0xBE, 0xEF];
        parent.seed(&image, &mut allocator).expect("seed");
        parent.grow(2 * PAGE_SIZE, &mut allocator).expect("grow");

        let mut child = AddressSpace::new(&mut allocator).expect("child");
        parent.clone_into(&mut child, &mut allocator).expect("clone");
        assert_eq!(child.size(), parent.size());

        for (offset, byte) in image.iter().enumerate() {
            assert_eq!(read_byte(&child, offset), *byte);
        }
        // Copies, not aliases.
        let parent_frame = parent
            .map()
            .translate_user(VirtualAddress::new(0))
            .expect("parent page");
        let child_frame = child
            .map()
            .translate_user(VirtualAddress::new(0))
            .expect("child page");
        assert_ne!(parent_frame, child_frame);

        // Mutating the parent leaves the child untouched.
        let translator = AddressTranslator::current();
        unsafe {
            translator
                .phys_to_ptr::<u8>(parent_frame.as_usize())
                .write(0x00);
        }
        assert_eq!(read_byte(&child, 0), 0xDE);
    }

    #[test]
    fn cloned_space_reports_its_size_and_destroys_cleanly() {
        let mut allocator = setup();
        let baseline = allocator.live_frames();

        let mut parent = AddressSpace::new(&mut allocator).expect("parent");
        parent.grow(2 * PAGE_SIZE, &mut allocator).expect("grow");
        let mut child = AddressSpace::new(&mut allocator).expect("child");
        parent.clone_into(&mut child, &mut allocator).expect("clone");

        assert_eq!(child.size(), 2 * PAGE_SIZE);

        // The child is a full address space: it can keep growing and tear
        // down without leaking its copied frames.
        child.grow(3 * PAGE_SIZE, &mut allocator).expect("child grow");
        child.destroy(&mut allocator).expect("child destroy");
        parent.destroy(&mut allocator).expect("parent destroy");
        assert_eq!(allocator.live_frames(), baseline);
    }

    #[test]
    fn clone_into_fails_fatally_on_a_hole() {
        let mut allocator = setup();
        let mut parent = AddressSpace::new(&mut allocator).expect("parent");
        parent.grow(PAGE_SIZE, &mut allocator).expect("grow");
        // Fake a hole: claim a size larger than what is mapped.
        parent.size = 2 * PAGE_SIZE;

        let mut child = AddressSpace::new(&mut allocator).expect("child");
        let err = parent
            .clone_into(&mut child, &mut allocator)
            .expect_err("hole");
        assert_eq!(err, VmError::Invariant(InvariantViolation::MissingEntry));
    }

    #[test]
    fn failed_clone_unwinds_the_target() {
        let mut allocator = setup();
        let mut parent = AddressSpace::new(&mut allocator).expect("parent");
        parent.grow(8 * PAGE_SIZE, &mut allocator).expect("grow");
        let mut child = AddressSpace::new(&mut allocator).expect("child");
        let live_before = allocator.live_frames();

        let mut hoard = Vec::new();
        while let Some(frame) = allocator.allocate_frame() {
            hoard.push(frame);
        }
        let hoarded = hoard.len();

        let err = parent
            .clone_into(&mut child, &mut allocator)
            .expect_err("clone must fail");
        assert_eq!(err, VmError::OutOfFrames);
        assert_eq!(allocator.live_frames(), live_before + hoarded);
        assert!(
            child
                .map()
                .translate_user(VirtualAddress::new(0))
                .is_none()
        );
    }

    #[test]
    fn destroy_returns_every_frame() {
        let mut allocator = setup();
        let baseline = allocator.live_frames();

        let mut space = AddressSpace::new(&mut allocator).expect("space");
        space.seed(&[0x42], &mut allocator).expect("seed");
        space.grow(5 * PAGE_SIZE, &mut allocator).expect("grow");
        assert!(allocator.live_frames() > baseline);

        space.destroy(&mut allocator).expect("destroy");
        assert_eq!(allocator.live_frames(), baseline);
    }

    #[test]
    fn destroy_of_an_empty_space_frees_only_tables() {
        let mut allocator = setup();
        let baseline = allocator.live_frames();
        let space = AddressSpace::new(&mut allocator).expect("space");
        space.destroy(&mut allocator).expect("destroy");
        assert_eq!(allocator.live_frames(), baseline);
    }
}
