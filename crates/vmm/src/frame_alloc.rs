//! The physical-frame allocation seam.
//!
//! The virtual-memory manager never owns physical memory. Every frame, data
//! pages and page-table pages alike, comes from an external allocator behind
//! the [`FrameAllocator`] trait, and ownership returns to it exactly when a
//! mapping is removed with freeing, an address space shrinks, or a page table
//! is torn down.

use crate::{AddressTranslator, PhysicalAddress, sv39};

/// Source and sink of physical frames.
///
/// Frames are [`sv39::PAGE_SIZE`] bytes. A newly allocated frame carries no
/// guaranteed content; callers zero it where zero-initialization is required.
pub trait FrameAllocator {
    /// Hands out one frame, or None when physical memory is exhausted.
    fn allocate_frame(&mut self) -> Option<PhysicalAddress>;

    /// Returns a frame to the free pool.
    fn free_frame(&mut self, frame: PhysicalAddress);
}

/// Fills a frame with zeroes.
pub(crate) fn zero_frame(frame: PhysicalAddress) {
    let translator = AddressTranslator::current();
    let ptr = translator.phys_to_ptr::<u8>(frame.as_usize());
    // SAFETY: the frame was handed out by the allocator, so the translator
    // maps it to PAGE_SIZE accessible bytes that nothing else references.
    unsafe {
        core::ptr::write_bytes(ptr, 0, sv39::PAGE_SIZE);
    }
}

/// A frame allocator over the emulated memory buffer, for tests.
///
/// Recycles freed frames through a free list and tracks how many frames are
/// currently live, which lets teardown tests verify that every frame found
/// its way back. Freed frames are filled with a junk byte so use-after-free
/// shows up as corrupted data rather than silent success.
#[cfg(any(test, feature = "software-emulation"))]
pub struct EmulatedFrameAllocator {
    free: alloc::vec::Vec<PhysicalAddress>,
    live: usize,
}

#[cfg(any(test, feature = "software-emulation"))]
impl EmulatedFrameAllocator {
    const JUNK: u8 = 0x5A;

    /// Creates an allocator drawing from the current emulated translator.
    pub fn new() -> Self {
        Self {
            free: alloc::vec::Vec::new(),
            live: 0,
        }
    }

    /// Returns the number of frames handed out and not yet freed.
    pub fn live_frames(&self) -> usize {
        self.live
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl Default for EmulatedFrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl FrameAllocator for EmulatedFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysicalAddress> {
        let frame = match self.free.pop() {
            Some(frame) => frame,
            None => {
                let translator = AddressTranslator::current();
                let phys = translator.allocate(sv39::PAGE_SIZE, sv39::PAGE_SIZE)?;
                PhysicalAddress::new(phys)
            }
        };
        self.live += 1;
        Some(frame)
    }

    fn free_frame(&mut self, frame: PhysicalAddress) {
        assert!(
            frame.is_aligned(sv39::PAGE_SIZE),
            "freed frame must be frame-aligned"
        );
        let translator = AddressTranslator::current();
        let ptr = translator.phys_to_ptr::<u8>(frame.as_usize());
        // SAFETY: the frame is being returned to the pool, so nothing may
        // reference its contents anymore.
        unsafe {
            core::ptr::write_bytes(ptr, Self::JUNK, sv39::PAGE_SIZE);
        }
        self.live -= 1;
        self.free.push(frame);
    }
}
