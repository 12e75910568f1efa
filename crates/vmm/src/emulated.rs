//! Emulated physical memory for testing and development.
//!
//! This provides a simulated physical memory space so page-table operations
//! can be exercised on any host, without a real MMU or kernel environment.
//! Physical addresses are offsets into a host buffer; the translator turns
//! them into host pointers.

use core::alloc::Layout;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sv39::PAGE_SIZE;

/// Emulated physical memory backing the test environment.
///
/// The buffer is page-aligned so that a frame-aligned physical address
/// always translates to a page-aligned host pointer; page-table pages are
/// reinterpreted in place and carry a 4 KiB alignment requirement.
pub struct EmulatedMemory {
    /// Start of the backing allocation.
    base: *mut u8,
    /// Size of the backing allocation in bytes.
    size: usize,
    /// Next allocation offset (simple bump allocator).
    next_alloc: AtomicUsize,
}

impl EmulatedMemory {
    /// Creates a new emulated memory region of the specified size.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "emulated memory must not be empty");
        let layout = Self::layout(size);
        // SAFETY: the layout has non-zero size.
        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null(), "emulated memory allocation failed");
        Self {
            base,
            size,
            next_alloc: AtomicUsize::new(0),
        }
    }

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, PAGE_SIZE).expect("emulated memory layout")
    }

    /// Allocates a block of memory from the emulated space.
    ///
    /// Returns the physical address of the allocated block, or None if
    /// there's not enough space.
    pub fn allocate(&self, size: usize, align: usize) -> Option<usize> {
        loop {
            let current = self.next_alloc.load(Ordering::Relaxed);

            let aligned = (current + align - 1) & !(align - 1);
            let end = aligned + size;

            if end > self.size {
                return None;
            }

            if self
                .next_alloc
                .compare_exchange(current, end, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(aligned);
            }
        }
    }

    /// Translates a physical address to a host pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size, "physical address out of bounds");
        // SAFETY: phys is within the backing allocation.
        unsafe { self.base.add(phys) }
    }

    /// Translates a host pointer back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        // SAFETY: distance computation over the backing allocation; the
        // bounds asserts below reject pointers outside it.
        let offset = unsafe { ptr.offset_from(self.base) };
        assert!(offset >= 0, "pointer not within emulated memory");
        assert!(
            (offset as usize) < self.size,
            "pointer not within emulated memory"
        );
        offset as usize
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        // SAFETY: base came from alloc_zeroed with this same layout.
        unsafe {
            alloc::alloc::dealloc(self.base, Self::layout(self.size));
        }
    }
}
