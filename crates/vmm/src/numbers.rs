//! Page and frame number types.
//!
//! Newtypes for physical frame numbers and virtual page numbers. Both
//! implement `Step`, so the mapping loops iterate page ranges with ordinary
//! range syntax.

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    sv39,
};
use core::{
    fmt,
    iter::Step,
    ops::{Add, Sub},
};

/// Macro to define common page/frame number functionality.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }

        impl Step for $name {
            fn steps_between(start: &Self, end: &Self) -> (usize, Option<usize>) {
                if start <= end {
                    let diff = end.0 - start.0;
                    (diff, Some(diff))
                } else {
                    (0, None)
                }
            }

            fn forward_checked(start: Self, count: usize) -> Option<Self> {
                start.0.checked_add(count).map(Self)
            }

            fn backward_checked(start: Self, count: usize) -> Option<Self> {
                start.0.checked_sub(count).map(Self)
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frames are the allocation granularity for both data pages and page-table\n\
     pages. Frame numbers are zero-indexed and correspond to frame-aligned\n\
     physical addresses."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * sv39::PAGE_SIZE)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        Self::new(addr.as_usize() / sv39::PAGE_SIZE)
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual memory page number.\n\n\
     Page numbers are zero-indexed and correspond to page-aligned virtual\n\
     addresses."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * sv39::PAGE_SIZE)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self::new(addr.as_usize() / sv39::PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_start_address() {
        let frame = FrameNumber::new(3);
        assert_eq!(frame.start().as_usize(), 3 * sv39::PAGE_SIZE);
    }

    #[test]
    fn frame_from_unaligned_address() {
        let addr = PhysicalAddress::new(sv39::PAGE_SIZE * 3 + 10);
        assert_eq!(FrameNumber::from(addr).as_usize(), 3);
    }

    #[test]
    fn page_round_trip() {
        let page = PageNumber::new(42);
        assert_eq!(PageNumber::from(page.start()), page);
    }

    #[test]
    fn ranges_iterate_pages() {
        let first = PageNumber::new(2);
        let last = PageNumber::new(5);
        let collected: Vec<usize> = (first..=last).map(|p| p.as_usize()).collect();
        assert_eq!(collected, vec![2, 3, 4, 5]);
    }

    #[test]
    fn frames_advance_alongside_pages() {
        let pages = PageNumber::new(0)..PageNumber::new(3);
        let frames = FrameNumber::new(8)..;
        let pairs: Vec<(usize, usize)> = pages
            .zip(frames)
            .map(|(p, f)| (p.as_usize(), f.as_usize()))
            .collect();
        assert_eq!(pairs, vec![(0, 8), (1, 9), (2, 10)]);
    }
}
