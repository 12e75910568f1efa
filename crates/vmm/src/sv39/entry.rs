//! Page-table entry for Sv39.

use crate::PhysicalAddress;

use super::flags::PteFlags;

/// A single Sv39 page-table entry.
///
/// The hardware format, from low to high bits:
/// - Bits 0-4: valid, readable, writable, executable, user flags
/// - Bits 5-9: global/accessed/dirty and software bits (unused here)
/// - Bits 10-53: physical page number
///
/// The packed layout stays inside this type; callers use the accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    /// Flag bits mask (bits 0-9).
    const FLAGS_MASK: usize = 0x3FF;

    /// Shift between the physical page number field and a physical address.
    /// The PPN sits at bit 10 in the entry and bit 12 in the address.
    const PPN_SHIFT: usize = 10;

    /// Creates a new page-table entry.
    ///
    /// The physical address must be frame-aligned (lowest 12 bits zero).
    pub fn new(address: PhysicalAddress, flags: PteFlags) -> Self {
        debug_assert!(
            address.as_usize() & 0xFFF == 0,
            "physical address must be frame-aligned"
        );

        let ppn_bits = (address.as_usize() >> 12) << Self::PPN_SHIFT;
        let flag_bits = flags.to_raw() & Self::FLAGS_MASK;
        Self(ppn_bits | flag_bits)
    }

    /// Returns the physical address this entry names.
    ///
    /// Returns None if the entry is not valid.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_valid() {
            Some(PhysicalAddress::new((self.0 >> Self::PPN_SHIFT) << 12))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PteFlags {
        PteFlags::from_raw(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the physical page number.
    pub fn set_flags(&mut self, flags: PteFlags) {
        let ppn_bits = self.0 & !Self::FLAGS_MASK;
        let flag_bits = flags.to_raw() & Self::FLAGS_MASK;
        self.0 = ppn_bits | flag_bits;
    }

    /// Returns whether the valid bit is set.
    pub fn is_valid(self) -> bool {
        self.flags().is_valid()
    }

    /// Returns whether this entry is a leaf (maps a data frame).
    ///
    /// A valid entry with any of read/write/execute set is a leaf; a valid
    /// entry with none of them points to a lower-level page table.
    pub fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().has_permission()
    }

    /// Clears this entry (sets it to empty).
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw bit pattern of this entry.
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl Default for PageEntry {
    fn default() -> Self {
        Self(0)
    }
}
