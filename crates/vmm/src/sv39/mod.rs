//! Sv39 page-table format.
//!
//! The RISC-V Sv39 scheme uses a three-level radix tree of page-table pages.
//! A 39-bit virtual address splits into five fields:
//!
//! - bits 39..63: must be zero
//! - bits 30..38: 9-bit level-2 index (root)
//! - bits 21..29: 9-bit level-1 index
//! - bits 12..20: 9-bit level-0 index
//! - bits 0..11:  12-bit byte offset within the page
//!
//! These tables are consumed directly by the MMU, so the entry encoding in
//! [`entry`] is bit-for-bit the hardware format.

mod entry;
mod flags;
mod table;

pub use entry::PageEntry;
pub use flags::PteFlags;
pub use table::{ENTRY_COUNT, PageTable};

/// Maximum number of bits in an Sv39 physical address.
pub const MAX_PHYSICAL_BITS: usize = 56;

/// Maximum number of bits in an Sv39 virtual address.
pub const MAX_VIRTUAL_BITS: usize = 39;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of page table levels (levels 2, 1, 0; root at level 2).
pub const PAGE_TABLE_LEVELS: usize = 3;

/// One past the highest virtual address this crate will translate.
///
/// Sv39 allows 39 bits, but we stay one bit short of that to avoid having to
/// sign-extend addresses with bit 38 set.
pub const MAXVA: usize = 1 << (MAX_VIRTUAL_BITS - 1);

/// Returns the page table index for a virtual address at the given level.
///
/// Level 0 is the lowest level (its index sits just above the page offset);
/// level 2 indexes the root table.
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    let bits_for_level = match level {
        0 | 1 | 2 => 9,
        _ => panic!("level out of range for Sv39 (0-2)"),
    };
    let shift = 12 + (level * bits_for_level);
    (address >> shift) & ((1 << bits_for_level) - 1)
}

/// Validates a physical address for Sv39.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr < (1 << MAX_PHYSICAL_BITS)
}

/// Validates a virtual address for Sv39.
///
/// All bits above the three level indices and the page offset must be zero.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr < (1 << MAX_VIRTUAL_BITS)
}

/// Rounds a byte count up to the next page boundary.
#[inline]
pub const fn page_round_up(value: usize) -> usize {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Rounds a byte count down to the previous page boundary.
#[inline]
pub const fn page_round_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}
