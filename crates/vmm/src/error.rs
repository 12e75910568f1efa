//! Error types for virtual-memory operations.
//!
//! Failures split into two classes. Frame exhaustion and bad user addresses
//! are ordinary runtime conditions that the immediate caller handles.
//! Invariant violations indicate a logic error in a caller or in this crate;
//! they are surfaced as a typed variant so they can be asserted on in tests,
//! but a hosting kernel must treat them as fatal and never continue past one.

use core::fmt;

/// Errors that can occur during virtual-memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// The frame allocator could not supply a physical frame.
    ///
    /// Recoverable: multi-step operations unwind any partial progress before
    /// returning this, so no partially-visible state remains.
    OutOfFrames,
    /// A user virtual address failed to translate during a copy operation,
    /// or a string copy ran out of room before finding a terminator.
    BadAddress,
    /// A consistency rule of the translation tree was broken.
    ///
    /// Fatal by policy: the hosting kernel must halt rather than continue
    /// with a possibly corrupt page table.
    Invariant(InvariantViolation),
}

/// The specific consistency rule an operation found broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A virtual address at or beyond `MAXVA` reached the walker.
    AddressOutOfRange,
    /// An operation requiring a page-aligned address received an unaligned one.
    MisalignedAddress,
    /// A mapping request covered zero bytes.
    ZeroSizeMapping,
    /// A mapping target slot was already valid; remapping is never implicit.
    Remap,
    /// An unmap or clone found no valid entry where one must exist.
    UnmapMissing,
    /// An unmap found a non-leaf entry where a leaf must exist.
    UnmapNonLeaf,
    /// A leaf entry survived until page-table teardown.
    LeafInTeardown,
    /// Access-bit manipulation addressed an entry that does not exist.
    MissingEntry,
    /// The first process image does not fit in a single frame.
    ImageTooLarge,
}

impl VmError {
    /// Returns true if this error is in the fatal class.
    ///
    /// A hosting kernel translates fatal errors into a panic/abort; returning
    /// them as values exists only so the boundary is testable.
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

impl From<InvariantViolation> for VmError {
    fn from(violation: InvariantViolation) -> Self {
        Self::Invariant(violation)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFrames => write!(f, "out of physical frames"),
            Self::BadAddress => write!(f, "bad user address"),
            Self::Invariant(violation) => write!(f, "invariant violation: {violation}"),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::AddressOutOfRange => "virtual address out of range",
            Self::MisalignedAddress => "address not page-aligned",
            Self::ZeroSizeMapping => "zero-size mapping",
            Self::Remap => "remap of a valid entry",
            Self::UnmapMissing => "unmap of a missing entry",
            Self::UnmapNonLeaf => "unmap of a non-leaf entry",
            Self::LeafInTeardown => "leaf entry present during teardown",
            Self::MissingEntry => "entry does not exist",
            Self::ImageTooLarge => "first process image exceeds one frame",
        };
        write!(f, "{message}")
    }
}
