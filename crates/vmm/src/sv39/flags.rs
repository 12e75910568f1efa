//! Page-table entry permission flags for Sv39.

/// Permission and status bits of an Sv39 page-table entry.
///
/// An entry with the valid bit set and none of read/write/execute set is a
/// non-leaf entry pointing to a lower-level page-table page; with any of the
/// three set it is a leaf mapping a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PteFlags(usize);

impl PteFlags {
    /// Valid bit (bit 0).
    const VALID: usize = 1 << 0;

    /// Readable bit (bit 1).
    const READ: usize = 1 << 1;

    /// Writable bit (bit 2).
    const WRITE: usize = 1 << 2;

    /// Executable bit (bit 3).
    const EXECUTE: usize = 1 << 3;

    /// User-accessible bit (bit 4).
    const USER: usize = 1 << 4;

    /// Creates empty flags (entry not valid).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Read/write permissions, as used for device windows and kernel data.
    pub const fn read_write() -> Self {
        Self(Self::READ | Self::WRITE)
    }

    /// Read/execute permissions, as used for kernel text and the trampoline.
    pub const fn read_execute() -> Self {
        Self(Self::READ | Self::EXECUTE)
    }

    /// Full user permissions, as used for user heap pages.
    pub const fn user_rwx() -> Self {
        Self(Self::READ | Self::WRITE | Self::EXECUTE | Self::USER)
    }

    /// Creates flags from a raw bit pattern.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw bit pattern of these flags.
    pub const fn to_raw(self) -> usize {
        self.0
    }

    /// Returns whether the valid bit is set.
    pub const fn is_valid(self) -> bool {
        (self.0 & Self::VALID) != 0
    }

    /// Sets or clears the valid bit.
    pub fn set_valid(&mut self, valid: bool) {
        if valid {
            self.0 |= Self::VALID;
        } else {
            self.0 &= !Self::VALID;
        }
    }

    /// Returns whether the readable bit is set.
    pub const fn is_readable(self) -> bool {
        (self.0 & Self::READ) != 0
    }

    /// Sets or clears the readable bit.
    pub fn set_readable(&mut self, readable: bool) {
        if readable {
            self.0 |= Self::READ;
        } else {
            self.0 &= !Self::READ;
        }
    }

    /// Returns whether the writable bit is set.
    pub const fn is_writable(self) -> bool {
        (self.0 & Self::WRITE) != 0
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        if writable {
            self.0 |= Self::WRITE;
        } else {
            self.0 &= !Self::WRITE;
        }
    }

    /// Returns whether the executable bit is set.
    pub const fn is_executable(self) -> bool {
        (self.0 & Self::EXECUTE) != 0
    }

    /// Sets or clears the executable bit.
    pub fn set_executable(&mut self, executable: bool) {
        if executable {
            self.0 |= Self::EXECUTE;
        } else {
            self.0 &= !Self::EXECUTE;
        }
    }

    /// Returns whether the user-accessible bit is set.
    pub const fn is_user(self) -> bool {
        (self.0 & Self::USER) != 0
    }

    /// Sets or clears the user-accessible bit.
    pub fn set_user(&mut self, user: bool) {
        if user {
            self.0 |= Self::USER;
        } else {
            self.0 &= !Self::USER;
        }
    }

    /// Returns whether any of the read/write/execute bits is set.
    ///
    /// Distinguishes leaf entries from non-leaf entries.
    pub const fn has_permission(self) -> bool {
        (self.0 & (Self::READ | Self::WRITE | Self::EXECUTE)) != 0
    }
}

impl Default for PteFlags {
    fn default() -> Self {
        Self::empty()
    }
}
