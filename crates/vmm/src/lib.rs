#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]
#![feature(step_trait)]

//! # Sv39 Virtual Memory Manager
//!
//! This crate implements the virtual-memory subsystem of a teaching RISC-V
//! kernel targeting the Sv39 three-level page-table format. It provides:
//!
//! - Page-table walking with on-demand allocation of intermediate tables.
//! - Mapping and unmapping primitives with strict no-remap semantics.
//! - Kernel and per-process address-space construction and teardown.
//! - Address-space cloning (fork) and user/kernel data transfer.
//! - Software emulation for testing in non-kernel environments.
//!
//! Physical frames come from an external [`FrameAllocator`]; this crate never
//! allocates from a heap. No operation takes a lock: callers must guarantee
//! exclusive access to any page table for the duration of a call.

#[cfg(any(test, feature = "software-emulation"))]
extern crate alloc;

mod address;
mod address_space;
#[cfg(any(test, feature = "software-emulation"))]
mod emulated;
mod error;
mod frame_alloc;
pub mod kernel_space;
mod numbers;
mod page_map;
mod sv39;
pub mod uaccess;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use error::{InvariantViolation, VmError};
pub use frame_alloc::FrameAllocator;
pub use numbers::{FrameNumber, PageNumber};
pub use page_map::{PageMap, PageMapDumper};
pub use sv39::{MAXVA, PAGE_SIZE, PageEntry, PageTable, PteFlags};

#[cfg(any(test, feature = "software-emulation"))]
pub use frame_alloc::EmulatedFrameAllocator;
