//! The kernel's own page table.
//!
//! The kernel runs under a direct mapping: most kernel virtual addresses
//! equal the physical addresses they name, which lets the page-table code
//! dereference the frames it manipulates. The exceptions sit at the top of
//! the address space: the trampoline page and the per-process kernel stacks.
//!
//! The builder returns the table as an explicit [`PageMap`]; whoever boots
//! the machine owns it and decides when to install it with [`activate`].

use crate::{
    FrameAllocator, PageMap, PhysicalAddress, VirtualAddress,
    error::VmError,
    frame_alloc::zero_frame,
    sv39::{MAXVA, PAGE_SIZE, PteFlags},
};

/// QEMU virt UART registers.
pub const UART0: usize = 0x1000_0000;

/// QEMU virt virtio MMIO disk interface.
pub const VIRTIO0: usize = 0x1000_1000;

/// QEMU virt platform-level interrupt controller.
pub const PLIC: usize = 0x0c00_0000;
const PLIC_SIZE: usize = 0x40_0000;

/// Physical address where the kernel image is loaded.
pub const KERNBASE: usize = 0x8000_0000;

/// End of the RAM the kernel manages, 128 MiB above the load address.
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

/// Highest virtual page, mapped to the trampoline code in both the kernel
/// table and every user table.
pub const TRAMPOLINE: usize = MAXVA - PAGE_SIZE;

/// Physical placement of the kernel image, supplied by the boot code from
/// linker symbols.
pub struct KernelLayout {
    /// First address past the kernel text. Text is mapped read-execute,
    /// everything from here to `ram_end` read-write.
    pub text_end: PhysicalAddress,
    /// First address past the managed RAM.
    pub ram_end: PhysicalAddress,
    /// Frame holding the trampoline code, part of the text section.
    pub trampoline: PhysicalAddress,
    /// Number of process slots to lay kernel stacks out for.
    pub process_slots: usize,
}

/// Returns the virtual base of the kernel stack for process slot `slot`.
///
/// Stacks hang below the trampoline, each followed downward by an unmapped
/// guard page so an overflow faults instead of corrupting the next stack.
pub const fn kernel_stack(slot: usize) -> VirtualAddress {
    VirtualAddress::new(TRAMPOLINE - (slot + 1) * 2 * PAGE_SIZE)
}

/// Builds the kernel page table for the given image layout.
///
/// Direct-maps the UART, virtio and PLIC device windows read-write, the
/// kernel text read-execute, and the rest of RAM read-write, then maps the
/// trampoline page at the top of the address space and one kernel stack per
/// process slot below it. Nothing here carries the user bit.
pub fn build(layout: &KernelLayout, allocator: &mut dyn FrameAllocator) -> Result<PageMap, VmError> {
    log::trace!(
        "building kernel page table: text ends at {}, ram ends at {}",
        layout.text_end,
        layout.ram_end
    );
    let mut map = PageMap::allocate(allocator)?;

    let rw = PteFlags::read_write();
    let rx = PteFlags::read_execute();

    direct_map(&mut map, UART0, PAGE_SIZE, rw, allocator)?;
    direct_map(&mut map, VIRTIO0, PAGE_SIZE, rw, allocator)?;
    direct_map(&mut map, PLIC, PLIC_SIZE, rw, allocator)?;

    let text_end = layout.text_end.as_usize();
    direct_map(&mut map, KERNBASE, text_end - KERNBASE, rx, allocator)?;
    direct_map(
        &mut map,
        text_end,
        layout.ram_end.as_usize() - text_end,
        rw,
        allocator,
    )?;

    map.map_pages(
        VirtualAddress::new(TRAMPOLINE),
        PAGE_SIZE,
        layout.trampoline,
        rx,
        allocator,
    )?;

    map_kernel_stacks(&mut map, layout.process_slots, allocator)?;

    Ok(map)
}

fn direct_map(
    map: &mut PageMap,
    addr: usize,
    size: usize,
    flags: PteFlags,
    allocator: &mut dyn FrameAllocator,
) -> Result<(), VmError> {
    map.map_pages(
        VirtualAddress::new(addr),
        size,
        PhysicalAddress::new(addr),
        flags,
        allocator,
    )
}

/// Allocates and maps one kernel stack per process slot.
///
/// Each stack is a single zeroed frame mapped read-write at
/// [`kernel_stack`]`(slot)`; the page below stays unmapped as a guard.
fn map_kernel_stacks(
    map: &mut PageMap,
    slots: usize,
    allocator: &mut dyn FrameAllocator,
) -> Result<(), VmError> {
    for slot in 0..slots {
        let frame = allocator.allocate_frame().ok_or(VmError::OutOfFrames)?;
        zero_frame(frame);
        map.map_pages(
            kernel_stack(slot),
            PAGE_SIZE,
            frame,
            PteFlags::read_write(),
            allocator,
        )?;
    }
    Ok(())
}

/// Returns the `satp` value selecting Sv39 translation through `map`.
pub fn satp_value(map: &PageMap) -> usize {
    const SATP_MODE_SV39: usize = 8 << 60;
    SATP_MODE_SV39 | (map.root().as_usize() >> 12)
}

/// Installs `map` as this hart's page table and flushes the TLB.
///
/// # Safety
///
/// The map must direct-map the currently executing kernel image, and it must
/// stay alive for as long as it is installed.
#[cfg(target_arch = "riscv64")]
pub unsafe fn activate(map: &PageMap) {
    // Wait for any prior page-table writes to land before switching.
    riscv::asm::sfence_vma_all();
    // SAFETY: the caller guarantees the map covers the running kernel.
    unsafe {
        riscv::register::satp::set(
            riscv::register::satp::Mode::Sv39,
            0,
            map.root().as_usize() >> 12,
        );
    }
    riscv::asm::sfence_vma_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressTranslator, EmulatedFrameAllocator};

    fn setup() -> EmulatedFrameAllocator {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(4 * 1024 * 1024));
        }
        EmulatedFrameAllocator::new()
    }

    // A small image keeps the leaf count manageable in tests.
    fn small_layout() -> KernelLayout {
        KernelLayout {
            text_end: PhysicalAddress::new(KERNBASE + 4 * PAGE_SIZE),
            ram_end: PhysicalAddress::new(KERNBASE + 16 * PAGE_SIZE),
            trampoline: PhysicalAddress::new(KERNBASE + 2 * PAGE_SIZE),
            process_slots: 4,
        }
    }

    #[test]
    fn devices_are_direct_mapped_read_write() {
        let mut allocator = setup();
        let map = build(&small_layout(), &mut allocator).expect("kernel table");

        for addr in [UART0, VIRTIO0, PLIC, PLIC + PLIC_SIZE - PAGE_SIZE] {
            let entry = map
                .lookup(VirtualAddress::new(addr))
                .expect("device mapping");
            assert_eq!(entry.address(), Some(PhysicalAddress::new(addr)));
            assert!(entry.flags().is_writable());
            assert!(!entry.flags().is_executable());
            assert!(!entry.flags().is_user());
        }
    }

    #[test]
    fn text_is_executable_and_data_is_writable() {
        let mut allocator = setup();
        let layout = small_layout();
        let map = build(&layout, &mut allocator).expect("kernel table");

        let text = map
            .lookup(VirtualAddress::new(KERNBASE))
            .expect("text mapping");
        assert!(text.flags().is_executable());
        assert!(!text.flags().is_writable());

        let data = map
            .lookup(VirtualAddress::new(layout.text_end.as_usize()))
            .expect("data mapping");
        assert!(data.flags().is_writable());
        assert!(!data.flags().is_executable());

        // The direct map stops at the end of RAM.
        assert!(
            map.lookup(VirtualAddress::new(layout.ram_end.as_usize()))
                .is_none()
        );
    }

    #[test]
    fn trampoline_sits_in_the_highest_page() {
        let mut allocator = setup();
        let layout = small_layout();
        let map = build(&layout, &mut allocator).expect("kernel table");

        let entry = map
            .lookup(VirtualAddress::new(TRAMPOLINE))
            .expect("trampoline mapping");
        assert_eq!(entry.address(), Some(layout.trampoline));
        assert!(entry.flags().is_executable());
        assert_eq!(TRAMPOLINE, MAXVA - PAGE_SIZE);
    }

    #[test]
    fn nothing_in_the_kernel_table_is_user_accessible() {
        let mut allocator = setup();
        let map = build(&small_layout(), &mut allocator).expect("kernel table");
        for addr in [UART0, PLIC, KERNBASE, TRAMPOLINE] {
            assert_eq!(map.translate_user(VirtualAddress::new(addr)), None);
        }
    }

    #[test]
    fn kernel_stacks_descend_with_guard_gaps() {
        let mut allocator = setup();
        let map = build(&small_layout(), &mut allocator).expect("kernel table");

        for slot in 0..4 {
            let base = kernel_stack(slot);
            let entry = map.lookup(base).expect("stack mapping");
            assert!(entry.flags().is_writable());
            // Guard page below each stack stays unmapped.
            let guard = VirtualAddress::new(base.as_usize() - PAGE_SIZE);
            assert!(map.lookup(guard).map(|e| e.is_valid()) != Some(true));
        }
        assert_eq!(
            kernel_stack(0).as_usize(),
            TRAMPOLINE - 2 * PAGE_SIZE
        );
        assert_eq!(
            kernel_stack(1).as_usize(),
            TRAMPOLINE - 4 * PAGE_SIZE
        );
    }

    #[test]
    fn satp_selects_sv39_and_the_root_frame() {
        let mut allocator = setup();
        let map = build(&small_layout(), &mut allocator).expect("kernel table");

        let satp = satp_value(&map);
        assert_eq!(satp >> 60, 8);
        assert_eq!((satp & ((1 << 44) - 1)) << 12, map.root().as_usize());
    }
}
