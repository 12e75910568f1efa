//! Copying between kernel buffers and user address spaces.
//!
//! The kernel runs with its own page table, so user pointers cannot be
//! dereferenced directly. These routines resolve user addresses through the
//! process [`PageMap`] one page at a time and refuse anything that is not
//! mapped user-accessible, which is what makes a bad user pointer an error
//! instead of a kernel fault.

use crate::{
    AddressTranslator, PageMap, VirtualAddress,
    error::VmError,
    sv39::PAGE_SIZE,
};

/// Copies `src` into the user address space at `dst`.
///
/// Fails with [`VmError::BadAddress`] if any touched page is not mapped
/// user-accessible; bytes copied before the failure stay written.
pub fn copy_out(map: &PageMap, dst: VirtualAddress, src: &[u8]) -> Result<(), VmError> {
    let translator = AddressTranslator::current();

    let mut remaining = src;
    let mut va = dst;
    while !remaining.is_empty() {
        let page_base = va.align_down(PAGE_SIZE);
        let frame = map.translate_user(page_base).ok_or(VmError::BadAddress)?;
        let offset = va.as_usize() - page_base.as_usize();
        let count = remaining.len().min(PAGE_SIZE - offset);

        let ptr = translator.phys_to_ptr::<u8>(frame.as_usize() + offset);
        // SAFETY: the translation proved the frame is mapped for this user
        // page and `count` stays within it.
        unsafe {
            core::ptr::copy_nonoverlapping(remaining.as_ptr(), ptr, count);
        }

        remaining = &remaining[count..];
        va = page_base + PAGE_SIZE;
    }
    Ok(())
}

/// Fills `dst` from the user address space starting at `src`.
///
/// Fails with [`VmError::BadAddress`] if any touched page is not mapped
/// user-accessible.
pub fn copy_in(map: &PageMap, dst: &mut [u8], src: VirtualAddress) -> Result<(), VmError> {
    let translator = AddressTranslator::current();

    let mut filled = 0;
    let mut va = src;
    while filled < dst.len() {
        let page_base = va.align_down(PAGE_SIZE);
        let frame = map.translate_user(page_base).ok_or(VmError::BadAddress)?;
        let offset = va.as_usize() - page_base.as_usize();
        let count = (dst.len() - filled).min(PAGE_SIZE - offset);

        let ptr = translator.phys_to_ptr::<u8>(frame.as_usize() + offset);
        // SAFETY: the translation proved the frame is mapped for this user
        // page and `count` stays within it.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr, dst[filled..].as_mut_ptr(), count);
        }

        filled += count;
        va = page_base + PAGE_SIZE;
    }
    Ok(())
}

/// Copies a NUL-terminated string from the user address space into `dst`.
///
/// On success the terminator has been copied too, and the returned count
/// includes it. Fails with [`VmError::BadAddress`] if a touched page is not
/// mapped user-accessible or if `dst` fills up before a terminator appears.
pub fn copy_in_str(map: &PageMap, dst: &mut [u8], src: VirtualAddress) -> Result<usize, VmError> {
    let translator = AddressTranslator::current();

    let mut filled = 0;
    let mut va = src;
    loop {
        if filled == dst.len() {
            return Err(VmError::BadAddress);
        }
        let page_base = va.align_down(PAGE_SIZE);
        let frame = map.translate_user(page_base).ok_or(VmError::BadAddress)?;
        let offset = va.as_usize() - page_base.as_usize();
        let count = (dst.len() - filled).min(PAGE_SIZE - offset);

        let ptr = translator.phys_to_ptr::<u8>(frame.as_usize() + offset);
        // SAFETY: the translation proved the frame is mapped for this user
        // page and `count` stays within it.
        let chunk = unsafe { core::slice::from_raw_parts(ptr, count) };

        if let Some(nul) = chunk.iter().position(|byte| *byte == 0) {
            dst[filled..filled + nul + 1].copy_from_slice(&chunk[..=nul]);
            return Ok(filled + nul + 1);
        }
        dst[filled..filled + count].copy_from_slice(chunk);

        filled += count;
        va = page_base + PAGE_SIZE;
    }
}
