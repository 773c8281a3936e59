//! Mapped views of a [`SectionHandle`] in the process address space.

use std::ptr::NonNull;

use crate::error::{Error, ErrorKind, Result, fatal};
use crate::io::{Buffer, Buffers, ConstBuffer, ConstBuffers, Deadline, IoHandle, IoRequest};
use crate::section::{SectionFlags, SectionHandle};
use crate::utils;

/// A contiguous range of virtual addresses backed by a section.
///
/// The view borrows its section (and through it the backing file); the
/// compiler keeps both alive for the view's lifetime. Dropping the view
/// unmaps the range; a failed unmap aborts, since the address space is in an
/// unknown state afterwards.
#[derive(Debug)]
pub struct MapHandle<'s> {
    section: &'s SectionHandle<'s>,
    addr: NonNull<u8>,
    length: usize,
    offset: u64,
    flags: SectionFlags,
}

// The view is a region of plain memory; aliasing hazards are the caller's
// per the scatter-gather contract, same as for any Buffer.
unsafe impl Send for MapHandle<'_> {}
unsafe impl Sync for MapHandle<'_> {}

impl<'s> MapHandle<'s> {
    /// Map `bytes` of `section` starting at the page-aligned `offset`.
    ///
    /// `bytes == 0` maps through to the end of the section. Anonymous
    /// sections round `bytes` up to the page size; backed sections do not
    /// (the backing length is authoritative, and rounding would try to
    /// extend the file). The recorded length is what was actually mapped.
    pub fn new(
        section: &'s SectionHandle<'s>,
        bytes: usize,
        offset: u64,
        flags: SectionFlags,
    ) -> Result<MapHandle<'s>> {
        if offset % utils::page_size() as u64 != 0 || offset > section.length() {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        let mut bytes = if bytes == 0 {
            (section.length() - offset) as usize
        } else {
            bytes
        };
        if bytes == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        if section.is_anonymous() {
            bytes = utils::round_up_to_page_size(bytes as u64) as usize;
        }

        let addr = map_native(section, bytes, offset, flags)?;
        let map = MapHandle {
            section,
            addr,
            length: bytes,
            offset,
            flags,
        };

        if flags.contains(SectionFlags::PREFAULT) {
            map.prefault();
        }
        Ok(map)
    }

    /// The page-aligned start of the view.
    pub fn address(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// The mapped length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// The view's offset into its section.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The section this view was mapped from.
    pub fn section(&self) -> &'s SectionHandle<'s> {
        self.section
    }

    /// The native handle of the section's backing file, so I/O can be
    /// issued either through the view or through the file. Invalid for
    /// anonymous sections.
    pub fn native(&self) -> crate::native::NativeHandle {
        match self.section.backing() {
            Some(file) => file.handle().native(),
            None => crate::native::NativeHandle::invalid(),
        }
    }

    /// The access flags the view was mapped with.
    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    /// Commit a subrange: establish the protection named by `flags` and
    /// tell the kernel the pages are about to be used.
    ///
    /// The region is rounded outward to page boundaries; the rounded region
    /// is returned. Committing an already committed region is a no-op
    /// beyond the protection change, so repeating a commit is harmless.
    pub fn commit(&self, region: Buffer, flags: SectionFlags) -> Result<Buffer> {
        let (start, len) = self.page_rounded_outward(region)?;
        commit_native(start, len, flags)?;
        Ok(Buffer::new(start, len))
    }

    /// Decommit a subrange: drop its protection and tell the kernel the
    /// contents are no longer needed.
    pub fn decommit(&self, region: Buffer) -> Result<Buffer> {
        let (start, len) = self.page_rounded_outward(region)?;
        decommit_native(start, len)?;
        Ok(Buffer::new(start, len))
    }

    /// Zero a subrange. Page-aligned interior pages are hole-punched where
    /// the kernel offers that; the unaligned head and tail (and any interior
    /// the kernel refuses) are zeroed in memory.
    pub fn zero(&self, region: Buffer) -> Result<()> {
        let ptr = region.as_mut_ptr();
        if ptr.is_null() || !self.contains(ptr as usize, region.len()) {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        let start = ptr as usize;
        let end = start + region.len();
        let aligned_start = utils::round_up_to_page_size(start as u64) as usize;
        let aligned_end = utils::round_down_to_page_size(end as u64) as usize;

        if aligned_start >= aligned_end {
            // no whole page inside the region
            unsafe { std::ptr::write_bytes(ptr, 0, region.len()) };
            return Ok(());
        }
        unsafe {
            std::ptr::write_bytes(ptr, 0, aligned_start - start);
            if !punch_hole_native(aligned_start as *mut u8, aligned_end - aligned_start) {
                std::ptr::write_bytes(aligned_start as *mut u8, 0, aligned_end - aligned_start);
            }
            std::ptr::write_bytes(aligned_end as *mut u8, 0, end - aligned_end);
        }
        Ok(())
    }

    /// Discard the contents of a subrange without changing its protection.
    /// Subsequent reads see zeros or the old contents, never garbage.
    ///
    /// Where the kernel lacks a discard primitive the call still succeeds
    /// but the returned region has length zero — callers cannot distinguish
    /// "unsupported" from "empty" by design of the contract.
    pub fn do_not_store(&self, region: Buffer) -> Result<Buffer> {
        let ptr = region.as_mut_ptr();
        if ptr.is_null() || !self.contains(ptr as usize, region.len()) {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        // round inward: discarding beyond the region would lose live data
        let start = utils::round_up_to_page_size(ptr as u64) as usize;
        let end = utils::round_down_to_page_size(ptr as u64 + region.len() as u64) as usize;
        if start >= end {
            return Ok(Buffer::new(ptr, 0));
        }
        if discard_native(start as *mut u8, end - start) {
            Ok(Buffer::new(start as *mut u8, end - start))
        } else {
            Ok(Buffer::new(ptr, 0))
        }
    }

    /// Hint the kernel to populate the given regions ahead of use. A no-op
    /// where the platform offers nothing suitable.
    pub fn prefetch(regions: &[Buffer]) -> Result<()> {
        prefetch_native(regions);
        Ok(())
    }

    fn prefault(&self) {
        prefetch_native(&[Buffer::new(self.addr.as_ptr(), self.length)]);
        if !self
            .flags
            .intersects(SectionFlags::READ | SectionFlags::WRITE | SectionFlags::COW)
        {
            return;
        }
        // fallback for kernels that ignore the hint: touch a byte per page
        let pg = utils::page_size();
        let mut at = self.addr.as_ptr();
        let end = unsafe { at.add(self.length) };
        while at < end {
            unsafe { std::ptr::read_volatile(at) };
            at = unsafe { at.add(pg) };
        }
    }

    fn contains(&self, start: usize, len: usize) -> bool {
        let base = self.addr.as_ptr() as usize;
        start >= base && start.saturating_add(len) <= base + self.length
    }

    fn page_rounded_outward(&self, region: Buffer) -> Result<(*mut u8, usize)> {
        let ptr = region.as_mut_ptr();
        if ptr.is_null() || !self.contains(ptr as usize, region.len()) {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        let start = utils::round_down_to_page_size(ptr as u64) as usize;
        let end = utils::round_up_to_page_size(ptr as u64 + region.len() as u64) as usize;
        Ok((start as *mut u8, end - start))
    }
}

impl IoHandle for MapHandle<'_> {
    /// "Read" from the view: each buffer is redirected to point directly at
    /// the mapped bytes, with its length clamped to what the view still has.
    /// Buffers past the end of the view come back with zero length. Nothing
    /// is copied; the deadline is ignored.
    fn read(&self, req: IoRequest<Buffer>, _deadline: Deadline) -> Result<Buffers> {
        let mut bufs = req.buffers;
        let start = (req.offset).min(self.length as u64) as usize;
        let mut remaining = self.length - start;
        let mut at = unsafe { self.addr.as_ptr().add(start) };
        for b in &mut bufs {
            let take = b.len().min(remaining);
            b.set_ptr(at);
            b.set_len(take);
            at = unsafe { at.add(take) };
            remaining -= take;
        }
        Ok(bufs)
    }

    /// Copy the buffers into the view at the request's offset. Lengths are
    /// clamped to the view; the deadline is ignored.
    fn write(&self, req: IoRequest<ConstBuffer>, _deadline: Deadline) -> Result<ConstBuffers> {
        let mut bufs = req.buffers;
        let start = (req.offset).min(self.length as u64) as usize;
        let mut remaining = self.length - start;
        let mut at = unsafe { self.addr.as_ptr().add(start) };
        for b in &mut bufs {
            let take = b.len().min(remaining);
            unsafe { std::ptr::copy_nonoverlapping(b.as_ptr(), at, take) };
            b.set_len(take);
            at = unsafe { at.add(take) };
            remaining -= take;
        }
        Ok(bufs)
    }
}

impl Drop for MapHandle<'_> {
    fn drop(&mut self) {
        if !unmap_native(self.addr.as_ptr(), self.length) {
            fatal("unmap of a mapped view failed during destruction");
        }
    }
}

#[cfg(unix)]
fn protection_of(flags: SectionFlags) -> libc::c_int {
    let mut prot = libc::PROT_NONE;
    if flags.intersects(SectionFlags::WRITE | SectionFlags::COW) {
        prot = libc::PROT_READ | libc::PROT_WRITE;
    } else if flags.contains(SectionFlags::READ) {
        prot = libc::PROT_READ;
    }
    if flags.contains(SectionFlags::EXECUTE) {
        prot |= libc::PROT_EXEC;
    }
    prot
}

#[cfg(unix)]
fn map_native(
    section: &SectionHandle<'_>,
    bytes: usize,
    offset: u64,
    flags: SectionFlags,
) -> Result<NonNull<u8>> {
    use std::os::unix::io::AsRawFd;

    let prot = protection_of(flags);
    let mut mapflags = if flags.contains(SectionFlags::COW) {
        libc::MAP_PRIVATE
    } else {
        libc::MAP_SHARED
    };
    let fd = match section.backing() {
        Some(file) => file.as_raw_fd(),
        None => {
            mapflags |= libc::MAP_ANON;
            -1
        }
    };
    if prot == libc::PROT_NONE || flags.contains(SectionFlags::NOCOMMIT) {
        mapflags |= libc::MAP_NORESERVE;
    }

    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            bytes,
            prot,
            mapflags,
            fd,
            offset as libc::off_t,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    NonNull::new(addr as *mut u8).ok_or_else(|| Error::new(ErrorKind::Io))
}

#[cfg(unix)]
fn unmap_native(addr: *mut u8, len: usize) -> bool {
    unsafe { libc::munmap(addr as *mut libc::c_void, len) == 0 }
}

#[cfg(unix)]
fn commit_native(addr: *mut u8, len: usize, flags: SectionFlags) -> Result<()> {
    let rc = unsafe { libc::mprotect(addr as *mut libc::c_void, len, protection_of(flags)) };
    if rc != 0 {
        return Err(Error::last_os_error());
    }
    unsafe { libc::madvise(addr as *mut libc::c_void, len, libc::MADV_WILLNEED) };
    Ok(())
}

#[cfg(unix)]
fn decommit_native(addr: *mut u8, len: usize) -> Result<()> {
    unsafe { libc::madvise(addr as *mut libc::c_void, len, libc::MADV_DONTNEED) };
    let rc = unsafe { libc::mprotect(addr as *mut libc::c_void, len, libc::PROT_NONE) };
    if rc != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn punch_hole_native(addr: *mut u8, len: usize) -> bool {
    unsafe { libc::madvise(addr as *mut libc::c_void, len, libc::MADV_REMOVE) == 0 }
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn punch_hole_native(_addr: *mut u8, _len: usize) -> bool {
    false
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
fn discard_native(addr: *mut u8, len: usize) -> bool {
    unsafe { libc::madvise(addr as *mut libc::c_void, len, libc::MADV_FREE) == 0 }
}

#[cfg(all(
    unix,
    not(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))
))]
fn discard_native(_addr: *mut u8, _len: usize) -> bool {
    false
}

#[cfg(unix)]
fn prefetch_native(regions: &[Buffer]) {
    for r in regions {
        if !r.is_empty() {
            unsafe {
                libc::madvise(
                    r.as_mut_ptr() as *mut libc::c_void,
                    r.len(),
                    libc::MADV_WILLNEED,
                )
            };
        }
    }
}

#[cfg(windows)]
fn map_native(
    section: &SectionHandle<'_>,
    bytes: usize,
    offset: u64,
    flags: SectionFlags,
) -> Result<NonNull<u8>> {
    use windows_sys::Win32::System::Memory::{
        FILE_MAP_COPY, FILE_MAP_EXECUTE, FILE_MAP_READ, FILE_MAP_WRITE, MapViewOfFile,
    };

    let mut access = 0;
    if flags.contains(SectionFlags::COW) {
        access |= FILE_MAP_COPY;
    } else if flags.contains(SectionFlags::WRITE) {
        access |= FILE_MAP_READ | FILE_MAP_WRITE;
    } else if flags.contains(SectionFlags::READ) {
        access |= FILE_MAP_READ;
    }
    if flags.contains(SectionFlags::EXECUTE) {
        access |= FILE_MAP_EXECUTE;
    }

    let addr = unsafe {
        MapViewOfFile(
            section.native().handle(),
            access,
            (offset >> 32) as u32,
            offset as u32,
            bytes,
        )
    };
    NonNull::new(addr.Value as *mut u8).ok_or_else(Error::last_os_error)
}

#[cfg(windows)]
fn unmap_native(addr: *mut u8, _len: usize) -> bool {
    use windows_sys::Win32::System::Memory::{MEMORY_MAPPED_VIEW_ADDRESS, UnmapViewOfFile};
    let view = MEMORY_MAPPED_VIEW_ADDRESS {
        Value: addr as *mut core::ffi::c_void,
    };
    unsafe { UnmapViewOfFile(view) != 0 }
}

#[cfg(windows)]
fn commit_native(addr: *mut u8, len: usize, flags: SectionFlags) -> Result<()> {
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
        VirtualAlloc,
    };
    let protect = if flags.contains(SectionFlags::EXECUTE) {
        PAGE_EXECUTE_READWRITE
    } else if flags.intersects(SectionFlags::WRITE | SectionFlags::COW) {
        PAGE_READWRITE
    } else if flags.contains(SectionFlags::READ) {
        PAGE_READONLY
    } else {
        PAGE_NOACCESS
    };
    let done = unsafe { VirtualAlloc(addr as *mut core::ffi::c_void, len, MEM_COMMIT, protect) };
    if done.is_null() {
        return Err(Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
fn decommit_native(addr: *mut u8, len: usize) -> Result<()> {
    use windows_sys::Win32::System::Memory::{MEM_DECOMMIT, VirtualFree};
    if unsafe { VirtualFree(addr as *mut core::ffi::c_void, len, MEM_DECOMMIT) } == 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
fn punch_hole_native(_addr: *mut u8, _len: usize) -> bool {
    // zero-write fallback is taken instead
    false
}

#[cfg(windows)]
fn discard_native(addr: *mut u8, len: usize) -> bool {
    use windows_sys::Win32::System::Memory::{MEM_RESET, PAGE_READWRITE, VirtualAlloc};
    let done =
        unsafe { VirtualAlloc(addr as *mut core::ffi::c_void, len, MEM_RESET, PAGE_READWRITE) };
    !done.is_null()
}

#[cfg(windows)]
fn prefetch_native(regions: &[Buffer]) {
    use windows_sys::Win32::System::Memory::{PrefetchVirtualMemory, WIN32_MEMORY_RANGE_ENTRY};
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    let mut entries: Vec<WIN32_MEMORY_RANGE_ENTRY> = regions
        .iter()
        .filter(|r| !r.is_empty())
        .map(|r| WIN32_MEMORY_RANGE_ENTRY {
            VirtualAddress: r.as_mut_ptr() as *mut core::ffi::c_void,
            NumberOfBytes: r.len(),
        })
        .collect();
    if !entries.is_empty() {
        unsafe {
            PrefetchVirtualMemory(GetCurrentProcess(), entries.len(), entries.as_mut_ptr(), 0)
        };
    }
}
