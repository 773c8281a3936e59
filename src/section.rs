//! Kernel memory sections: a potentially shared region of memory backed by
//! a file or by the system paging file.
//!
//! On Windows a section is a real kernel object. On POSIX no such object
//! exists; the section is pure state (the descriptor of the backing file and
//! the agreed maximum size) and the kernel work happens at map time.

use bitflags::bitflags;

use crate::error::{Error, ErrorKind, Result};
use crate::file::FileHandle;
use crate::native::{Disposition, NativeHandle};
use crate::utils;

bitflags! {
    /// How a section (and the views mapped from it) may be accessed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SectionFlags: u32 {
        /// Views may be read.
        const READ = 1 << 0;
        /// Views may be written, and writes reach the backing.
        const WRITE = 1 << 1;
        /// Views may be written, but writes stay private to the view.
        const COW = 1 << 2;
        /// Views may be executed.
        const EXECUTE = 1 << 3;
        /// The backing is an executable image, not flat data.
        const EXECUTABLE_IMAGE = 1 << 4;
        /// Views reserve address space without committing storage.
        const NOCOMMIT = 1 << 5;
        /// Fault every page in at map time.
        const PREFAULT = 1 << 6;
        /// At most one map of this section exists at a time.
        const SINGLETON = 1 << 7;
    }
}

impl SectionFlags {
    /// Read plus write, the common case.
    pub fn read_write() -> Self {
        SectionFlags::READ | SectionFlags::WRITE
    }
}

/// A memory section, backed by a [`FileHandle`] or (when anonymous) by the
/// system paging file.
///
/// The backing file is borrowed: the compiler holds it alive for at least
/// the section's lifetime, and the section never closes it.
#[derive(Debug)]
pub struct SectionHandle<'f> {
    native: NativeHandle,
    backing: Option<&'f FileHandle>,
    length: u64,
    flags: SectionFlags,
}

impl<'f> SectionHandle<'f> {
    /// Create a section over `backing`, or an anonymous section when
    /// `backing` is `None`.
    ///
    /// A `maximum_size` of zero means "the backing file's current length";
    /// it is invalid for an anonymous section. Anonymous sizes are rounded
    /// up to the system page size.
    pub fn new(
        backing: Option<&'f FileHandle>,
        maximum_size: u64,
        flags: SectionFlags,
    ) -> Result<SectionHandle<'f>> {
        let length = match (maximum_size, backing) {
            (0, Some(file)) => file.length()?,
            (0, None) => return Err(Error::new(ErrorKind::InvalidArgument)),
            (size, Some(_)) => size,
            (size, None) => utils::round_up_to_page_size(size),
        };

        let native = create_native(backing, length, flags)?;
        Ok(SectionHandle {
            native,
            backing,
            length,
            flags,
        })
    }

    /// The backing file, if the section is not anonymous.
    pub fn backing(&self) -> Option<&'f FileHandle> {
        self.backing
    }

    /// Whether the section is backed by the paging file rather than a file.
    pub fn is_anonymous(&self) -> bool {
        self.backing.is_none()
    }

    /// The section's maximum size in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The access flags the section was created with.
    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    /// The kernel section object. Invalid on POSIX, where no such object
    /// exists.
    pub fn native(&self) -> NativeHandle {
        self.native
    }

    /// Grow or shrink the section to a page-rounded `new_size`. Returns the
    /// size actually set.
    ///
    /// On POSIX this only updates the stored length; the backing file is
    /// extended by the caller or lazily at the next map. On Windows the
    /// kernel object itself is resized.
    pub fn truncate(&mut self, new_size: u64) -> Result<u64> {
        let new_size = if self.backing.is_none() {
            utils::round_up_to_page_size(new_size)
        } else {
            new_size
        };
        self.resize_native(new_size)?;
        self.length = new_size;
        Ok(new_size)
    }

    #[cfg(unix)]
    fn resize_native(&mut self, _new_size: u64) -> Result<()> {
        Ok(())
    }

    #[cfg(windows)]
    fn resize_native(&mut self, new_size: u64) -> Result<()> {
        // Windows sections cannot shrink and extend by recreation.
        if new_size <= self.length {
            return Ok(());
        }
        let fresh = create_native(self.backing, new_size, self.flags)?;
        let old = std::mem::replace(&mut self.native, fresh);
        if old.is_valid() {
            use windows_sys::Win32::Foundation::CloseHandle;
            if unsafe { CloseHandle(old.handle()) } == 0 {
                return Err(Error::last_os_error());
            }
        }
        Ok(())
    }
}

#[cfg(windows)]
impl Drop for SectionHandle<'_> {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        if self.native.is_valid() && unsafe { CloseHandle(self.native.handle()) } == 0 {
            crate::error::fatal("close of a kernel section object failed during destruction");
        }
    }
}

#[cfg(unix)]
fn create_native(
    _backing: Option<&FileHandle>,
    _length: u64,
    flags: SectionFlags,
) -> Result<NativeHandle> {
    // no kernel object on POSIX; remember only what the flags grant
    let mut disposition = Disposition::SECTION;
    if flags.intersects(SectionFlags::READ | SectionFlags::COW) {
        disposition |= Disposition::READABLE;
    }
    if flags.intersects(SectionFlags::WRITE | SectionFlags::COW) {
        disposition |= Disposition::WRITABLE;
    }
    Ok(NativeHandle::from_fd(-1, disposition))
}

#[cfg(windows)]
fn create_native(
    backing: Option<&FileHandle>,
    length: u64,
    flags: SectionFlags,
) -> Result<NativeHandle> {
    use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;
    use windows_sys::Win32::System::Memory::{
        CreateFileMappingW, PAGE_EXECUTE_READ, PAGE_EXECUTE_WRITECOPY, PAGE_READONLY,
        PAGE_READWRITE, PAGE_WRITECOPY, SEC_COMMIT, SEC_IMAGE, SEC_RESERVE,
    };

    let mut protection = if flags.contains(SectionFlags::COW | SectionFlags::EXECUTE) {
        PAGE_EXECUTE_WRITECOPY
    } else if flags.contains(SectionFlags::EXECUTE) {
        PAGE_EXECUTE_READ
    } else if flags.contains(SectionFlags::COW) {
        PAGE_WRITECOPY
    } else if flags.contains(SectionFlags::WRITE) {
        PAGE_READWRITE
    } else if flags.contains(SectionFlags::READ) {
        if backing.is_some() {
            // SEC_RESERVE stops the mapping machinery auto-extending the file
            PAGE_READONLY | SEC_RESERVE
        } else {
            PAGE_READONLY
        }
    } else if backing.is_none() {
        PAGE_READWRITE | SEC_RESERVE
    } else {
        PAGE_READONLY
    };
    if flags.contains(SectionFlags::EXECUTABLE_IMAGE) {
        protection |= SEC_IMAGE;
    } else if protection & (SEC_RESERVE | SEC_IMAGE) == 0 {
        protection |= SEC_COMMIT;
    }

    let file = backing.map_or(INVALID_HANDLE_VALUE, |f| f.handle().native().handle());
    let h = unsafe {
        CreateFileMappingW(
            file,
            std::ptr::null(),
            protection,
            (length >> 32) as u32,
            length as u32,
            std::ptr::null(),
        )
    };
    if h.is_null() {
        return Err(Error::last_os_error());
    }

    let mut disposition = Disposition::SECTION;
    if flags.intersects(SectionFlags::READ | SectionFlags::COW) {
        disposition |= Disposition::READABLE;
    }
    if flags.intersects(SectionFlags::WRITE | SectionFlags::COW) {
        disposition |= Disposition::WRITABLE;
    }
    Ok(NativeHandle::from_handle(h, disposition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Caching, Creation, HandleFlags, Mode};
    use crate::utils::page_size;

    #[test]
    fn anonymous_section_requires_a_size() {
        let err = SectionHandle::new(None, 0, SectionFlags::read_write()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn anonymous_sizes_are_page_rounded() {
        let section = SectionHandle::new(None, 100, SectionFlags::read_write()).unwrap();
        assert!(section.is_anonymous());
        assert_eq!(section.length(), page_size() as u64);

        let mut section = section;
        section.truncate(page_size() as u64 + 1).unwrap();
        assert_eq!(section.length(), 2 * page_size() as u64);
    }

    #[test]
    fn zero_size_takes_the_backing_length() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileHandle::open(
            dir.path().join("b"),
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap();
        file.truncate(12345).unwrap();

        let section = SectionHandle::new(Some(&file), 0, SectionFlags::read_write()).unwrap();
        assert!(!section.is_anonymous());
        assert_eq!(section.length(), 12345);
    }
}
