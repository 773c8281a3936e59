//! The raw kernel handle and its acquired capabilities.

use bitflags::bitflags;

#[cfg(unix)]
use std::os::unix::io::RawFd;

#[cfg(windows)]
use windows_sys::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};

bitflags! {
    /// What the underlying resource was opened for. Mirrors the flags passed
    /// at open time and never changes after construction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Disposition: u32 {
        /// Reads are permitted.
        const READABLE = 1 << 0;
        /// Writes are permitted.
        const WRITABLE = 1 << 1;
        /// The handle has a file position and supports offsets.
        const SEEKABLE = 1 << 2;
        /// Writes always land at the end.
        const APPEND = 1 << 3;
        /// Opened non-blocking.
        const NONBLOCKING = 1 << 4;
        /// Opened for asynchronous (overlapped / AIO) use.
        const OVERLAPPED = 1 << 5;
        /// The handle names a kernel memory section, not a file.
        const SECTION = 1 << 6;
        /// I/O must be aligned (caching disabled at open).
        const ALIGNED_IO = 1 << 7;
    }
}

/// An opaque kernel handle plus its [`Disposition`]. Plain value type; owns
/// nothing. Ownership and release live in [`crate::Handle`].
#[derive(Clone, Copy, Debug)]
pub struct NativeHandle {
    #[cfg(unix)]
    pub(crate) fd: RawFd,
    #[cfg(windows)]
    pub(crate) h: HANDLE,
    disposition: Disposition,
}

// On Windows HANDLE is a raw pointer; it is an opaque token, not memory.
#[cfg(windows)]
unsafe impl Send for NativeHandle {}
#[cfg(windows)]
unsafe impl Sync for NativeHandle {}

impl NativeHandle {
    /// The sentinel for "no handle".
    pub fn invalid() -> Self {
        NativeHandle {
            #[cfg(unix)]
            fd: -1,
            #[cfg(windows)]
            h: INVALID_HANDLE_VALUE,
            disposition: Disposition::empty(),
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_fd(fd: RawFd, disposition: Disposition) -> Self {
        NativeHandle { fd, disposition }
    }

    #[cfg(windows)]
    pub(crate) fn from_handle(h: HANDLE, disposition: Disposition) -> Self {
        NativeHandle { h, disposition }
    }

    /// Whether this holds a live kernel handle.
    pub fn is_valid(&self) -> bool {
        #[cfg(unix)]
        {
            self.fd >= 0
        }
        #[cfg(windows)]
        {
            self.h != INVALID_HANDLE_VALUE && !self.h.is_null()
        }
    }

    /// The capability bits acquired at open time.
    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// Whether reads are permitted.
    pub fn is_readable(&self) -> bool {
        self.disposition.contains(Disposition::READABLE)
    }

    /// Whether writes are permitted.
    pub fn is_writable(&self) -> bool {
        self.disposition.contains(Disposition::WRITABLE)
    }

    /// Whether the handle was opened for asynchronous use.
    pub fn is_overlapped(&self) -> bool {
        self.disposition.contains(Disposition::OVERLAPPED)
    }

    /// The raw file descriptor.
    #[cfg(unix)]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The raw kernel handle.
    #[cfg(windows)]
    pub fn handle(&self) -> HANDLE {
        self.h
    }

    pub(crate) fn invalidate(&mut self) {
        #[cfg(unix)]
        {
            self.fd = -1;
        }
        #[cfg(windows)]
        {
            self.h = INVALID_HANDLE_VALUE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle_has_no_capabilities() {
        let h = NativeHandle::invalid();
        assert!(!h.is_valid());
        assert!(!h.is_readable());
        assert!(!h.is_writable());
        assert_eq!(h.disposition(), Disposition::empty());
    }

    #[cfg(unix)]
    #[test]
    fn disposition_is_preserved() {
        let h = NativeHandle::from_fd(3, Disposition::READABLE | Disposition::SEEKABLE);
        assert!(h.is_valid());
        assert!(h.is_readable());
        assert!(!h.is_writable());
        let mut h = h;
        h.invalidate();
        assert!(!h.is_valid());
        // capability bits survive invalidation; they describe the open, not the fd
        assert!(h.is_readable());
    }
}
