//! Owning wrapper over a [`NativeHandle`] with caching and lifetime flags.

use bitflags::bitflags;
use log::error;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};

use crate::error::{Error, ErrorKind, Result, fatal};
use crate::native::{Disposition, NativeHandle};

/// What access the handle is opened for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Mode {
    /// No data access; the handle exists to name the entry.
    None,
    /// Metadata may be read.
    AttrRead,
    /// Metadata may be read and written.
    AttrWrite,
    /// Data may be read.
    Read,
    /// Data may be read and written.
    Write,
    /// Data may be written, but not read; every write lands at the end of
    /// the file.
    Append,
}

/// How the entry is brought into existence on open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Creation {
    /// Fail unless the entry already exists.
    OpenExisting,
    /// Fail if the entry already exists.
    OnlyIfNotExist,
    /// Create the entry if missing, open it otherwise.
    IfNeeded,
    /// Open the existing entry and discard its contents.
    Truncate,
}

/// How much the kernel may cache on the handle's behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Caching {
    /// No caching at all; reads and writes go straight to storage and must
    /// be aligned.
    None,
    /// Only metadata is cached; data I/O must be aligned.
    OnlyMetadata,
    /// Reads are cached; writes reach storage before the call returns.
    Reads,
    /// Everything is cached (the platform default).
    All,
    /// Everything is cached, and the library fsyncs at safety points.
    SafetyFsyncs,
    /// Everything is cached and the OS is hinted to flush as lazily as it
    /// likes. For files that will shortly be deleted.
    Temporary,
}

bitflags! {
    /// Per-handle behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HandleFlags: u32 {
        /// Unlink the entry when the last handle closes. POSIX unlinks at
        /// open; Windows uses delete-on-close.
        const UNLINK_ON_CLOSE = 1 << 0;
        /// Suppress the fsyncs implied by [`Caching::SafetyFsyncs`].
        const DISABLE_SAFETY_FSYNCS = 1 << 1;
        /// Open for asynchronous (overlapped / AIO) use.
        const OVERLAPPED = 1 << 2;
        /// Emulate insane POSIX byte-range lock semantics on platforms that
        /// have saner ones.
        const BYTE_LOCK_INSANITY = 1 << 3;
    }
}

/// Exclusive owner of a [`NativeHandle`].
///
/// Move-only. Closing may fail and the error surfaces; if the handle is
/// still open when dropped and the close fails there, the process aborts —
/// there is nobody left to report the leak to.
#[derive(Debug)]
pub struct Handle {
    native: NativeHandle,
    caching: Caching,
    flags: HandleFlags,
}

impl Handle {
    pub(crate) fn from_parts(native: NativeHandle, caching: Caching, flags: HandleFlags) -> Self {
        Handle {
            native,
            caching,
            flags,
        }
    }

    /// The wrapped kernel handle and its capability bits.
    pub fn native(&self) -> NativeHandle {
        self.native
    }

    /// The caching contract this handle was opened with.
    pub fn caching(&self) -> Caching {
        self.caching
    }

    /// The behaviour flags this handle was opened with.
    pub fn flags(&self) -> HandleFlags {
        self.flags
    }

    /// Whether the handle is still open.
    pub fn is_valid(&self) -> bool {
        self.native.is_valid()
    }

    /// Whether reads are permitted.
    pub fn is_readable(&self) -> bool {
        self.native.is_readable()
    }

    /// Whether writes are permitted.
    pub fn is_writable(&self) -> bool {
        self.native.is_writable()
    }

    /// Whether the handle was opened for asynchronous use.
    pub fn is_overlapped(&self) -> bool {
        self.native.is_overlapped()
    }

    /// Close the handle. Idempotent: closing a closed handle is a no-op.
    ///
    /// When the caching contract is [`Caching::SafetyFsyncs`] and the handle
    /// is writable, the file is fsynced first unless
    /// [`HandleFlags::DISABLE_SAFETY_FSYNCS`] is set.
    pub fn close(&mut self) -> Result<()> {
        if !self.native.is_valid() {
            return Ok(());
        }
        if self.caching == Caching::SafetyFsyncs
            && self.native.is_writable()
            && !self.flags.contains(HandleFlags::DISABLE_SAFETY_FSYNCS)
        {
            self.barrier()?;
        }
        let result = close_native(&self.native);
        self.native.invalidate();
        result
    }

    /// Flush cached writes to storage.
    pub fn barrier(&self) -> Result<()> {
        #[cfg(unix)]
        {
            nix::unistd::fsync(unsafe { BorrowedFd::borrow_raw(self.native.fd) })?;
            Ok(())
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::Storage::FileSystem::FlushFileBuffers;
            if unsafe { FlushFileBuffers(self.native.h) } == 0 {
                return Err(Error::last_os_error());
            }
            Ok(())
        }
    }

    /// Duplicate the kernel handle. The clone carries identical capability
    /// bits and an independent lifetime.
    pub fn clone_handle(&self) -> Result<Handle> {
        if !self.native.is_valid() {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        let native = duplicate_native(&self.native)?;
        Ok(Handle {
            native,
            caching: self.caching,
            flags: self.flags,
        })
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.native.is_valid() {
            return;
        }
        if let Err(err) = self.close() {
            error!("failed to close owned handle in drop: {err}");
            fatal("close of an owned kernel handle failed during destruction");
        }
    }
}

#[cfg(unix)]
impl AsRawFd for Handle {
    fn as_raw_fd(&self) -> RawFd {
        self.native.fd
    }
}

#[cfg(unix)]
impl std::os::fd::AsFd for Handle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(self.native.fd) }
    }
}

#[cfg(unix)]
fn close_native(native: &NativeHandle) -> Result<()> {
    // close is never retried on EINTR: the descriptor state is unspecified
    // after an interrupted close and a retry can close a stranger's fd.
    if unsafe { libc::close(native.fd) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
fn close_native(native: &NativeHandle) -> Result<()> {
    use windows_sys::Win32::Foundation::CloseHandle;
    if unsafe { CloseHandle(native.h) } == 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
fn duplicate_native(native: &NativeHandle) -> Result<NativeHandle> {
    let fd = unsafe { libc::fcntl(native.fd, libc::F_DUPFD_CLOEXEC, 0) };
    if fd < 0 {
        return Err(Error::last_os_error());
    }
    Ok(NativeHandle::from_fd(fd, native.disposition()))
}

#[cfg(windows)]
fn duplicate_native(native: &NativeHandle) -> Result<NativeHandle> {
    use windows_sys::Win32::Foundation::{DUPLICATE_SAME_ACCESS, DuplicateHandle};
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    let mut out = std::ptr::null_mut();
    let ok = unsafe {
        DuplicateHandle(
            GetCurrentProcess(),
            native.h,
            GetCurrentProcess(),
            &mut out,
            0,
            0,
            DUPLICATE_SAME_ACCESS,
        )
    };
    if ok == 0 {
        return Err(Error::last_os_error());
    }
    Ok(NativeHandle::from_handle(out, native.disposition()))
}

/// Translate a [`Mode`] into capability bits. Shared by the platform open
/// leaves.
pub(crate) fn mode_disposition(mode: Mode) -> Disposition {
    match mode {
        Mode::None => Disposition::empty(),
        Mode::AttrRead | Mode::AttrWrite => Disposition::empty(),
        Mode::Read => Disposition::READABLE | Disposition::SEEKABLE,
        Mode::Write => Disposition::READABLE | Disposition::WRITABLE | Disposition::SEEKABLE,
        Mode::Append => Disposition::WRITABLE | Disposition::APPEND,
    }
}
