//! File handles: the open family and synchronous scatter-gather I/O.

use std::path::{Path, PathBuf};

#[cfg(unix)]
use log::warn;

use crate::error::{Error, ErrorKind, Result};
use crate::handle::{Caching, Creation, Handle, HandleFlags, Mode, mode_disposition};
use crate::io::{Buffer, Buffers, ConstBuffer, ConstBuffers, Deadline, IoHandle, IoRequest};
use crate::native::{Disposition, NativeHandle};
use crate::utils;

#[cfg(unix)]
use std::ffi::CString;
#[cfg(unix)]
use std::os::unix::ffi::OsStrExt;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};

/// A [`Handle`] to a filesystem entry, carrying the entry's stable identity
/// `(device, inode)` captured at open time plus the best-known path.
///
/// The path is not refreshed if the file is renamed behind the handle.
#[derive(Debug)]
pub struct FileHandle {
    handle: Handle,
    devid: u64,
    inode: u64,
    path: PathBuf,
}

impl FileHandle {
    /// Open a file.
    ///
    /// The returned handle's capability bits mirror `mode` and `flags`.
    /// With [`HandleFlags::UNLINK_ON_CLOSE`], POSIX unlinks the entry
    /// immediately (the inode lives on until the last handle closes);
    /// Windows marks the handle delete-on-close.
    pub fn open(
        path: impl AsRef<Path>,
        mode: Mode,
        creation: Creation,
        caching: Caching,
        flags: HandleFlags,
    ) -> Result<FileHandle> {
        let path = path.as_ref();
        let native = open_native(path, mode, creation, caching, flags)?;
        let handle = Handle::from_parts(native, caching, flags);
        let (devid, inode) = file_identity(&handle)?;

        #[cfg(unix)]
        if flags.contains(HandleFlags::UNLINK_ON_CLOSE) {
            if let Err(err) = unlink_path(path) {
                warn!("unlink-on-close: could not unlink {path:?}: {err}");
            }
        }

        Ok(FileHandle {
            handle,
            devid,
            inode,
            path: path.to_owned(),
        })
    }

    /// Create a randomly named file in `dir`.
    ///
    /// The file is opened with [`Creation::OnlyIfNotExist`] so it never
    /// collides with an existing entry; on collision a fresh 32-character
    /// name is tried. Every other error surfaces.
    pub fn random_file(
        dir: impl AsRef<Path>,
        mode: Mode,
        caching: Caching,
        flags: HandleFlags,
    ) -> Result<FileHandle> {
        let dir = dir.as_ref();
        loop {
            let name = utils::random_string(32);
            match FileHandle::open(
                dir.join(name),
                mode,
                Creation::OnlyIfNotExist,
                caching,
                flags,
            ) {
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                other => return other,
            }
        }
    }

    /// Create or open `name` in the platform temporary directory. An empty
    /// `name` creates a randomly named file instead.
    ///
    /// Callers conventionally pass [`HandleFlags::UNLINK_ON_CLOSE`] so the
    /// file disappears with its last handle, and [`Caching::Temporary`] so
    /// the OS flushes it as lazily as possible. If the file's path is never
    /// handed to another process, prefer [`FileHandle::temp_inode`].
    pub fn temp_file(
        name: Option<&Path>,
        mode: Mode,
        creation: Creation,
        caching: Caching,
        flags: HandleFlags,
    ) -> Result<FileHandle> {
        let dir = utils::temp_directory();
        match name {
            None => FileHandle::random_file(dir, mode, caching, flags),
            Some(name) => FileHandle::open(dir.join(name), mode, creation, caching, flags),
        }
    }

    /// Create an anonymous inode in the filesystem holding `dir`.
    ///
    /// The inode has no name and no accessible path; it ceases to exist
    /// when the last handle closes. Linux uses `O_TMPFILE`; elsewhere a
    /// randomly named file is created exclusively and unlinked before this
    /// function returns.
    pub fn temp_inode(dir: impl AsRef<Path>, mode: Mode, flags: HandleFlags) -> Result<FileHandle> {
        let dir = dir.as_ref();

        #[cfg(any(target_os = "linux", target_os = "android"))]
        match open_tmpfile(dir, mode, flags) {
            Ok(handle) => {
                let (devid, inode) = file_identity(&handle)?;
                return Ok(FileHandle {
                    handle,
                    devid,
                    inode,
                    path: PathBuf::new(),
                });
            }
            // filesystems without O_TMPFILE report EOPNOTSUPP or EISDIR
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::Unsupported | ErrorKind::IsADirectory | ErrorKind::InvalidArgument
                ) => {}
            Err(err) => return Err(err),
        }

        // Windows has no anonymous inodes; the nearest thing is an
        // exclusively created file marked delete-on-close.
        #[cfg(windows)]
        let flags = flags | HandleFlags::UNLINK_ON_CLOSE;

        loop {
            let name = utils::random_string(32);
            let path = dir.join(name);
            let mut file = match FileHandle::open(
                &path,
                mode,
                Creation::OnlyIfNotExist,
                Caching::Temporary,
                flags,
            ) {
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                other => other?,
            };
            // open already unlinked it when the caller asked for that
            if !flags.contains(HandleFlags::UNLINK_ON_CLOSE) {
                if let Err(err) = unlink_path(&path) {
                    let _ = file.handle.close();
                    return Err(err);
                }
            }
            file.path = PathBuf::new();
            return Ok(file);
        }
    }

    /// Duplicate the kernel handle. The clone shares the open file
    /// description and carries the same identity and path.
    pub fn clone_handle(&self) -> Result<FileHandle> {
        Ok(FileHandle {
            handle: self.handle.clone_handle()?,
            devid: self.devid,
            inode: self.inode,
            path: self.path.clone(),
        })
    }

    /// The best-known path at open time. Empty for anonymous inodes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Device identifier captured at open time.
    pub fn device_id(&self) -> u64 {
        self.devid
    }

    /// Inode (file index on Windows) captured at open time.
    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// The owning [`Handle`].
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The owning [`Handle`], mutably.
    pub fn handle_mut(&mut self) -> &mut Handle {
        &mut self.handle
    }

    /// Current length of the file in bytes.
    pub fn length(&self) -> Result<u64> {
        #[cfg(unix)]
        {
            let st = nix::sys::stat::fstat(&self.handle)?;
            Ok(st.st_size as u64)
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::Storage::FileSystem::GetFileSizeEx;
            let mut size = 0i64;
            if unsafe { GetFileSizeEx(self.handle.native().handle(), &mut size) } == 0 {
                return Err(Error::last_os_error());
            }
            Ok(size as u64)
        }
    }

    /// Set the length of the file, extending with zeros or discarding the
    /// tail. Returns the new length.
    pub fn truncate(&self, new_size: u64) -> Result<u64> {
        #[cfg(unix)]
        {
            nix::unistd::ftruncate(&self.handle, new_size as libc::off_t)?;
            Ok(new_size)
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::Storage::FileSystem::{
                FILE_BEGIN, SetEndOfFile, SetFilePointerEx,
            };
            let h = self.handle.native().handle();
            let ok = unsafe { SetFilePointerEx(h, new_size as i64, std::ptr::null_mut(), FILE_BEGIN) };
            if ok == 0 || unsafe { SetEndOfFile(h) } == 0 {
                return Err(Error::last_os_error());
            }
            Ok(new_size)
        }
    }
}

impl IoHandle for FileHandle {
    /// Plain file reads cannot be given a timeout on POSIX; the deadline is
    /// accepted for interface symmetry. Overlapped Windows handles honour it.
    fn read(&self, req: IoRequest<Buffer>, deadline: Deadline) -> Result<Buffers> {
        read_native(&self.handle, req, deadline)
    }

    fn write(&self, req: IoRequest<ConstBuffer>, deadline: Deadline) -> Result<ConstBuffers> {
        write_native(&self.handle, req, deadline)
    }
}

#[cfg(unix)]
impl AsRawFd for FileHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.handle.as_raw_fd()
    }
}

#[cfg(unix)]
impl std::os::fd::AsFd for FileHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        std::os::fd::AsFd::as_fd(&self.handle)
    }
}

pub(crate) fn file_identity(handle: &Handle) -> Result<(u64, u64)> {
    #[cfg(unix)]
    {
        let st = nix::sys::stat::fstat(handle)?;
        Ok((st.st_dev as u64, st.st_ino as u64))
    }
    #[cfg(windows)]
    {
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
        if unsafe { GetFileInformationByHandle(handle.native().handle(), &mut info) } == 0 {
            return Err(Error::last_os_error());
        }
        let inode = ((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64;
        Ok((info.dwVolumeSerialNumber as u64, inode))
    }
}

#[cfg(unix)]
fn unlink_path(path: &Path) -> Result<()> {
    let c = cstring_of(path)?;
    if unsafe { libc::unlink(c.as_ptr()) } < 0 {
        return Err(Error::last_os_error().with_path(path));
    }
    Ok(())
}

#[cfg(windows)]
fn unlink_path(_path: &Path) -> Result<()> {
    // delete-on-close is requested at open time instead
    Ok(())
}

#[cfg(unix)]
fn cstring_of(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::new(ErrorKind::InvalidArgument).with_path(path))
}

#[cfg(unix)]
fn mode_oflags(mode: Mode) -> libc::c_int {
    match mode {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Mode::None => libc::O_PATH,
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        Mode::None => libc::O_RDONLY,
        // POSIX has no attribute-only access; a read descriptor serves
        Mode::AttrRead | Mode::AttrWrite => libc::O_RDONLY,
        Mode::Read => libc::O_RDONLY,
        Mode::Write => libc::O_RDWR,
        Mode::Append => libc::O_WRONLY | libc::O_APPEND,
    }
}

#[cfg(unix)]
fn creation_oflags(creation: Creation) -> libc::c_int {
    match creation {
        Creation::OpenExisting => 0,
        Creation::OnlyIfNotExist => libc::O_CREAT | libc::O_EXCL,
        Creation::IfNeeded => libc::O_CREAT,
        Creation::Truncate => libc::O_TRUNC,
    }
}

#[cfg(unix)]
fn caching_oflags(caching: Caching) -> (libc::c_int, bool) {
    // second element: whether data I/O must now be aligned
    match caching {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Caching::None => (libc::O_SYNC | libc::O_DIRECT, true),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Caching::OnlyMetadata => (libc::O_DIRECT, true),
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        Caching::None => (libc::O_SYNC, true),
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        Caching::OnlyMetadata => (0, true),
        Caching::Reads => (libc::O_SYNC, false),
        Caching::All | Caching::SafetyFsyncs | Caching::Temporary => (0, false),
    }
}

#[cfg(unix)]
fn open_native(
    path: &Path,
    mode: Mode,
    creation: Creation,
    caching: Caching,
    flags: HandleFlags,
) -> Result<NativeHandle> {
    let c = cstring_of(path)?;
    let (cache_flags, aligned) = caching_oflags(caching);
    let oflags = mode_oflags(mode) | creation_oflags(creation) | cache_flags | libc::O_CLOEXEC;

    let fd = loop {
        let fd = unsafe { libc::open(c.as_ptr(), oflags, 0o660 as libc::c_uint) };
        if fd >= 0 {
            break fd;
        }
        let err = Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(err.with_path(path));
    };

    // macOS spells "no data caching" as a post-open fcntl
    #[cfg(target_os = "macos")]
    if matches!(caching, Caching::None | Caching::OnlyMetadata) {
        unsafe { libc::fcntl(fd, libc::F_NOCACHE, 1) };
    }

    let mut disposition = mode_disposition(mode);
    if flags.contains(HandleFlags::OVERLAPPED) {
        disposition |= Disposition::OVERLAPPED;
    }
    if aligned {
        disposition |= Disposition::ALIGNED_IO;
    }
    Ok(NativeHandle::from_fd(fd, disposition))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_tmpfile(dir: &Path, mode: Mode, flags: HandleFlags) -> Result<Handle> {
    let c = cstring_of(dir)?;
    // O_TMPFILE requires write access; O_EXCL forbids linking a name back in
    let oflags = libc::O_TMPFILE | libc::O_EXCL | libc::O_RDWR | libc::O_CLOEXEC;
    let fd = loop {
        let fd = unsafe { libc::open(c.as_ptr(), oflags, 0o600 as libc::c_uint) };
        if fd >= 0 {
            break fd;
        }
        let err = Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(err.with_path(dir));
    };
    let mut disposition =
        Disposition::READABLE | Disposition::WRITABLE | Disposition::SEEKABLE;
    let _ = mode; // access checks are recorded, not narrowed, for anonymous inodes
    if flags.contains(HandleFlags::OVERLAPPED) {
        disposition |= Disposition::OVERLAPPED;
    }
    Ok(Handle::from_parts(
        NativeHandle::from_fd(fd, disposition),
        Caching::Temporary,
        flags,
    ))
}

/// Buffers handed to one native scatter-gather call. `sysconf(_SC_IOV_MAX)`
/// is at least this everywhere we run.
#[cfg(unix)]
const IOV_CHUNK: usize = 1024;

#[cfg(unix)]
pub(crate) fn read_native(
    handle: &Handle,
    req: IoRequest<Buffer>,
    _deadline: Deadline,
) -> Result<Buffers> {
    let mut bufs = req.buffers;
    let fd = handle.as_raw_fd();
    let mut off = req.offset as libc::off_t;
    let mut idx = 0;
    while idx < bufs.len() {
        let chunk = (bufs.len() - idx).min(IOV_CHUNK);
        let iovs: Vec<libc::iovec> = bufs[idx..idx + chunk]
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_mut_ptr() as *mut libc::c_void,
                iov_len: b.len(),
            })
            .collect();
        let rc = loop {
            let rc =
                unsafe { libc::preadv(fd, iovs.as_ptr(), iovs.len() as libc::c_int, off) };
            if rc >= 0 {
                break rc as usize;
            }
            let err = Error::last_os_error();
            if err.kind() != ErrorKind::Interrupted {
                return Err(err);
            }
        };
        let requested: usize = iovs.iter().map(|v| v.iov_len).sum();
        let mut left = rc;
        for b in &mut bufs[idx..idx + chunk] {
            let take = left.min(b.len());
            b.set_len(take);
            left -= take;
        }
        if rc < requested {
            // end of file: everything after reads as zero length
            for b in &mut bufs[idx + chunk..] {
                b.set_len(0);
            }
            return Ok(bufs);
        }
        off += rc as libc::off_t;
        idx += chunk;
    }
    Ok(bufs)
}

#[cfg(unix)]
pub(crate) fn write_native(
    handle: &Handle,
    req: IoRequest<ConstBuffer>,
    _deadline: Deadline,
) -> Result<ConstBuffers> {
    let mut bufs = req.buffers;
    let fd = handle.as_raw_fd();
    let mut off = req.offset as libc::off_t;
    let mut idx = 0;
    while idx < bufs.len() {
        let chunk = (bufs.len() - idx).min(IOV_CHUNK);
        let iovs: Vec<libc::iovec> = bufs[idx..idx + chunk]
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_ptr() as *mut libc::c_void,
                iov_len: b.len(),
            })
            .collect();
        let rc = loop {
            let rc =
                unsafe { libc::pwritev(fd, iovs.as_ptr(), iovs.len() as libc::c_int, off) };
            if rc >= 0 {
                break rc as usize;
            }
            let err = Error::last_os_error();
            if err.kind() != ErrorKind::Interrupted {
                return Err(err);
            }
        };
        let requested: usize = iovs.iter().map(|v| v.iov_len).sum();
        let mut left = rc;
        for b in &mut bufs[idx..idx + chunk] {
            let take = left.min(b.len());
            b.set_len(take);
            left -= take;
        }
        if rc < requested {
            for b in &mut bufs[idx + chunk..] {
                b.set_len(0);
            }
            return Ok(bufs);
        }
        off += rc as libc::off_t;
        idx += chunk;
    }
    Ok(bufs)
}

#[cfg(windows)]
fn wide_path(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

#[cfg(windows)]
fn open_native(
    path: &Path,
    mode: Mode,
    creation: Creation,
    caching: Caching,
    flags: HandleFlags,
) -> Result<NativeHandle> {
    use windows_sys::Win32::Foundation::{GENERIC_READ, GENERIC_WRITE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::Storage::FileSystem::{
        CREATE_NEW, CreateFileW, FILE_APPEND_DATA, FILE_ATTRIBUTE_NORMAL,
        FILE_ATTRIBUTE_TEMPORARY, FILE_FLAG_DELETE_ON_CLOSE, FILE_FLAG_NO_BUFFERING,
        FILE_FLAG_OVERLAPPED, FILE_FLAG_WRITE_THROUGH, FILE_READ_ATTRIBUTES, FILE_SHARE_DELETE,
        FILE_SHARE_READ, FILE_SHARE_WRITE, FILE_WRITE_ATTRIBUTES, OPEN_ALWAYS, OPEN_EXISTING,
        TRUNCATE_EXISTING,
    };

    let access = match mode {
        Mode::None => 0,
        Mode::AttrRead => FILE_READ_ATTRIBUTES,
        Mode::AttrWrite => FILE_READ_ATTRIBUTES | FILE_WRITE_ATTRIBUTES,
        Mode::Read => GENERIC_READ,
        Mode::Write => GENERIC_READ | GENERIC_WRITE,
        Mode::Append => FILE_APPEND_DATA,
    };
    let disp = match creation {
        Creation::OpenExisting => OPEN_EXISTING,
        Creation::OnlyIfNotExist => CREATE_NEW,
        Creation::IfNeeded => OPEN_ALWAYS,
        Creation::Truncate => TRUNCATE_EXISTING,
    };
    let mut attrs = FILE_ATTRIBUTE_NORMAL;
    let mut aligned = false;
    match caching {
        Caching::None => {
            attrs |= FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH;
            aligned = true;
        }
        Caching::OnlyMetadata => {
            attrs |= FILE_FLAG_NO_BUFFERING;
            aligned = true;
        }
        Caching::Reads => attrs |= FILE_FLAG_WRITE_THROUGH,
        Caching::Temporary => attrs |= FILE_ATTRIBUTE_TEMPORARY,
        Caching::All | Caching::SafetyFsyncs => {}
    }
    if flags.contains(HandleFlags::UNLINK_ON_CLOSE) {
        attrs |= FILE_FLAG_DELETE_ON_CLOSE;
    }
    if flags.contains(HandleFlags::OVERLAPPED) {
        attrs |= FILE_FLAG_OVERLAPPED;
    }

    let wide = wide_path(path);
    let h = unsafe {
        CreateFileW(
            wide.as_ptr(),
            access,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            std::ptr::null(),
            disp,
            attrs,
            std::ptr::null_mut(),
        )
    };
    if h == INVALID_HANDLE_VALUE {
        return Err(Error::last_os_error().with_path(path));
    }

    let mut disposition = mode_disposition(mode);
    if flags.contains(HandleFlags::OVERLAPPED) {
        disposition |= Disposition::OVERLAPPED;
    }
    if aligned {
        disposition |= Disposition::ALIGNED_IO;
    }
    Ok(NativeHandle::from_handle(h, disposition))
}

#[cfg(windows)]
pub(crate) fn read_native(
    handle: &Handle,
    req: IoRequest<Buffer>,
    deadline: Deadline,
) -> Result<Buffers> {
    overlapped_transfer(handle, req.buffers, req.offset, deadline, false)
}

#[cfg(windows)]
pub(crate) fn write_native(
    handle: &Handle,
    req: IoRequest<ConstBuffer>,
    deadline: Deadline,
) -> Result<ConstBuffers> {
    let bufs: Buffers = req
        .buffers
        .iter()
        .map(|b| Buffer::new(b.as_ptr() as *mut u8, b.len()))
        .collect();
    let done = overlapped_transfer(handle, bufs, req.offset, deadline, true)?;
    Ok(done
        .iter()
        .map(|b| ConstBuffer::new(b.as_mut_ptr(), b.len()))
        .collect())
}

/// One buffer at a time through ReadFile/WriteFile with an explicit offset.
/// Overlapped handles wait on a private event with the deadline as timeout
/// and cancel the transfer on expiry.
#[cfg(windows)]
fn overlapped_transfer(
    handle: &Handle,
    mut bufs: Buffers,
    offset: u64,
    deadline: Deadline,
    writing: bool,
) -> Result<Buffers> {
    use windows_sys::Win32::Foundation::{
        CloseHandle, ERROR_HANDLE_EOF, ERROR_IO_PENDING, GetLastError, WAIT_OBJECT_0,
    };
    use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
    use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};
    use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

    let h = handle.native().handle();
    let started = std::time::Instant::now();
    let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
    if event.is_null() {
        return Err(Error::last_os_error());
    }

    let mut off = offset;
    let mut hit_eof = false;
    for i in 0..bufs.len() {
        if hit_eof {
            bufs[i].set_len(0);
            continue;
        }
        let mut ov: OVERLAPPED = unsafe { std::mem::zeroed() };
        unsafe {
            ov.Anonymous.Anonymous.Offset = off as u32;
            ov.Anonymous.Anonymous.OffsetHigh = (off >> 32) as u32;
        }
        ov.hEvent = event;
        let mut transferred: u32 = 0;
        let ok = unsafe {
            if writing {
                WriteFile(h, bufs[i].as_mut_ptr(), bufs[i].len() as u32, &mut transferred, &mut ov)
            } else {
                ReadFile(h, bufs[i].as_mut_ptr(), bufs[i].len() as u32, &mut transferred, &mut ov)
            }
        };
        if ok == 0 {
            match unsafe { GetLastError() } {
                ERROR_HANDLE_EOF => {
                    hit_eof = true;
                    bufs[i].set_len(0);
                    continue;
                }
                ERROR_IO_PENDING => {
                    let timeout = match deadline.remaining(started) {
                        None => u32::MAX, // INFINITE
                        Some(left) => left.as_millis().min(u32::MAX as u128) as u32,
                    };
                    if unsafe { WaitForSingleObject(event, timeout) } != WAIT_OBJECT_0 {
                        unsafe {
                            CancelIoEx(h, &ov);
                            GetOverlappedResult(h, &ov, &mut transferred, 1);
                            CloseHandle(event);
                        }
                        return Err(Error::new(ErrorKind::TimedOut));
                    }
                    if unsafe { GetOverlappedResult(h, &ov, &mut transferred, 0) } == 0 {
                        let code = unsafe { GetLastError() };
                        if code == ERROR_HANDLE_EOF {
                            hit_eof = true;
                            bufs[i].set_len(0);
                            continue;
                        }
                        unsafe { CloseHandle(event) };
                        return Err(Error::from_errno(code as i32));
                    }
                }
                code => {
                    unsafe { CloseHandle(event) };
                    return Err(Error::from_errno(code as i32));
                }
            }
        }
        let requested = bufs[i].len();
        bufs[i].set_len(transferred as usize);
        off += transferred as u64;
        if (transferred as usize) < requested {
            hit_eof = true;
        }
    }
    unsafe { CloseHandle(event) };
    Ok(bufs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileHandle::open(
            dir.path().join("nope"),
            Mode::Read,
            Creation::OpenExisting,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn exclusive_create_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let _a = FileHandle::open(
            &path,
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap();
        let err = FileHandle::open(
            &path,
            Mode::Write,
            Creation::OnlyIfNotExist,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn scatter_read_reports_eof_with_zero_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileHandle::open(
            dir.path().join("f"),
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap();

        let data = vec![7u8; 2500];
        let wrote = file
            .write(
                IoRequest::new(smallvec![ConstBuffer::from(&data[..])], 0),
                Deadline::Infinite,
            )
            .unwrap();
        assert_eq!(wrote[0].len(), 2500);

        let mut a = vec![0u8; 1024];
        let mut b = vec![0u8; 1024];
        let mut c = vec![0u8; 1024];
        let bufs: Buffers = smallvec![
            Buffer::from(&mut a[..]),
            Buffer::from(&mut b[..]),
            Buffer::from(&mut c[..]),
        ];
        let got = file
            .read(IoRequest::new(bufs, 0), Deadline::Infinite)
            .unwrap();
        assert_eq!(got[0].len(), 1024);
        assert_eq!(got[1].len(), 1024);
        assert_eq!(got[2].len(), 452);
        assert!(a.iter().all(|&x| x == 7));
        assert!(c[..452].iter().all(|&x| x == 7));
    }

    #[test]
    fn random_files_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileHandle::random_file(
            dir.path(),
            Mode::Write,
            Caching::Temporary,
            HandleFlags::empty(),
        )
        .unwrap();
        let b = FileHandle::random_file(
            dir.path(),
            Mode::Write,
            Caching::Temporary,
            HandleFlags::empty(),
        )
        .unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.inode(), b.inode());
    }

    #[test]
    fn temp_inode_reads_back_what_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let file =
            FileHandle::temp_inode(dir.path(), Mode::Write, HandleFlags::empty()).unwrap();
        assert_eq!(file.path(), Path::new(""));

        file.write(
            IoRequest::new(smallvec![ConstBuffer::from(&b"hello"[..])], 0),
            Deadline::Infinite,
        )
        .unwrap();
        let mut buf = [0u8; 5];
        let got = file
            .read(
                IoRequest::new(smallvec![Buffer::from(&mut buf[..])], 0),
                Deadline::Infinite,
            )
            .unwrap();
        assert_eq!(got[0].len(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn unlink_on_close_removes_the_entry_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        let file = FileHandle::open(
            &path,
            Mode::Write,
            Creation::IfNeeded,
            Caching::Temporary,
            HandleFlags::UNLINK_ON_CLOSE,
        )
        .unwrap();
        assert!(!path.exists());
        // the inode is still usable through the handle
        file.write(
            IoRequest::new(smallvec![ConstBuffer::from(&b"x"[..])], 0),
            Deadline::Infinite,
        )
        .unwrap();
        assert_eq!(file.length().unwrap(), 1);
    }

    #[test]
    fn truncate_changes_length() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileHandle::open(
            dir.path().join("t"),
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap();
        assert_eq!(file.length().unwrap(), 0);
        file.truncate(4096).unwrap();
        assert_eq!(file.length().unwrap(), 4096);
        file.truncate(10).unwrap();
        assert_eq!(file.length().unwrap(), 10);
    }

    #[test]
    fn clone_shares_identity() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileHandle::open(
            dir.path().join("c"),
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap();
        let dup = file.clone_handle().unwrap();
        assert_eq!(file.inode(), dup.inode());
        assert_eq!(file.device_id(), dup.device_id());
        #[cfg(unix)]
        assert_ne!(file.as_raw_fd(), dup.as_raw_fd());
    }
}
