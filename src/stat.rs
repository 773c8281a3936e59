//! Metadata extraction over an open [`Handle`].

use std::time::{Duration, SystemTime};

use bitflags::bitflags;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::handle::Handle;

#[cfg(windows)]
use crate::error::Error;

bitflags! {
    /// Which [`Stat`] fields the caller wants populated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatWants: u32 {
        /// Device identifier.
        const DEV = 1 << 0;
        /// Inode (file index on Windows).
        const INO = 1 << 1;
        /// Entry type.
        const TYPE = 1 << 2;
        /// Hard link count.
        const NLINK = 1 << 3;
        /// Last access time.
        const ATIM = 1 << 4;
        /// Last modification time.
        const MTIM = 1 << 5;
        /// Last status change time.
        const CTIM = 1 << 6;
        /// Length in bytes.
        const SIZE = 1 << 7;
        /// Bytes of storage actually allocated.
        const ALLOCATED = 1 << 8;
        /// Allocated 512-byte blocks.
        const BLOCKS = 1 << 9;
        /// Preferred I/O block size.
        const BLKSIZE = 1 << 10;
        /// Creation time, where the filesystem records one.
        const BIRTHTIM = 1 << 11;
        /// Whether the file has unallocated extents.
        const SPARSE = 1 << 12;
        /// Whether the file is transparently compressed.
        const COMPRESSED = 1 << 13;
        /// Whether the entry is a reparse point (Windows).
        const REPARSE_POINT = 1 << 14;
    }
}

impl StatWants {
    /// Everything the platform can provide.
    pub fn all_fields() -> Self {
        StatWants::all()
    }
}

/// What kind of filesystem entry a handle refers to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum FileKind {
    /// A regular file.
    RegularFile,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// A character device (`S_IFCHR`).
    CharDevice,
    /// A block device (`S_IFBLK`).
    BlockDevice,
    /// A named pipe (`S_IFIFO`).
    NamedPipe,
    /// A unix domain socket.
    Socket,
    /// Anything else, including a not-yet-filled [`Stat`].
    #[default]
    Unknown,
}

/// Extracted metadata. Only the fields named in the `wants` passed to
/// [`Stat::fill`] are meaningful; everything else keeps its previous value.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Stat {
    /// Device identifier.
    pub dev: u64,
    /// Inode (file index on Windows).
    pub ino: u64,
    /// Entry type.
    pub kind: FileKind,
    /// Hard link count.
    pub nlink: u32,
    /// Last access time.
    pub atim: Option<SystemTime>,
    /// Last modification time.
    pub mtim: Option<SystemTime>,
    /// Last status change time.
    pub ctim: Option<SystemTime>,
    /// Length in bytes.
    pub size: u64,
    /// Bytes of storage actually allocated.
    pub allocated: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Preferred I/O block size.
    pub blksize: u32,
    /// Creation time, where the filesystem records one.
    pub birthtim: Option<SystemTime>,
    /// Whether the file has unallocated extents.
    pub sparse: bool,
    /// Whether the file is transparently compressed.
    pub compressed: bool,
    /// Whether the entry is a reparse point.
    pub reparse_point: bool,
}

impl Stat {
    /// Populate the fields named by `wants` from `handle`.
    ///
    /// Returns how many fields were populated; fields the platform cannot
    /// provide are skipped and not counted. A single kernel query serves
    /// any number of requested fields.
    pub fn fill(&mut self, handle: &Handle, wants: StatWants) -> Result<usize> {
        fill_native(self, handle, wants)
    }
}

#[cfg(unix)]
fn system_time_of(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        SystemTime::UNIX_EPOCH - Duration::new((-secs) as u64, 0) + Duration::new(0, nsecs as u32)
    }
}

#[cfg(unix)]
fn kind_of_mode(mode: libc::mode_t) -> FileKind {
    match mode & libc::S_IFMT {
        libc::S_IFREG => FileKind::RegularFile,
        libc::S_IFDIR => FileKind::Directory,
        libc::S_IFLNK => FileKind::Symlink,
        libc::S_IFCHR => FileKind::CharDevice,
        libc::S_IFBLK => FileKind::BlockDevice,
        libc::S_IFIFO => FileKind::NamedPipe,
        libc::S_IFSOCK => FileKind::Socket,
        _ => FileKind::Unknown,
    }
}

// On POSIX `fstat` is both the batch call and the most specific call, so
// every request is one syscall.
#[cfg(unix)]
fn fill_native(stat: &mut Stat, handle: &Handle, wants: StatWants) -> Result<usize> {
    let st = nix::sys::stat::fstat(handle)?;
    let mut filled = 0;

    if wants.contains(StatWants::DEV) {
        stat.dev = st.st_dev as u64;
        filled += 1;
    }
    if wants.contains(StatWants::INO) {
        stat.ino = st.st_ino as u64;
        filled += 1;
    }
    if wants.contains(StatWants::TYPE) {
        stat.kind = kind_of_mode(st.st_mode);
        filled += 1;
    }
    if wants.contains(StatWants::NLINK) {
        stat.nlink = st.st_nlink as u32;
        filled += 1;
    }
    if wants.contains(StatWants::ATIM) {
        stat.atim = Some(system_time_of(st.st_atime as i64, st.st_atime_nsec as i64));
        filled += 1;
    }
    if wants.contains(StatWants::MTIM) {
        stat.mtim = Some(system_time_of(st.st_mtime as i64, st.st_mtime_nsec as i64));
        filled += 1;
    }
    if wants.contains(StatWants::CTIM) {
        stat.ctim = Some(system_time_of(st.st_ctime as i64, st.st_ctime_nsec as i64));
        filled += 1;
    }
    if wants.contains(StatWants::SIZE) {
        stat.size = st.st_size as u64;
        filled += 1;
    }
    if wants.contains(StatWants::ALLOCATED) {
        stat.allocated = st.st_blocks as u64 * 512;
        filled += 1;
    }
    if wants.contains(StatWants::BLOCKS) {
        stat.blocks = st.st_blocks as u64;
        filled += 1;
    }
    if wants.contains(StatWants::BLKSIZE) {
        stat.blksize = st.st_blksize as u32;
        filled += 1;
    }
    #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "netbsd"))]
    if wants.contains(StatWants::BIRTHTIM) {
        stat.birthtim = Some(system_time_of(
            st.st_birthtime as i64,
            st.st_birthtime_nsec as i64,
        ));
        filled += 1;
    }
    if wants.contains(StatWants::SPARSE) {
        stat.sparse = (st.st_blocks as u64 * 512) < st.st_size as u64;
        filled += 1;
    }
    // COMPRESSED and REPARSE_POINT have no POSIX equivalent and stay unset

    Ok(filled)
}

#[cfg(windows)]
fn fill_native(stat: &mut Stat, handle: &Handle, wants: StatWants) -> Result<usize> {
    use windows_sys::Win32::Storage::FileSystem::{
        BY_HANDLE_FILE_INFORMATION, FILE_ATTRIBUTE_COMPRESSED, FILE_ATTRIBUTE_DIRECTORY,
        FILE_ATTRIBUTE_REPARSE_POINT, FILE_ATTRIBUTE_SPARSE_FILE, GetFileInformationByHandle,
    };

    let h = handle.native().handle();
    let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
    if unsafe { GetFileInformationByHandle(h, &mut info) } == 0 {
        return Err(Error::last_os_error());
    }
    let mut filled = 0;

    if wants.contains(StatWants::DEV) {
        stat.dev = info.dwVolumeSerialNumber as u64;
        filled += 1;
    }
    if wants.contains(StatWants::INO) {
        stat.ino = ((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64;
        filled += 1;
    }
    if wants.contains(StatWants::TYPE) {
        stat.kind = if info.dwFileAttributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
            // only the reparse tag distinguishes a symlink from the other
            // reparse variants
            match reparse_tag(h)? {
                IO_REPARSE_TAG_SYMLINK | IO_REPARSE_TAG_MOUNT_POINT => FileKind::Symlink,
                _ => FileKind::Unknown,
            }
        } else if info.dwFileAttributes & FILE_ATTRIBUTE_DIRECTORY != 0 {
            FileKind::Directory
        } else {
            FileKind::RegularFile
        };
        filled += 1;
    }
    if wants.contains(StatWants::NLINK) {
        stat.nlink = info.nNumberOfLinks;
        filled += 1;
    }
    if wants.contains(StatWants::ATIM) {
        stat.atim = Some(system_time_of_filetime(
            info.ftLastAccessTime.dwHighDateTime,
            info.ftLastAccessTime.dwLowDateTime,
        ));
        filled += 1;
    }
    if wants.contains(StatWants::MTIM) {
        stat.mtim = Some(system_time_of_filetime(
            info.ftLastWriteTime.dwHighDateTime,
            info.ftLastWriteTime.dwLowDateTime,
        ));
        filled += 1;
    }
    if wants.contains(StatWants::CTIM) || wants.contains(StatWants::BIRTHTIM) {
        let t = system_time_of_filetime(
            info.ftCreationTime.dwHighDateTime,
            info.ftCreationTime.dwLowDateTime,
        );
        if wants.contains(StatWants::CTIM) {
            stat.ctim = Some(t);
            filled += 1;
        }
        if wants.contains(StatWants::BIRTHTIM) {
            stat.birthtim = Some(t);
            filled += 1;
        }
    }
    if wants.contains(StatWants::SIZE) {
        stat.size = ((info.nFileSizeHigh as u64) << 32) | info.nFileSizeLow as u64;
        filled += 1;
    }
    if wants.intersects(StatWants::ALLOCATED | StatWants::BLOCKS) {
        let size = ((info.nFileSizeHigh as u64) << 32) | info.nFileSizeLow as u64;
        if wants.contains(StatWants::ALLOCATED) {
            stat.allocated = size;
            filled += 1;
        }
        if wants.contains(StatWants::BLOCKS) {
            stat.blocks = size / 512;
            filled += 1;
        }
    }
    if wants.contains(StatWants::SPARSE) {
        stat.sparse = info.dwFileAttributes & FILE_ATTRIBUTE_SPARSE_FILE != 0;
        filled += 1;
    }
    if wants.contains(StatWants::COMPRESSED) {
        stat.compressed = info.dwFileAttributes & FILE_ATTRIBUTE_COMPRESSED != 0;
        filled += 1;
    }
    if wants.contains(StatWants::REPARSE_POINT) {
        stat.reparse_point = info.dwFileAttributes & FILE_ATTRIBUTE_REPARSE_POINT != 0;
        filled += 1;
    }

    Ok(filled)
}

#[cfg(windows)]
const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;
#[cfg(windows)]
const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;

#[cfg(windows)]
fn system_time_of_filetime(high: u32, low: u32) -> SystemTime {
    // FILETIME counts 100ns ticks since 1601-01-01
    const TICKS_TO_UNIX_EPOCH: u64 = 116_444_736_000_000_000;
    let ticks = ((high as u64) << 32) | low as u64;
    let since_unix = ticks.saturating_sub(TICKS_TO_UNIX_EPOCH);
    SystemTime::UNIX_EPOCH + Duration::from_nanos(since_unix * 100)
}

#[cfg(windows)]
fn reparse_tag(h: windows_sys::Win32::Foundation::HANDLE) -> Result<u32> {
    use windows_sys::Win32::System::IO::DeviceIoControl;
    use windows_sys::Win32::System::Ioctl::FSCTL_GET_REPARSE_POINT;

    // REPARSE_DATA_BUFFER: the tag is the leading u32
    let mut buffer = [0u8; 16 * 1024];
    let mut returned: u32 = 0;
    let ok = unsafe {
        DeviceIoControl(
            h,
            FSCTL_GET_REPARSE_POINT,
            std::ptr::null(),
            0,
            buffer.as_mut_ptr() as *mut core::ffi::c_void,
            buffer.len() as u32,
            &mut returned,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(Error::last_os_error());
    }
    Ok(u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileHandle;
    use crate::handle::{Caching, Creation, HandleFlags, Mode};
    use crate::io::{ConstBuffer, Deadline, IoHandle, IoRequest};
    use smallvec::smallvec;

    #[test]
    fn fill_counts_what_it_populates() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileHandle::open(
            dir.path().join("s"),
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap();
        file.write(
            IoRequest::new(smallvec![ConstBuffer::from(&[0u8; 42][..])], 0),
            Deadline::Infinite,
        )
        .unwrap();

        let mut stat = Stat::default();
        let filled = stat
            .fill(
                file.handle(),
                StatWants::INO | StatWants::SIZE | StatWants::MTIM,
            )
            .unwrap();
        assert_eq!(filled, 3);
        assert_eq!(stat.size, 42);
        assert!(stat.ino != 0);
        assert!(stat.mtim.is_some());
        // unrequested fields keep their defaults
        assert_eq!(stat.kind, FileKind::Unknown);
        assert_eq!(stat.nlink, 0);

        // a clone of the handle names the same inode
        let dup = file.clone_handle().unwrap();
        let mut stat2 = Stat::default();
        stat2.fill(dup.handle(), StatWants::INO).unwrap();
        assert_eq!(stat.ino, stat2.ino);
    }

    #[test]
    fn type_of_a_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileHandle::open(
            dir.path().join("t"),
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap();
        let mut stat = Stat::default();
        let filled = stat
            .fill(file.handle(), StatWants::TYPE | StatWants::NLINK)
            .unwrap();
        assert_eq!(filled, 2);
        assert_eq!(stat.kind, FileKind::RegularFile);
        assert_eq!(stat.nlink, 1);
    }
}
