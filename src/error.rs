//! Error type shared by every fallible operation in the crate.
//!
//! Errors are plain returned values. The only conditions that do not surface
//! as values are the two fatal ones: a failed close of an owned kernel
//! resource during `Drop`, and destruction of an I/O state while submissions
//! are still in flight. Both abort the process because no safe recovery
//! exists.

use std::path::Path;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which numbering scheme the raw code in an [`Error`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A POSIX `errno` or Win32 error code.
    Generic,
    /// A raw `NTSTATUS` value.
    NtStatus,
    /// A code minted by this library rather than the kernel.
    Library,
}

/// Broad classification of a failure, independent of platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A parameter was outside its documented domain.
    InvalidArgument,
    /// The filesystem entry does not exist.
    NotFound,
    /// The filesystem entry already exists.
    AlreadyExists,
    /// The caller lacks the rights for the operation.
    PermissionDenied,
    /// A directory was found where a file was required.
    IsADirectory,
    /// A file was found where a directory was required.
    NotADirectory,
    /// The storage device is full.
    NoSpace,
    /// A signal interrupted the call before any data transferred.
    Interrupted,
    /// The supplied deadline expired.
    TimedOut,
    /// The operation was cancelled before it settled.
    OperationCanceled,
    /// A device-level I/O failure.
    Io,
    /// The kernel could not allocate the resources for the request.
    OutOfMemory,
    /// The operation is not supported by this platform or filesystem.
    Unsupported,
    /// Any other operating system error, carrying the untranslated code.
    Os(i32),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "entity not found",
            ErrorKind::AlreadyExists => "entity already exists",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::IsADirectory => "is a directory",
            ErrorKind::NotADirectory => "not a directory",
            ErrorKind::NoSpace => "no space on device",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::TimedOut => "timed out",
            ErrorKind::OperationCanceled => "operation canceled",
            ErrorKind::Io => "i/o failure",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Os(code) => return write!(f, "os error {code}"),
        };
        f.write_str(text)
    }
}

/// The error payload: a classification, the raw OS code it was derived from,
/// and an optional context message (typically the tail of a path).
#[derive(Debug, Error)]
#[error("{kind}{}", fmt_context(.context))]
pub struct Error {
    kind: ErrorKind,
    category: ErrorCategory,
    code: i32,
    context: Option<Box<str>>,
}

/// At most this many trailing characters of a path are kept as context.
const CONTEXT_MAX: usize = 190;

fn fmt_context(context: &Option<Box<str>>) -> String {
    match context {
        Some(c) => format!(" ({c})"),
        None => String::new(),
    }
}

impl Error {
    /// An error minted by the library itself, with no OS code behind it.
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            category: ErrorCategory::Library,
            code: 0,
            context: None,
        }
    }

    /// Classify a raw `errno` value.
    pub fn from_errno(code: i32) -> Self {
        Error {
            kind: kind_from_errno(code),
            category: ErrorCategory::Generic,
            code,
            context: None,
        }
    }

    /// Capture and classify the calling thread's last OS error.
    pub fn last_os_error() -> Self {
        Self::from_errno(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    /// Attach the trailing characters of `path` as context.
    pub fn with_path(mut self, path: &Path) -> Self {
        let s = path.to_string_lossy();
        let tail: String = if s.chars().count() > CONTEXT_MAX {
            let skip = s.chars().count() - CONTEXT_MAX;
            s.chars().skip(skip).collect()
        } else {
            s.into_owned()
        };
        self.context = Some(tail.into_boxed_str());
        self
    }

    /// The broad classification of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The raw code this error was derived from, if any.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Which numbering scheme [`Error::code`] belongs to.
    pub fn category(&self) -> ErrorCategory {
        self.category
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Error::from_errno(code),
            None => Error::new(ErrorKind::Io),
        }
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Error::from_errno(err as i32)
    }
}

#[cfg(unix)]
fn kind_from_errno(code: i32) -> ErrorKind {
    match code {
        libc::EINVAL => ErrorKind::InvalidArgument,
        libc::ENOENT => ErrorKind::NotFound,
        libc::EEXIST => ErrorKind::AlreadyExists,
        libc::EACCES | libc::EPERM => ErrorKind::PermissionDenied,
        libc::EISDIR => ErrorKind::IsADirectory,
        libc::ENOTDIR => ErrorKind::NotADirectory,
        libc::ENOSPC => ErrorKind::NoSpace,
        libc::EINTR => ErrorKind::Interrupted,
        libc::ETIMEDOUT => ErrorKind::TimedOut,
        libc::ECANCELED => ErrorKind::OperationCanceled,
        libc::EIO => ErrorKind::Io,
        libc::ENOMEM | libc::EAGAIN => ErrorKind::OutOfMemory,
        libc::ENOSYS | libc::EOPNOTSUPP => ErrorKind::Unsupported,
        other => ErrorKind::Os(other),
    }
}

#[cfg(windows)]
fn kind_from_errno(code: i32) -> ErrorKind {
    use windows_sys::Win32::Foundation::{
        ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, ERROR_DIRECTORY, ERROR_DISK_FULL,
        ERROR_FILE_EXISTS, ERROR_FILE_NOT_FOUND, ERROR_INVALID_PARAMETER, ERROR_NOT_SUPPORTED,
        ERROR_OPERATION_ABORTED, ERROR_OUTOFMEMORY, ERROR_PATH_NOT_FOUND, WAIT_TIMEOUT,
    };

    match code as u32 {
        ERROR_INVALID_PARAMETER => ErrorKind::InvalidArgument,
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => ErrorKind::NotFound,
        ERROR_FILE_EXISTS | ERROR_ALREADY_EXISTS => ErrorKind::AlreadyExists,
        ERROR_ACCESS_DENIED => ErrorKind::PermissionDenied,
        ERROR_DIRECTORY => ErrorKind::NotADirectory,
        ERROR_DISK_FULL => ErrorKind::NoSpace,
        WAIT_TIMEOUT => ErrorKind::TimedOut,
        ERROR_OPERATION_ABORTED => ErrorKind::OperationCanceled,
        ERROR_OUTOFMEMORY => ErrorKind::OutOfMemory,
        ERROR_NOT_SUPPORTED => ErrorKind::Unsupported,
        other => ErrorKind::Os(other as i32),
    }
}

/// Abort the process after logging.
///
/// Reserved for the two conditions where continuing would leak or corrupt a
/// kernel resource with no way to report it to a caller.
pub(crate) fn fatal(context: &str) -> ! {
    log::error!("fatal: {context}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn errno_classification() {
        assert_eq!(Error::from_errno(libc::ENOENT).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::from_errno(libc::EEXIST).kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            Error::from_errno(libc::ECANCELED).kind(),
            ErrorKind::OperationCanceled
        );
        assert_eq!(Error::from_errno(libc::EBADF).kind(), ErrorKind::Os(libc::EBADF));
    }

    #[test]
    fn path_context_is_truncated() {
        let long: String = std::iter::repeat('a').take(400).collect();
        let err = Error::new(ErrorKind::NotFound).with_path(Path::new(&long));
        let shown = err.to_string();
        assert!(shown.len() < 250);
        assert!(shown.contains("aaa"));
    }
}
