//! Portable low-level asynchronous file I/O
//!
//! This crate exposes raw operating-system file, section (memory-backed
//! object) and memory-map handles with a uniform, result-returning API over
//! POSIX and Windows. The native mechanisms — `open`/`mmap`/POSIX AIO on
//! one side, `CreateFile`/file mappings/overlapped I/O on the other — are
//! wrapped behind one contract; nothing is emulated in userspace that the
//! kernel already provides.
//!
//! The pieces, bottom up:
//!
//! * [`NativeHandle`] — the raw kernel handle plus the capability bits it
//!   was opened with.
//! * [`Handle`] / [`FileHandle`] — exclusive ownership, with release on
//!   every exit path.
//! * [`SectionHandle`] / [`MapHandle`] — kernel memory sections and views
//!   of them in the process address space.
//! * [`IoService`] / [`AsyncFileHandle`] — scheduling of scatter-gather
//!   reads and writes that complete later, drained by whichever thread
//!   calls [`IoService::run`].
//! * [`Stat`] — metadata extraction over any open handle.
//!
//! Errors are values ([`Error`]), never panics, with two deliberate
//! exceptions: a failed close of an owned resource during drop, and
//! destruction of in-flight I/O state, both of which abort.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::async_file::AsyncFileHandle;
pub use crate::async_file::IoStatePtr;
pub use crate::async_file::Operation;
pub use crate::error::Error;
pub use crate::error::ErrorCategory;
pub use crate::error::ErrorKind;
pub use crate::error::Result;
pub use crate::file::FileHandle;
pub use crate::handle::Caching;
pub use crate::handle::Creation;
pub use crate::handle::Handle;
pub use crate::handle::HandleFlags;
pub use crate::handle::Mode;
pub use crate::io::Buffer;
pub use crate::io::Buffers;
pub use crate::io::ConstBuffer;
pub use crate::io::ConstBuffers;
pub use crate::io::Deadline;
pub use crate::io::IoHandle;
pub use crate::io::IoRequest;
pub use crate::map::MapHandle;
pub use crate::native::Disposition;
pub use crate::native::NativeHandle;
pub use crate::section::SectionFlags;
pub use crate::section::SectionHandle;
pub use crate::service::IoService;
pub use crate::stat::FileKind;
pub use crate::stat::Stat;
pub use crate::stat::StatWants;

mod async_file;
mod error;
mod file;
mod handle;
mod io;
mod map;
mod native;
mod section;
mod service;
mod stat;
pub mod utils;
