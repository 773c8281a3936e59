//! Scatter-gather buffer descriptions, I/O requests and deadlines.
//!
//! A [`Buffer`] is a borrowed description of caller memory, not an owner of
//! it. Buffer sequences travel through an operation and come back out with
//! their lengths set to the bytes actually transferred; a returned pointer
//! that differs from the input pointer means the implementation substituted
//! its own backing (map-backed reads do this) and the caller must read the
//! data through the returned pointer.

use std::time::{Duration, Instant, SystemTime};

use smallvec::SmallVec;

use crate::error::Result;

/// A mutable scatter-gather element: pointer plus length.
#[derive(Clone, Copy, Debug)]
pub struct Buffer {
    ptr: *mut u8,
    len: usize,
}

/// An immutable scatter-gather element: pointer plus length.
#[derive(Clone, Copy, Debug)]
pub struct ConstBuffer {
    ptr: *const u8,
    len: usize,
}

// A buffer is a description of memory, not access to it; every dereference
// in this crate goes through an unsafe block whose caller guarantees the
// memory outlives the operation.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}
unsafe impl Send for ConstBuffer {}
unsafe impl Sync for ConstBuffer {}

impl Buffer {
    /// Describe `len` bytes starting at `ptr`.
    pub fn new(ptr: *mut u8, len: usize) -> Self {
        Buffer { ptr, len }
    }

    /// The start of the described memory.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// The described length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the described region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    pub(crate) fn set_ptr(&mut self, ptr: *mut u8) {
        self.ptr = ptr;
    }

    /// View the described memory as a slice.
    ///
    /// # Safety
    /// The pointer must be valid for `len()` bytes for the lifetime of the
    /// returned slice, with no concurrent writers.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// View the described memory as a mutable slice.
    ///
    /// # Safety
    /// As [`Buffer::as_slice`], plus exclusive access.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl ConstBuffer {
    /// Describe `len` bytes starting at `ptr`.
    pub fn new(ptr: *const u8, len: usize) -> Self {
        ConstBuffer { ptr, len }
    }

    /// The start of the described memory.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// The described length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the described region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    /// View the described memory as a slice.
    ///
    /// # Safety
    /// The pointer must be valid for `len()` bytes for the lifetime of the
    /// returned slice.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl From<&mut [u8]> for Buffer {
    fn from(s: &mut [u8]) -> Self {
        Buffer::new(s.as_mut_ptr(), s.len())
    }
}

impl From<&[u8]> for ConstBuffer {
    fn from(s: &[u8]) -> Self {
        ConstBuffer::new(s.as_ptr(), s.len())
    }
}

impl From<Buffer> for ConstBuffer {
    fn from(b: Buffer) -> Self {
        ConstBuffer::new(b.ptr, b.len)
    }
}

/// A sequence of mutable buffers. Small sequences stay on the stack.
pub type Buffers = SmallVec<[Buffer; 4]>;
/// A sequence of immutable buffers. Small sequences stay on the stack.
pub type ConstBuffers = SmallVec<[ConstBuffer; 4]>;

/// A scatter-gather request: an ordered buffer sequence plus the absolute
/// file offset the first buffer applies to.
#[derive(Clone, Debug)]
pub struct IoRequest<B> {
    /// The buffers, attempted in order. Input and output: lengths are
    /// rewritten to the bytes actually transferred.
    pub buffers: SmallVec<[B; 4]>,
    /// Absolute offset of the first buffer.
    pub offset: u64,
}

impl<B> IoRequest<B> {
    /// Build a request from a buffer sequence and an offset.
    pub fn new(buffers: impl Into<SmallVec<[B; 4]>>, offset: u64) -> Self {
        IoRequest {
            buffers: buffers.into(),
            offset,
        }
    }
}

/// When a blocking operation must give up.
///
/// A relative deadline of zero means non-blocking: attempt the operation and
/// return immediately.
#[derive(Clone, Copy, Debug, Default)]
pub enum Deadline {
    /// Never give up.
    #[default]
    Infinite,
    /// Give up this long after the operation starts.
    Relative(Duration),
    /// Give up at this wall-clock time.
    Absolute(SystemTime),
}

impl Deadline {
    /// A zero relative deadline: poll without blocking.
    pub fn nonblocking() -> Self {
        Deadline::Relative(Duration::ZERO)
    }

    /// Time left until expiry, measured from `started`. `None` means
    /// unbounded; `Some(ZERO)` means already expired.
    pub(crate) fn remaining(&self, started: Instant) -> Option<Duration> {
        match self {
            Deadline::Infinite => None,
            Deadline::Relative(d) => Some(d.saturating_sub(started.elapsed())),
            Deadline::Absolute(t) => Some(
                t.duration_since(SystemTime::now())
                    .unwrap_or(Duration::ZERO),
            ),
        }
    }
}

/// A handle capable of synchronous scatter-gather I/O at an offset.
///
/// Implementations attempt the buffers in order. Partial completion is
/// reported through the returned buffer lengths; end of file is success with
/// the trailing lengths set to zero, never an error.
pub trait IoHandle {
    /// Read into the request's buffers starting at its offset.
    fn read(&self, req: IoRequest<Buffer>, deadline: Deadline) -> Result<Buffers>;

    /// Write the request's buffers starting at its offset.
    fn write(&self, req: IoRequest<ConstBuffer>, deadline: Deadline) -> Result<ConstBuffers>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_from_slice() {
        let mut data = [0u8; 16];
        let b = Buffer::from(&mut data[..]);
        assert_eq!(b.len(), 16);
        assert!(!b.is_empty());
        assert_eq!(b.as_mut_ptr(), data.as_mut_ptr());
    }

    #[test]
    fn zero_relative_deadline_is_expired() {
        let d = Deadline::nonblocking();
        assert_eq!(d.remaining(Instant::now()), Some(Duration::ZERO));
        assert!(matches!(Deadline::default(), Deadline::Infinite));
    }
}
