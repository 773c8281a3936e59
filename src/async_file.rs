//! Asynchronous file handles and the in-flight I/O state machinery.
//!
//! An [`AsyncFileHandle`] is a [`FileHandle`] bound to an [`IoService`].
//! Scheduling a read or write allocates one out-of-line state object per
//! operation; the returned [`IoStatePtr`] is the owning smart handle.
//! Destroying it while any constituent submission is still in flight blocks
//! until everything is cancelled or completed: freeing live kernel I/O
//! state would hand the kernel a dangling buffer.

use std::marker::PhantomData;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result, fatal};
use crate::file::FileHandle;
use crate::handle::{Caching, Creation, HandleFlags, Mode};
use crate::io::{Buffer, Buffers, ConstBuffer, ConstBuffers, Deadline, IoHandle, IoRequest};
use crate::service::IoService;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

#[cfg(unix)]
use crate::service::PendingAio;

/// Whether an in-flight state is a read or a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// A scatter read.
    Read,
    /// A gather write.
    Write,
}

type Completion = Box<dyn FnOnce(&AsyncFileHandle<'_>, Result<Buffers>) + Send>;

struct StateShared {
    result: Result<Buffers>,
    completion: Option<Completion>,
}

/// Per-submission trailing state on Windows: the kernel writes through the
/// `OVERLAPPED`, and the drain loop maps it back to its state record.
#[cfg(windows)]
#[repr(C)]
pub(crate) struct OverlappedRecord {
    pub(crate) overlapped: windows_sys::Win32::System::IO::OVERLAPPED,
    pub(crate) state: *mut IoState,
    pub(crate) index: usize,
}

/// State of one scheduled operation, allocated out-of-line so the kernel
/// can hold pointers into it for the operation's lifetime.
pub(crate) struct IoState {
    /// The originating handle. Valid for as long as the owning
    /// [`IoStatePtr`] exists, which borrows that handle.
    parent: *const (),
    operation: Operation,
    items: usize,
    items_to_go: AtomicUsize,
    /// Set by whoever brings `items_to_go` to zero, strictly after the
    /// completion has run. Waiters must key off this, not the counter: the
    /// counter reaches zero while the finisher is still inside the state.
    settled: AtomicBool,
    shared: Mutex<StateShared>,
    #[cfg(unix)]
    aiocbs: Box<[libc::aiocb]>,
    #[cfg(windows)]
    records: Box<[OverlappedRecord]>,
}

unsafe impl Send for IoState {}
unsafe impl Sync for IoState {}

impl IoState {
    /// Settle one constituent submission. Invoked by the service's drain
    /// loop with the platform completion inputs; when the last submission
    /// settles, the user completion fires on the calling thread.
    pub(crate) unsafe fn complete(state: *mut IoState, index: usize, errcode: i32, bytes: isize) {
        let st = unsafe { &*state };
        {
            let mut shared = st.shared.lock();
            let failure = match &mut shared.result {
                Ok(bufs) => {
                    if errcode == 0 {
                        bufs[index].set_len(bytes.max(0) as usize);
                        None
                    } else {
                        Some(Error::from_errno(errcode))
                    }
                }
                // first error wins
                Err(_) => None,
            };
            if let Some(err) = failure {
                shared.result = Err(err);
            }
        }
        if st.items_to_go.fetch_sub(1, Ordering::AcqRel) == 1 {
            let (result, completion) = {
                let mut shared = st.shared.lock();
                let result = std::mem::replace(&mut shared.result, Ok(Buffers::new()));
                (result, shared.completion.take())
            };
            if let Some(completion) = completion {
                // The owning IoStatePtr borrows the handle, so the pointer
                // is still good; the 'static here is erasure, not a claim.
                let parent = unsafe { &*(st.parent as *const AsyncFileHandle<'static>) };
                completion(parent, result);
            }
            st.settled.store(true, Ordering::Release);
        }
    }
}

impl Drop for IoState {
    fn drop(&mut self) {
        // the smart handle drains before freeing; getting here with work in
        // flight means the kernel still owns pointers into this allocation
        if *self.items_to_go.get_mut() != 0 {
            fatal("i/o state destroyed while i/o is still in flight");
        }
    }
}

/// Owning smart handle to the state of a scheduled operation.
///
/// Dropping it before the operation settles is **blocking**: the in-flight
/// submissions are cancelled and the service is drained until every one of
/// them has been delivered.
pub struct IoStatePtr<'h> {
    state: NonNull<IoState>,
    _parent: PhantomData<&'h ()>,
}

impl IoStatePtr<'_> {
    /// Whether every constituent submission has settled (and therefore the
    /// completion has run).
    pub fn finished(&self) -> bool {
        unsafe { self.state.as_ref() }
            .settled
            .load(Ordering::Acquire)
    }

    /// The number of buffers originally submitted.
    pub fn items(&self) -> usize {
        unsafe { self.state.as_ref() }.items
    }

    /// Whether this state belongs to a read or a write.
    pub fn operation(&self) -> Operation {
        unsafe { self.state.as_ref() }.operation
    }
}

impl std::fmt::Debug for IoStatePtr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoStatePtr")
            .field("operation", &self.operation())
            .field("items", &self.items())
            .field("finished", &self.finished())
            .finish()
    }
}

impl Drop for IoStatePtr<'_> {
    fn drop(&mut self) {
        let st = unsafe { self.state.as_ref() };
        if !st.settled.load(Ordering::Acquire) {
            let parent = unsafe { &*(st.parent as *const AsyncFileHandle<'static>) };
            cancel_native(parent, st);
            // run() blocks on the drain lock, so a finisher on another
            // thread has left the state before we observe it settled
            while !st.settled.load(Ordering::Acquire) {
                if parent.service.run(Deadline::Infinite).is_err() {
                    fatal("could not drain in-flight i/o while destroying its state");
                }
            }
        }
        unsafe { drop(Box::from_raw(self.state.as_ptr())) };
    }
}

#[cfg(unix)]
fn cancel_native(parent: &AsyncFileHandle<'_>, st: &IoState) {
    let fd = parent.file.as_raw_fd();
    for cb in st.aiocbs.iter() {
        // already-settled blocks reject the cancel harmlessly
        unsafe { libc::aio_cancel(fd, cb as *const libc::aiocb as *mut libc::aiocb) };
    }
}

#[cfg(windows)]
fn cancel_native(parent: &AsyncFileHandle<'_>, st: &IoState) {
    use windows_sys::Win32::System::IO::CancelIoEx;
    let h = parent.file.handle().native().handle();
    for record in st.records.iter() {
        unsafe { CancelIoEx(h, &record.overlapped) };
    }
}

/// A [`FileHandle`] bound to an [`IoService`], able to schedule reads and
/// writes that complete later.
///
/// The service is borrowed; the handle must not outlive it, and the
/// compiler enforces exactly that.
#[derive(Debug)]
pub struct AsyncFileHandle<'s> {
    file: FileHandle,
    service: &'s IoService,
}

impl<'s> AsyncFileHandle<'s> {
    /// Bind an already open file to `service`. The file should have been
    /// opened with [`HandleFlags::OVERLAPPED`]; the open-family constructors
    /// on this type force that flag.
    pub fn from_file(service: &'s IoService, file: FileHandle) -> Result<AsyncFileHandle<'s>> {
        #[cfg(windows)]
        service.attach(file.handle().native().handle())?;
        Ok(AsyncFileHandle { file, service })
    }

    /// As [`FileHandle::open`], bound to `service`.
    pub fn open(
        service: &'s IoService,
        path: impl AsRef<Path>,
        mode: Mode,
        creation: Creation,
        caching: Caching,
        flags: HandleFlags,
    ) -> Result<AsyncFileHandle<'s>> {
        let file = FileHandle::open(
            path,
            mode,
            creation,
            caching,
            flags | HandleFlags::OVERLAPPED,
        )?;
        AsyncFileHandle::from_file(service, file)
    }

    /// As [`FileHandle::random_file`], bound to `service`.
    pub fn random_file(
        service: &'s IoService,
        dir: impl AsRef<Path>,
        mode: Mode,
        caching: Caching,
        flags: HandleFlags,
    ) -> Result<AsyncFileHandle<'s>> {
        let file =
            FileHandle::random_file(dir, mode, caching, flags | HandleFlags::OVERLAPPED)?;
        AsyncFileHandle::from_file(service, file)
    }

    /// As [`FileHandle::temp_file`], bound to `service`.
    pub fn temp_file(
        service: &'s IoService,
        name: Option<&Path>,
        mode: Mode,
        creation: Creation,
        caching: Caching,
        flags: HandleFlags,
    ) -> Result<AsyncFileHandle<'s>> {
        let file =
            FileHandle::temp_file(name, mode, creation, caching, flags | HandleFlags::OVERLAPPED)?;
        AsyncFileHandle::from_file(service, file)
    }

    /// As [`FileHandle::temp_inode`], bound to `service`.
    pub fn temp_inode(
        service: &'s IoService,
        dir: impl AsRef<Path>,
        mode: Mode,
        flags: HandleFlags,
    ) -> Result<AsyncFileHandle<'s>> {
        let file = FileHandle::temp_inode(dir, mode, flags | HandleFlags::OVERLAPPED)?;
        AsyncFileHandle::from_file(service, file)
    }

    /// Duplicate the kernel handle onto a possibly different service.
    pub fn clone_with_service<'t>(
        &self,
        service: &'t IoService,
    ) -> Result<AsyncFileHandle<'t>> {
        AsyncFileHandle::from_file(service, self.file.clone_handle()?)
    }

    /// The underlying file handle.
    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    /// Unbind, returning the underlying file handle.
    pub fn into_file(self) -> FileHandle {
        self.file
    }

    /// The service completions are delivered through.
    pub fn service(&self) -> &'s IoService {
        self.service
    }

    /// Schedule a scatter read. Never blocks.
    ///
    /// `completion` is invoked exactly once, on the thread draining the
    /// service, when every constituent buffer has settled. Partial reads
    /// and end-of-file arrive as successes with shortened buffer lengths.
    pub fn async_read<C>(&self, req: IoRequest<Buffer>, completion: C) -> Result<IoStatePtr<'_>>
    where
        C: FnOnce(&AsyncFileHandle<'_>, Result<Buffers>) + Send + 'static,
    {
        self.begin_io(Operation::Read, req.buffers, req.offset, Box::new(completion))
    }

    /// Schedule a gather write. Never blocks. See [`AsyncFileHandle::async_read`].
    pub fn async_write<C>(
        &self,
        req: IoRequest<ConstBuffer>,
        completion: C,
    ) -> Result<IoStatePtr<'_>>
    where
        C: FnOnce(&AsyncFileHandle<'_>, Result<ConstBuffers>) + Send + 'static,
    {
        let bufs: Buffers = req
            .buffers
            .iter()
            .map(|b| Buffer::new(b.as_ptr() as *mut u8, b.len()))
            .collect();
        let completion: Completion = Box::new(move |handle, result: Result<Buffers>| {
            completion(
                handle,
                result.map(|bufs| {
                    bufs.iter()
                        .map(|b| ConstBuffer::new(b.as_mut_ptr(), b.len()))
                        .collect()
                }),
            )
        });
        self.begin_io(Operation::Write, bufs, req.offset, completion)
    }

    /// Allocate the state, submit one native operation per buffer at
    /// accumulated offsets, and register everything with the service. A
    /// partial submission failure unwinds completely before the error is
    /// returned.
    #[cfg(unix)]
    fn begin_io(
        &self,
        operation: Operation,
        bufs: Buffers,
        offset: u64,
        completion: Completion,
    ) -> Result<IoStatePtr<'_>> {
        if bufs.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        let fd = self.file.as_raw_fd();
        let items = bufs.len();

        let mut aiocbs = Vec::with_capacity(items);
        let mut off = offset as libc::off_t;
        for b in &bufs {
            let mut cb: libc::aiocb = unsafe { std::mem::zeroed() };
            cb.aio_fildes = fd;
            cb.aio_buf = b.as_mut_ptr() as *mut libc::c_void;
            cb.aio_nbytes = b.len();
            cb.aio_offset = off;
            cb.aio_sigevent.sigev_notify = libc::SIGEV_NONE;
            off += b.len() as libc::off_t;
            aiocbs.push(cb);
        }

        let state = Box::into_raw(Box::new(IoState {
            parent: self as *const AsyncFileHandle<'_> as *const (),
            operation,
            items,
            items_to_go: AtomicUsize::new(items),
            settled: AtomicBool::new(false),
            shared: Mutex::new(StateShared {
                result: Ok(bufs),
                completion: Some(completion),
            }),
            aiocbs: aiocbs.into_boxed_slice(),
        }));

        for index in 0..items {
            let cb = unsafe { &mut (*state).aiocbs[index] as *mut libc::aiocb };
            let rc = unsafe {
                match operation {
                    Operation::Read => libc::aio_read(cb),
                    Operation::Write => libc::aio_write(cb),
                }
            };
            if rc < 0 {
                let err = Error::last_os_error();
                unsafe { self.unwind_submission(state, index, items) };
                return Err(err);
            }
            self.service.register(PendingAio {
                aiocb: cb,
                state,
                index,
            });
        }

        Ok(IoStatePtr {
            state: unsafe { NonNull::new_unchecked(state) },
            _parent: PhantomData,
        })
    }

    /// Abandon a half-submitted state: silence its completion, write off
    /// the never-submitted buffers, cancel the submitted ones and drain
    /// until the kernel lets go of the allocation.
    #[cfg(unix)]
    unsafe fn unwind_submission(&self, state: *mut IoState, submitted: usize, items: usize) {
        let fd = self.file.as_raw_fd();
        unsafe {
            (*state).shared.lock().completion = None;
            let prev = (*state)
                .items_to_go
                .fetch_sub(items - submitted, Ordering::AcqRel);
            if prev == items - submitted {
                // every submitted block was already reaped; we finished it
                (*state).settled.store(true, Ordering::Release);
            }
            for j in 0..submitted {
                libc::aio_cancel(fd, &mut (*state).aiocbs[j] as *mut libc::aiocb);
            }
            while !(*state).settled.load(Ordering::Acquire) {
                if self.service.run(Deadline::Infinite).is_err() {
                    fatal("could not drain a failed i/o submission");
                }
            }
            drop(Box::from_raw(state));
        }
    }

    #[cfg(windows)]
    fn begin_io(
        &self,
        operation: Operation,
        bufs: Buffers,
        offset: u64,
        completion: Completion,
    ) -> Result<IoStatePtr<'_>> {
        use windows_sys::Win32::Foundation::{ERROR_IO_PENDING, GetLastError};
        use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
        use windows_sys::Win32::System::IO::CancelIoEx;

        if bufs.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument));
        }
        let h = self.file.handle().native().handle();
        let items = bufs.len();

        let mut records = Vec::with_capacity(items);
        for _ in 0..items {
            records.push(OverlappedRecord {
                overlapped: unsafe { std::mem::zeroed() },
                state: std::ptr::null_mut(),
                index: 0,
            });
        }

        let state = Box::into_raw(Box::new(IoState {
            parent: self as *const AsyncFileHandle<'_> as *const (),
            operation,
            items,
            items_to_go: AtomicUsize::new(items),
            settled: AtomicBool::new(false),
            shared: Mutex::new(StateShared {
                result: Ok(bufs.clone()),
                completion: Some(completion),
            }),
            records: records.into_boxed_slice(),
        }));

        let mut off = offset;
        for index in 0..items {
            let record = unsafe { &mut (*state).records[index] };
            record.state = state;
            record.index = index;
            unsafe {
                record.overlapped.Anonymous.Anonymous.Offset = off as u32;
                record.overlapped.Anonymous.Anonymous.OffsetHigh = (off >> 32) as u32;
            }
            self.service.note_submitted();
            let ok = unsafe {
                match operation {
                    Operation::Read => ReadFile(
                        h,
                        bufs[index].as_mut_ptr(),
                        bufs[index].len() as u32,
                        std::ptr::null_mut(),
                        &mut record.overlapped,
                    ),
                    Operation::Write => WriteFile(
                        h,
                        bufs[index].as_mut_ptr(),
                        bufs[index].len() as u32,
                        std::ptr::null_mut(),
                        &mut record.overlapped,
                    ),
                }
            };
            if ok == 0 && unsafe { GetLastError() } != ERROR_IO_PENDING {
                let err = Error::last_os_error();
                self.service.note_unsubmitted();
                unsafe {
                    (*state).shared.lock().completion = None;
                    let prev = (*state)
                        .items_to_go
                        .fetch_sub(items - index, Ordering::AcqRel);
                    if prev == items - index {
                        (*state).settled.store(true, Ordering::Release);
                    }
                    for j in 0..index {
                        CancelIoEx(h, &(*state).records[j].overlapped);
                    }
                    while !(*state).settled.load(Ordering::Acquire) {
                        if self.service.run(Deadline::Infinite).is_err() {
                            fatal("could not drain a failed i/o submission");
                        }
                    }
                    drop(Box::from_raw(state));
                }
                return Err(err);
            }
            off += bufs[index].len() as u64;
        }

        Ok(IoStatePtr {
            state: unsafe { NonNull::new_unchecked(state) },
            _parent: PhantomData,
        })
    }

    /// Drive the service until `slot` is filled or the deadline expires.
    fn await_slot<T: Send + 'static>(
        &self,
        state: IoStatePtr<'_>,
        slot: &Arc<Mutex<Option<Result<T>>>>,
        deadline: Deadline,
        started: Instant,
    ) -> Result<T> {
        loop {
            if let Some(result) = slot.lock().take() {
                drop(state);
                return result;
            }
            let remaining = deadline.remaining(started);
            if matches!(remaining, Some(left) if left.is_zero()) {
                // cancel; drop blocks until the state settles and the
                // completion has filled the slot one way or the other
                drop(state);
                return match slot.lock().take() {
                    Some(Ok(done)) => Ok(done),
                    Some(Err(err)) if err.kind() == ErrorKind::OperationCanceled => {
                        Err(Error::new(ErrorKind::TimedOut))
                    }
                    Some(Err(err)) => Err(err),
                    None => Err(Error::new(ErrorKind::TimedOut)),
                };
            }
            let step = match remaining {
                None => Deadline::Infinite,
                Some(left) => Deadline::Relative(left),
            };
            match self.service.run(step) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::TimedOut => {}
                Err(err) => {
                    drop(state);
                    return Err(err);
                }
            }
        }
    }
}

impl IoHandle for AsyncFileHandle<'_> {
    /// Synchronous read over the asynchronous path: schedule, drive the
    /// service, cancel on deadline expiry.
    fn read(&self, req: IoRequest<Buffer>, deadline: Deadline) -> Result<Buffers> {
        let started = Instant::now();
        let slot: Arc<Mutex<Option<Result<Buffers>>>> = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        let state = self.async_read(req, move |_, result| {
            *out.lock() = Some(result);
        })?;
        self.await_slot(state, &slot, deadline, started)
    }

    fn write(&self, req: IoRequest<ConstBuffer>, deadline: Deadline) -> Result<ConstBuffers> {
        let started = Instant::now();
        let slot: Arc<Mutex<Option<Result<ConstBuffers>>>> = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        let state = self.async_write(req, move |_, result| {
            *out.lock() = Some(result);
        })?;
        self.await_slot(state, &slot, deadline, started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use std::sync::atomic::AtomicBool;

    fn service_and_file(dir: &Path) -> (IoService, FileHandle) {
        let service = IoService::new().unwrap();
        let file = FileHandle::open(
            dir.join("af"),
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::OVERLAPPED,
        )
        .unwrap();
        (service, file)
    }

    #[test]
    fn completion_fires_on_the_running_thread() {
        let dir = tempfile::tempdir().unwrap();
        let (service, file) = service_and_file(dir.path());
        let handle = AsyncFileHandle::from_file(&service, file).unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&fired);
        let data = b"async".to_vec();
        let state = handle
            .async_write(
                IoRequest::new(smallvec![ConstBuffer::from(&data[..])], 0),
                move |_, result| {
                    let bufs = result.unwrap();
                    assert_eq!(bufs[0].len(), 5);
                    seen.store(true, Ordering::SeqCst);
                },
            )
            .unwrap();
        assert_eq!(state.items(), 1);
        assert_eq!(state.operation(), Operation::Write);

        handle.service().run_until_empty().unwrap();
        assert!(state.finished());
        assert!(fired.load(Ordering::SeqCst));
        drop(state);
        assert_eq!(handle.file().length().unwrap(), 5);
    }

    #[test]
    fn scatter_read_settles_every_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let (service, file) = service_and_file(dir.path());
        let data = vec![9u8; 2500];
        file.write(
            IoRequest::new(smallvec![ConstBuffer::from(&data[..])], 0),
            Deadline::Infinite,
        )
        .unwrap();
        let handle = AsyncFileHandle::from_file(&service, file).unwrap();

        let mut a = vec![0u8; 1024];
        let mut b = vec![0u8; 1024];
        let mut c = vec![0u8; 1024];
        let lens: Arc<Mutex<Option<Vec<usize>>>> = Arc::new(Mutex::new(None));
        let out = Arc::clone(&lens);
        let state = handle
            .async_read(
                IoRequest::new(
                    smallvec![
                        Buffer::from(&mut a[..]),
                        Buffer::from(&mut b[..]),
                        Buffer::from(&mut c[..]),
                    ],
                    0,
                ),
                move |_, result| {
                    let bufs = result.unwrap();
                    *out.lock() = Some(bufs.iter().map(|b| b.len()).collect());
                },
            )
            .unwrap();

        handle.service().run_until_empty().unwrap();
        drop(state);
        assert_eq!(lens.lock().take().unwrap(), vec![1024, 1024, 452]);
        assert!(a.iter().all(|&x| x == 9));
        assert!(c[..452].iter().all(|&x| x == 9));
    }

    #[test]
    fn dropping_a_state_blocks_until_settled() {
        let dir = tempfile::tempdir().unwrap();
        let (service, file) = service_and_file(dir.path());
        let handle = AsyncFileHandle::from_file(&service, file).unwrap();

        let data = vec![3u8; 256 * 1024];
        let state = handle
            .async_write(
                IoRequest::new(smallvec![ConstBuffer::from(&data[..])], 0),
                |_, _| {},
            )
            .unwrap();
        // dropped with the write possibly still in flight: must cancel or
        // complete before the allocation (and `data`) may be reused
        drop(state);
        assert_eq!(handle.service().outstanding(), 0);

        // the file is either untouched or fully written, never torn
        let len = handle.file().length().unwrap();
        assert!(len == 0 || len == 256 * 1024, "torn write: {len}");
    }

    #[test]
    fn sync_reads_run_over_the_async_path() {
        let dir = tempfile::tempdir().unwrap();
        let (service, file) = service_and_file(dir.path());
        file.write(
            IoRequest::new(smallvec![ConstBuffer::from(&b"roundtrip"[..])], 0),
            Deadline::Infinite,
        )
        .unwrap();
        let handle = AsyncFileHandle::from_file(&service, file).unwrap();

        let mut buf = [0u8; 9];
        let got = handle
            .read(
                IoRequest::new(smallvec![Buffer::from(&mut buf[..])], 0),
                Deadline::Infinite,
            )
            .unwrap();
        assert_eq!(got[0].len(), 9);
        assert_eq!(&buf, b"roundtrip");
    }

    #[test]
    fn empty_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (service, file) = service_and_file(dir.path());
        let handle = AsyncFileHandle::from_file(&service, file).unwrap();
        let err = handle
            .async_read(IoRequest::new(Buffers::new(), 0), |_, _| {})
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
