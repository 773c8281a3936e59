//! The completion drain loop binding asynchronous file handles to the
//! platform's asynchronous I/O machinery.
//!
//! An [`IoService`] is not a thread pool and not a socket reactor. Its only
//! job is to hold the set of in-flight file I/O states and, from whichever
//! single thread calls [`IoService::run`], deliver their completions.

use std::time::Instant;

use parking_lot::Mutex;

use crate::async_file::IoState;
use crate::error::{Error, ErrorKind, Result};
use crate::io::Deadline;

/// One native submission awaiting completion.
#[cfg(unix)]
#[derive(Clone, Copy)]
pub(crate) struct PendingAio {
    pub(crate) aiocb: *mut libc::aiocb,
    pub(crate) state: *mut IoState,
    pub(crate) index: usize,
}

/// Drains file-I/O completions and invokes their callbacks.
///
/// Exactly one thread at a time may be inside [`IoService::run`]; a second
/// caller blocks until the first drain finishes. Callbacks execute
/// synchronously on the running thread and must not re-enter `run`.
#[derive(Debug)]
pub struct IoService {
    #[cfg(unix)]
    pending: Mutex<Vec<PendingAio>>,
    #[cfg(windows)]
    port: windows_sys::Win32::Foundation::HANDLE,
    #[cfg(windows)]
    outstanding: std::sync::atomic::AtomicUsize,
    run_lock: Mutex<()>,
}

// The raw pointers in the pending list stay valid until their completions
// are dispatched: the owning IoStatePtr refuses to free a state with
// submissions still in flight.
unsafe impl Send for IoService {}
unsafe impl Sync for IoService {}

#[cfg(unix)]
impl std::fmt::Debug for PendingAio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAio")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl IoService {
    /// Create an empty service.
    pub fn new() -> Result<IoService> {
        #[cfg(unix)]
        {
            Ok(IoService {
                pending: Mutex::new(Vec::new()),
                run_lock: Mutex::new(()),
            })
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;
            use windows_sys::Win32::System::IO::CreateIoCompletionPort;
            let port = unsafe {
                CreateIoCompletionPort(INVALID_HANDLE_VALUE, std::ptr::null_mut(), 0, 1)
            };
            if port.is_null() {
                return Err(Error::last_os_error());
            }
            Ok(IoService {
                port,
                outstanding: std::sync::atomic::AtomicUsize::new(0),
                run_lock: Mutex::new(()),
            })
        }
    }

    /// Number of native submissions not yet completed.
    pub fn outstanding(&self) -> usize {
        #[cfg(unix)]
        {
            self.pending.lock().len()
        }
        #[cfg(windows)]
        {
            self.outstanding.load(std::sync::atomic::Ordering::Acquire)
        }
    }

    /// Wait for completions until `deadline` and dispatch them.
    ///
    /// Returns `Ok(true)` if at least one completion was dispatched,
    /// `Ok(false)` if there was nothing in flight, and
    /// [`ErrorKind::TimedOut`] if the deadline expired first.
    pub fn run(&self, deadline: Deadline) -> Result<bool> {
        let _serial = self.run_lock.lock();
        let started = Instant::now();
        self.run_locked(deadline, started)
    }

    /// Dispatch completions until nothing is left in flight.
    pub fn run_until_empty(&self) -> Result<()> {
        while self.run(Deadline::Infinite)? {}
        Ok(())
    }

    #[cfg(unix)]
    fn run_locked(&self, deadline: Deadline, started: Instant) -> Result<bool> {
        loop {
            let list: Vec<*const libc::aiocb> = {
                let pending = self.pending.lock();
                pending.iter().map(|p| p.aiocb as *const _).collect()
            };
            if list.is_empty() {
                return Ok(false);
            }
            // anything may have settled while we were not looking
            if self.reap() {
                return Ok(true);
            }

            let remaining = deadline.remaining(started);
            if let Some(left) = remaining {
                if left.is_zero() {
                    return Err(Error::new(ErrorKind::TimedOut));
                }
            }
            let ts = remaining.map(|left| libc::timespec {
                tv_sec: left.as_secs() as libc::time_t,
                tv_nsec: left.subsec_nanos() as _,
            });
            let ts_ptr = ts
                .as_ref()
                .map_or(std::ptr::null(), |t| t as *const libc::timespec);

            let rc =
                unsafe { libc::aio_suspend(list.as_ptr(), list.len() as libc::c_int, ts_ptr) };
            if rc < 0 {
                let err = Error::last_os_error();
                match err.code() {
                    libc::EINTR => continue,
                    libc::EAGAIN => return Err(Error::new(ErrorKind::TimedOut)),
                    _ => return Err(err),
                }
            }
            if self.reap() {
                return Ok(true);
            }
            // woken for a block that another path already consumed; go again
        }
    }

    /// Sweep the pending list for settled control blocks and dispatch them.
    #[cfg(unix)]
    fn reap(&self) -> bool {
        let mut settled: Vec<(PendingAio, i32)> = Vec::new();
        {
            let mut pending = self.pending.lock();
            pending.retain(|p| {
                let errcode = unsafe { libc::aio_error(p.aiocb) };
                if errcode == libc::EINPROGRESS {
                    true
                } else {
                    settled.push((*p, errcode));
                    false
                }
            });
        }
        let any = !settled.is_empty();
        // dispatch outside the lock: callbacks may submit new i/o
        for (p, errcode) in settled {
            let bytes = unsafe { libc::aio_return(p.aiocb) };
            let errcode = if errcode < 0 { libc::EINVAL } else { errcode };
            unsafe { IoState::complete(p.state, p.index, errcode, bytes) };
        }
        any
    }

    #[cfg(unix)]
    pub(crate) fn register(&self, entry: PendingAio) {
        self.pending.lock().push(entry);
    }

    #[cfg(windows)]
    fn run_locked(&self, deadline: Deadline, started: Instant) -> Result<bool> {
        use std::sync::atomic::Ordering;
        use windows_sys::Win32::Foundation::{
            ERROR_HANDLE_EOF, GetLastError, WAIT_TIMEOUT,
        };
        use windows_sys::Win32::System::IO::{GetQueuedCompletionStatus, OVERLAPPED};

        use crate::async_file::OverlappedRecord;

        if self.outstanding.load(Ordering::Acquire) == 0 {
            return Ok(false);
        }
        let timeout = match deadline.remaining(started) {
            None => u32::MAX, // INFINITE
            Some(left) => left.as_millis().min(u32::MAX as u128) as u32,
        };

        let mut bytes: u32 = 0;
        let mut key: usize = 0;
        let mut overlapped: *mut OVERLAPPED = std::ptr::null_mut();
        let ok = unsafe {
            GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut overlapped, timeout)
        };
        let mut errcode = 0i32;
        if ok == 0 {
            let code = unsafe { GetLastError() };
            if overlapped.is_null() {
                return if code == WAIT_TIMEOUT {
                    Err(Error::new(ErrorKind::TimedOut))
                } else {
                    Err(Error::from_errno(code as i32))
                };
            }
            // a completion that itself failed
            errcode = if code == ERROR_HANDLE_EOF {
                bytes = 0;
                0
            } else {
                code as i32
            };
        }

        // the OVERLAPPED is the first field of its record
        let record = overlapped as *mut OverlappedRecord;
        let (state, index) = unsafe { ((*record).state, (*record).index) };
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        unsafe { IoState::complete(state, index, errcode, bytes as isize) };
        Ok(true)
    }

    /// Associate a file handle with the completion port.
    #[cfg(windows)]
    pub(crate) fn attach(&self, handle: windows_sys::Win32::Foundation::HANDLE) -> Result<()> {
        use windows_sys::Win32::System::IO::CreateIoCompletionPort;
        let port = unsafe { CreateIoCompletionPort(handle, self.port, 0, 0) };
        if port.is_null() {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(windows)]
    pub(crate) fn note_submitted(&self) {
        self.outstanding
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    #[cfg(windows)]
    pub(crate) fn note_unsubmitted(&self) {
        self.outstanding
            .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    }
}

#[cfg(windows)]
impl Drop for IoService {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        if unsafe { CloseHandle(self.port) } == 0 {
            crate::error::fatal("close of an i/o completion port failed during destruction");
        }
    }
}
