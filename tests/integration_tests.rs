use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use lowio::{
    AsyncFileHandle, Buffer, Buffers, Caching, ConstBuffer, Creation, Deadline, ErrorKind,
    FileHandle, HandleFlags, IoHandle, IoRequest, IoService, MapHandle, Mode, SectionFlags,
    SectionHandle, Stat, StatWants,
};
use smallvec::smallvec;
use tempfile::TempDir;

fn write_all(file: &FileHandle, data: &[u8], offset: u64) {
    let done = file
        .write(
            IoRequest::new(smallvec![ConstBuffer::from(data)], offset),
            Deadline::Infinite,
        )
        .unwrap();
    assert_eq!(done[0].len(), data.len());
}

fn read_exact(file: &FileHandle, len: usize, offset: u64) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let got = file
        .read(
            IoRequest::new(smallvec![Buffer::from(&mut buf[..])], offset),
            Deadline::Infinite,
        )
        .unwrap();
    assert_eq!(got[0].len(), len);
    buf
}

#[test]
fn round_trip_survives_reopen() {
    let tmpdir: TempDir = tempfile::tempdir().unwrap();
    let path = tmpdir.path().join("persist");
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 255) as u8).collect();

    {
        let file = FileHandle::open(
            &path,
            Mode::Write,
            Creation::IfNeeded,
            Caching::All,
            HandleFlags::empty(),
        )
        .unwrap();
        write_all(&file, &data, 0);
    }

    let file = FileHandle::open(
        &path,
        Mode::Read,
        Creation::OpenExisting,
        Caching::All,
        HandleFlags::empty(),
    )
    .unwrap();
    assert_eq!(file.length().unwrap(), data.len() as u64);
    assert_eq!(read_exact(&file, data.len(), 0), data);
}

#[test]
fn mapped_view_and_file_agree() {
    let tmpdir = tempfile::tempdir().unwrap();
    let file = FileHandle::open(
        tmpdir.path().join("agree"),
        Mode::Write,
        Creation::IfNeeded,
        Caching::All,
        HandleFlags::empty(),
    )
    .unwrap();
    let data: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 253) as u8).collect();
    write_all(&file, &data, 0);

    let section = SectionHandle::new(Some(&file), 0, SectionFlags::read_write()).unwrap();
    let map = MapHandle::new(&section, 0, 0, SectionFlags::read_write()).unwrap();

    let mut scratch = vec![0u8; data.len()];
    let via_map = map
        .read(
            IoRequest::new(smallvec![Buffer::from(&mut scratch[..])], 0),
            Deadline::Infinite,
        )
        .unwrap();
    assert_eq!(unsafe { via_map[0].as_slice() }, &data[..]);
    assert_eq!(read_exact(&file, data.len(), 0), data);

    // writes through the view land in the file
    let patch = b"patched";
    map.write(
        IoRequest::new(smallvec![ConstBuffer::from(&patch[..])], 4096),
        Deadline::Infinite,
    )
    .unwrap();
    drop(map);
    assert_eq!(read_exact(&file, patch.len(), 4096), patch);
}

#[test]
fn async_scatter_read_clamps_at_eof() {
    let tmpdir = tempfile::tempdir().unwrap();
    let service = IoService::new().unwrap();
    let handle = AsyncFileHandle::open(
        &service,
        tmpdir.path().join("eof"),
        Mode::Write,
        Creation::IfNeeded,
        Caching::All,
        HandleFlags::empty(),
    )
    .unwrap();
    write_all(handle.file(), &vec![1u8; 2500], 0);

    let mut a = vec![0u8; 1024];
    let mut b = vec![0u8; 1024];
    let mut c = vec![0u8; 1024];
    let bufs: Buffers = smallvec![
        Buffer::from(&mut a[..]),
        Buffer::from(&mut b[..]),
        Buffer::from(&mut c[..]),
    ];
    let got = handle
        .read(IoRequest::new(bufs, 0), Deadline::Infinite)
        .unwrap();
    let lens: Vec<usize> = got.iter().map(|b| b.len()).collect();
    assert_eq!(lens, vec![1024, 1024, 452]);
}

#[test]
fn dropped_write_state_never_tears_a_buffer() {
    let tmpdir = tempfile::tempdir().unwrap();
    let service = IoService::new().unwrap();
    let handle = AsyncFileHandle::open(
        &service,
        tmpdir.path().join("torn"),
        Mode::Write,
        Creation::IfNeeded,
        Caching::All,
        HandleFlags::empty(),
    )
    .unwrap();

    let data = vec![0xC3u8; 128 * 1024];
    let state = handle
        .async_write(
            IoRequest::new(smallvec![ConstBuffer::from(&data[..])], 0),
            |_, _| {},
        )
        .unwrap();
    drop(state); // blocks until the kernel settles the submission

    assert_eq!(service.outstanding(), 0);
    let len = handle.file().length().unwrap();
    assert!(len == 0 || len == data.len() as u64, "torn write: {len}");
    if len != 0 {
        assert_eq!(read_exact(handle.file(), data.len(), 0), data);
    }
}

#[test]
fn completions_drain_on_the_thread_that_runs() {
    let tmpdir = tempfile::tempdir().unwrap();
    let service = IoService::new().unwrap();
    let handle = AsyncFileHandle::open(
        &service,
        tmpdir.path().join("drain"),
        Mode::Write,
        Creation::IfNeeded,
        Caching::All,
        HandleFlags::empty(),
    )
    .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let mut states = Vec::new();
    let payload = vec![7u8; 4096];
    for i in 0..8u64 {
        let seen = Arc::clone(&fired);
        states.push(
            handle
                .async_write(
                    IoRequest::new(smallvec![ConstBuffer::from(&payload[..])], i * 4096),
                    move |_, result| {
                        result.unwrap();
                        seen.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .unwrap(),
        );
    }
    service.run_until_empty().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 8);
    assert!(states.iter().all(|s| s.finished()));
    drop(states);
    assert_eq!(handle.file().length().unwrap(), 8 * 4096);
}

#[test]
fn concurrent_reads_share_a_handle() {
    let tmpdir = tempfile::tempdir().unwrap();
    let file = FileHandle::open(
        tmpdir.path().join("shared"),
        Mode::Write,
        Creation::IfNeeded,
        Caching::All,
        HandleFlags::empty(),
    )
    .unwrap();
    let data: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 241) as u8).collect();
    write_all(&file, &data, 0);

    let file = Arc::new(file);
    let mut workers = Vec::new();
    for t in 0..4usize {
        let file = Arc::clone(&file);
        let expected = data.clone();
        workers.push(thread::spawn(move || {
            for _ in 0..16 {
                let offset = t * 8192;
                let mut buf = vec![0u8; 8192];
                let got = file
                    .read(
                        IoRequest::new(smallvec![Buffer::from(&mut buf[..])], offset as u64),
                        Deadline::Infinite,
                    )
                    .unwrap();
                assert_eq!(got[0].len(), 8192);
                assert_eq!(&buf[..], &expected[offset..offset + 8192]);
            }
        }));
    }
    for w in workers {
        w.join().unwrap();
    }
}

#[test]
fn zero_deadline_read_times_out_or_finishes() {
    let tmpdir = tempfile::tempdir().unwrap();
    let service = IoService::new().unwrap();
    let handle = AsyncFileHandle::open(
        &service,
        tmpdir.path().join("dl"),
        Mode::Write,
        Creation::IfNeeded,
        Caching::All,
        HandleFlags::empty(),
    )
    .unwrap();
    write_all(handle.file(), b"abcdefgh", 0);

    let mut buf = [0u8; 8];
    match handle.read(
        IoRequest::new(smallvec![Buffer::from(&mut buf[..])], 0),
        Deadline::nonblocking(),
    ) {
        // the kernel may have settled it before the poll
        Ok(got) => assert_eq!(got[0].len(), 8),
        Err(err) => assert_eq!(err.kind(), ErrorKind::TimedOut),
    }

    // and with room to breathe it always completes
    let got = handle
        .read(
            IoRequest::new(smallvec![Buffer::from(&mut buf[..])], 0),
            Deadline::Relative(Duration::from_secs(30)),
        )
        .unwrap();
    assert_eq!(got[0].len(), 8);
    assert_eq!(&buf, b"abcdefgh");
}

#[test]
fn temp_files_carry_their_conventions() {
    let file = FileHandle::temp_file(
        None,
        Mode::Write,
        Creation::IfNeeded,
        Caching::Temporary,
        HandleFlags::UNLINK_ON_CLOSE,
    )
    .unwrap();
    write_all(&file, b"temp", 0);
    assert_eq!(file.length().unwrap(), 4);
    #[cfg(unix)]
    assert!(!file.path().exists());
}

#[test]
fn stat_matches_across_clones_and_sections() {
    let tmpdir = tempfile::tempdir().unwrap();
    let file = FileHandle::open(
        tmpdir.path().join("id"),
        Mode::Write,
        Creation::IfNeeded,
        Caching::All,
        HandleFlags::empty(),
    )
    .unwrap();
    write_all(&file, &[0u8; 42], 0);

    let mut stat = Stat::default();
    let filled = stat
        .fill(
            file.handle(),
            StatWants::INO | StatWants::SIZE | StatWants::MTIM,
        )
        .unwrap();
    assert_eq!(filled, 3);
    assert_eq!(stat.size, 42);

    let dup = file.clone_handle().unwrap();
    let mut dup_stat = Stat::default();
    dup_stat.fill(dup.handle(), StatWants::INO).unwrap();
    assert_eq!(stat.ino, dup_stat.ino);
    assert_eq!(dup.inode(), file.inode());

    // the identity captured at open time matches what stat reports
    assert_eq!(stat.ino, file.inode());
}
