/*!
 * Concurrency Tests
 * Many worker threads against one executor
 */

use crate::common::{instrumented, wait_until, Host};
use bridgefs::backend::{codes, ObjectId, StoreBackend};
use bridgefs::bridge::{Completion, LegOutput, Serialization};
use bridgefs::vfs::OpenFlags;
use bridgefs::{Errno, FsConfig, MemoryStore};
use bytes::Bytes;
use nix::libc;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 8;
const CHUNKS: usize = 50;

fn hammer(host: &Host) {
    let barrier = Arc::new(Barrier::new(WORKERS));
    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let fs = Arc::clone(&host.fs);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let path = format!("/worker-{}", worker);
                let fd = fs.open(&path, libc::O_CREAT | libc::O_RDWR, 0o644).unwrap();
                barrier.wait();
                let chunk = format!("[{}]", worker);
                for _ in 0..CHUNKS {
                    assert_eq!(fs.write(fd, chunk.as_bytes()), Ok(chunk.len()));
                }
                fs.seek(fd, 0, libc::SEEK_SET).unwrap();
                let data = fs.read(fd, 4096).unwrap();
                fs.close(fd).unwrap();
                (chunk, data)
            })
        })
        .collect();

    for worker in workers {
        let (chunk, data) = worker.join().unwrap();
        assert_eq!(data, chunk.repeat(CHUNKS).into_bytes());
    }
}

#[test]
fn test_independent_descriptors_in_parallel() {
    let host = Host::new();
    hammer(&host);
    assert_eq!(host.store.open_objects(), 0);
    assert_eq!(host.fs.stats().in_flight, 0);
}

#[test]
fn test_global_serialization() {
    let host = Host::with_config(FsConfig::default().with_serialization(Serialization::Global));
    hammer(&host);
    assert_eq!(host.fs.stats().calls_started, host.fs.stats().calls_finished);
}

#[test]
fn test_shared_descriptor_writes_are_not_lost() {
    let host = Host::new();
    let fd = host
        .fs
        .open("/shared", libc::O_CREAT | libc::O_WRONLY | libc::O_APPEND, 0o644)
        .unwrap();

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let fs = Arc::clone(&host.fs);
            thread::spawn(move || {
                for _ in 0..25 {
                    fs.write(fd, b"xy").unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(host.fs.fstat(fd).unwrap().size, 200);
}

/// Serves reads and writes of one object from its own buffer and completes
/// each leg late from a helper thread, flagging any leg issued while another
/// is still outstanding
struct ExclusiveLegs {
    inner: Arc<MemoryStore>,
    data: Mutex<Vec<u8>>,
    busy: AtomicBool,
    overlaps: AtomicUsize,
    legs: AtomicUsize,
    late: flume::Sender<(Completion, i32, LegOutput)>,
}

impl ExclusiveLegs {
    fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        let (late, pending) = flume::unbounded::<(Completion, i32, LegOutput)>();
        let legs = Arc::new(Self {
            inner,
            data: Mutex::new(Vec::new()),
            busy: AtomicBool::new(false),
            overlaps: AtomicUsize::new(0),
            legs: AtomicUsize::new(0),
            late,
        });
        let weak = Arc::downgrade(&legs);
        thread::spawn(move || {
            for (done, code, output) in pending.iter() {
                thread::sleep(Duration::from_micros(200));
                if let Some(legs) = weak.upgrade() {
                    legs.busy.store(false, Ordering::SeqCst);
                }
                done.complete(code, output);
            }
        });
        legs
    }

    fn enter(&self) {
        self.legs.fetch_add(1, Ordering::SeqCst);
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn finish_later(&self, done: Completion, code: i32, output: LegOutput) -> Result<(), i32> {
        self.late
            .send((done, code, output))
            .map_err(|_| codes::ERROR_FAILED)
    }
}

impl StoreBackend for ExclusiveLegs {
    fn open_store(&self, quota: u64, done: Completion) -> Result<(), i32> {
        self.inner.open_store(quota, done)
    }

    fn open_object(&self, path: &str, flags: OpenFlags, done: Completion) -> Result<(), i32> {
        self.inner.open_object(path, flags, done)
    }

    fn query(&self, object: ObjectId, done: Completion) -> Result<(), i32> {
        self.inner.query(object, done)
    }

    fn read(&self, _object: ObjectId, offset: u64, len: usize, done: Completion) -> Result<(), i32> {
        self.enter();
        let data = self.data.lock();
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        let bytes = Bytes::copy_from_slice(&data[start..end]);
        drop(data);
        self.finish_later(done, bytes.len() as i32, LegOutput::Bytes(bytes))
    }

    fn write(&self, _object: ObjectId, offset: u64, payload: Bytes, done: Completion) -> Result<(), i32> {
        self.enter();
        let mut data = self.data.lock();
        let start = offset as usize;
        if data.len() < start + payload.len() {
            data.resize(start + payload.len(), 0);
        }
        data[start..start + payload.len()].copy_from_slice(&payload);
        drop(data);
        self.finish_later(done, payload.len() as i32, LegOutput::None)
    }

    fn make_directory(&self, path: &str, done: Completion) -> Result<(), i32> {
        self.inner.make_directory(path, done)
    }

    fn list_directory(&self, path: &str, done: Completion) -> Result<(), i32> {
        self.inner.list_directory(path, done)
    }

    fn close(&self, object: ObjectId) {
        self.inner.close(object)
    }
}

#[test]
fn test_one_leg_in_flight_per_descriptor() {
    let store = Arc::new(MemoryStore::new());
    let backend = ExclusiveLegs::new(Arc::clone(&store));
    let host = Host::with_backend(
        FsConfig::default(),
        store,
        Arc::clone(&backend) as Arc<dyn StoreBackend>,
    );
    let fd = host
        .fs
        .open("/single", libc::O_CREAT | libc::O_RDWR, 0o644)
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let writer = {
        let fs = Arc::clone(&host.fs);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..CHUNKS {
                assert_eq!(fs.write(fd, b"ab"), Ok(2));
            }
        })
    };
    let reader = {
        let fs = Arc::clone(&host.fs);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..CHUNKS {
                assert!(fs.read(fd, 2).unwrap().len() <= 2);
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();

    assert_eq!(backend.legs.load(Ordering::SeqCst), 2 * CHUNKS);
    assert_eq!(backend.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(host.fs.stats().in_flight, 0);
}

#[test]
fn test_store_opens_once_for_concurrent_first_callers() {
    let (host, backend) = instrumented(FsConfig::default());
    backend.hold_open_store.store(true, Ordering::SeqCst);

    let callers: Vec<_> = (0..3)
        .map(|n| {
            let fs = Arc::clone(&host.fs);
            thread::spawn(move || fs.open(&format!("/first-{}", n), libc::O_CREAT | libc::O_RDWR, 0o644))
        })
        .collect();

    // One caller opens the store, the others park on the session
    assert!(wait_until(|| host.fs.stats().in_flight == 3));
    assert!(backend.is_holding());
    assert_eq!(backend.counts.open_store.load(Ordering::SeqCst), 1);

    let release = Arc::clone(&backend);
    host.fs.executor().run(move || release.release_store()).unwrap();

    let mut fds: Vec<_> = callers
        .into_iter()
        .map(|caller| caller.join().unwrap().unwrap())
        .collect();
    fds.sort_unstable();
    assert_eq!(fds, vec![3, 4, 5]);
    assert_eq!(backend.counts.open_store.load(Ordering::SeqCst), 1);
}

#[test]
fn test_parked_callers_share_a_failed_store_open() {
    let (host, backend) = instrumented(FsConfig::default());
    backend.hold_open_store.store(true, Ordering::SeqCst);

    let first = {
        let fs = Arc::clone(&host.fs);
        thread::spawn(move || fs.stat("/"))
    };
    assert!(wait_until(|| backend.is_holding()));
    let second = {
        let fs = Arc::clone(&host.fs);
        thread::spawn(move || fs.mkdir("/later", 0o755))
    };
    assert!(wait_until(|| host.fs.stats().in_flight == 2));

    // Fail the held open by dropping its completion token
    let release = Arc::clone(&backend);
    host.fs
        .executor()
        .run(move || release.abandon_store())
        .unwrap();

    assert_eq!(first.join().unwrap(), Err(Errno::ENOSYS));
    assert_eq!(second.join().unwrap(), Err(Errno::ENOSYS));
    assert!(!host.fs.context().session().is_ready());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_descriptors_increase(ops in prop::collection::vec(any::<bool>(), 1..24)) {
        let host = Host::new();
        let mut open = Vec::new();
        let mut highest = 2;
        for (n, is_open) in ops.into_iter().enumerate() {
            if is_open || open.is_empty() {
                let fd = host
                    .fs
                    .open(&format!("/p{}", n), libc::O_CREAT | libc::O_RDWR, 0o644)
                    .unwrap();
                prop_assert!(fd > highest);
                highest = fd;
                open.push(fd);
            } else {
                let fd = open.remove(0);
                prop_assert_eq!(host.fs.close(fd), Ok(()));
                prop_assert_eq!(host.fs.close(fd), Err(Errno::EBADF));
            }
        }
        prop_assert_eq!(host.fs.open_descriptors(), open.len() + 3);
    }
}
