/*!
 * Store Handler Tests
 * Files in the asynchronous object store
 */

use crate::common::{instrumented, Host};
use bridgefs::backend::{ObjectId, StoreBackend};
use bridgefs::bridge::Completion;
use bridgefs::vfs::OpenFlags;
use bridgefs::{Errno, FileType, FsConfig, MemoryStore};
use bytes::Bytes;
use nix::libc;
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const RW_CREATE: i32 = libc::O_CREAT | libc::O_RDWR;

#[test]
fn test_first_user_descriptor_is_three() {
    let host = Host::new();
    assert_eq!(host.fs.open("/a", RW_CREATE, 0o644), Ok(3));
    assert_eq!(host.fs.open("/b", RW_CREATE, 0o644), Ok(4));
}

#[test]
fn test_write_seek_read_round_trip() {
    let host = Host::new();
    let fs = &host.fs;
    let fd = fs.open("/notes.txt", RW_CREATE, 0o644).unwrap();

    assert_eq!(fs.write(fd, b"hello"), Ok(5));
    assert_eq!(fs.seek(fd, 0, libc::SEEK_SET), Ok(0));
    assert_eq!(fs.read(fd, 64).unwrap().as_ref(), b"hello");
    // End of file
    assert_eq!(fs.read(fd, 64).unwrap().len(), 0);
    fs.close(fd).unwrap();

    assert_eq!(host.store.contents("/notes.txt").unwrap().as_ref(), b"hello");
    assert_eq!(host.store.open_objects(), 0);
}

#[test]
fn test_stat_attributes() {
    let host = Host::new();
    let fd = host.fs.open("/five", RW_CREATE, 0o644).unwrap();
    host.fs.write(fd, b"12345").unwrap();

    let stat = host.fs.stat("/five").unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.blksize, 512);
    assert_eq!(stat.blocks, 1);
    assert_eq!(stat.mode, libc::S_IFREG as u32 | 0o777);
    assert_eq!(stat.file_type(), FileType::File);

    let fstat = host.fs.fstat(fd).unwrap();
    assert_eq!(fstat.size, 5);
    assert_eq!(fstat.mode, stat.mode);
}

#[test]
fn test_stat_missing_path() {
    let host = Host::new();
    assert_eq!(host.fs.stat("/nope"), Err(Errno::ENOENT));
    assert_eq!(host.fs.access("/nope", libc::F_OK), Err(Errno::ENOENT));
}

#[test]
fn test_store_files_are_fully_accessible() {
    let host = Host::new();
    let fd = host.fs.open("/x", RW_CREATE, 0o600).unwrap();
    host.fs.close(fd).unwrap();
    assert_eq!(
        host.fs.access("/x", libc::R_OK | libc::W_OK | libc::X_OK),
        Ok(())
    );
}

#[test]
fn test_append() {
    let host = Host::new();
    let fd = host.fs.open("/log", RW_CREATE, 0o644).unwrap();
    host.fs.write(fd, b"ab").unwrap();
    host.fs.close(fd).unwrap();

    let fd = host
        .fs
        .open("/log", libc::O_WRONLY | libc::O_APPEND, 0)
        .unwrap();
    assert_eq!(host.fs.write(fd, b"cd"), Ok(2));
    // Seeking does not defeat append mode
    host.fs.seek(fd, 0, libc::SEEK_SET).unwrap();
    assert_eq!(host.fs.write(fd, b"ef"), Ok(2));
    host.fs.close(fd).unwrap();

    assert_eq!(host.store.contents("/log").unwrap().as_ref(), b"abcdef");
}

#[test]
fn test_append_through_two_descriptors() {
    let host = Host::new();
    let append = libc::O_CREAT | libc::O_WRONLY | libc::O_APPEND;
    let a = host.fs.open("/shared.log", append, 0o644).unwrap();
    let b = host.fs.open("/shared.log", append, 0o644).unwrap();

    host.fs.write(a, b"ab").unwrap();
    host.fs.write(b, b"cd").unwrap();
    host.fs.write(a, b"ef").unwrap();
    assert_eq!(host.store.contents("/shared.log").unwrap().as_ref(), b"abcdef");
}

#[test]
fn test_append_sees_writes_from_a_plain_descriptor() {
    let host = Host::new();
    let plain = host.fs.open("/mixed", RW_CREATE, 0o644).unwrap();
    let append = host
        .fs
        .open("/mixed", libc::O_WRONLY | libc::O_APPEND, 0)
        .unwrap();

    host.fs.write(plain, b"hello").unwrap();
    assert_eq!(host.fs.write(append, b"!"), Ok(1));
    assert_eq!(host.store.contents("/mixed").unwrap().as_ref(), b"hello!");
    assert_eq!(host.fs.fstat(append).unwrap().size, 6);
}

#[test]
fn test_truncate_and_exclusive_create() {
    let host = Host::new();
    let fd = host.fs.open("/t", RW_CREATE, 0o644).unwrap();
    host.fs.write(fd, b"old data").unwrap();
    host.fs.close(fd).unwrap();

    assert_eq!(
        host.fs.open("/t", libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY, 0o644),
        Err(Errno::EEXIST)
    );

    let fd = host
        .fs
        .open("/t", libc::O_WRONLY | libc::O_TRUNC, 0)
        .unwrap();
    assert_eq!(host.fs.fstat(fd).unwrap().size, 0);
    host.fs.close(fd).unwrap();
    assert_eq!(host.store.contents("/t").unwrap().len(), 0);
}

#[test]
fn test_open_missing_paths() {
    let host = Host::new();
    assert_eq!(host.fs.open("/missing", libc::O_RDONLY, 0), Err(Errno::ENOENT));
    assert_eq!(
        host.fs.open("/no/parent", RW_CREATE, 0o644),
        Err(Errno::ENOENT)
    );
}

#[test]
fn test_quota_exhaustion() {
    let host = Host::with_config(FsConfig::default().with_store_quota(4));
    let fd = host.fs.open("/big", RW_CREATE, 0o644).unwrap();
    assert_eq!(host.fs.write(fd, b"1234"), Ok(4));
    assert_eq!(host.fs.write(fd, b"5"), Err(Errno::ENOSPC));
    // Overwriting in place needs no new space
    host.fs.seek(fd, 0, libc::SEEK_SET).unwrap();
    assert_eq!(host.fs.write(fd, b"abcd"), Ok(4));
    assert_eq!(host.store.usage(), 4);
}

#[test]
fn test_seek_sequence() {
    let host = Host::new();
    let fd = host.fs.open("/ten", RW_CREATE, 0o644).unwrap();
    host.fs.write(fd, b"0123456789").unwrap();

    assert_eq!(host.fs.seek(fd, 4, libc::SEEK_SET), Ok(4));
    assert_eq!(host.fs.seek(fd, 2, libc::SEEK_CUR), Ok(6));
    assert_eq!(host.fs.seek(fd, -3, libc::SEEK_END), Ok(7));
    assert_eq!(host.fs.seek(fd, -8, libc::SEEK_CUR), Err(Errno::EINVAL));
    // A rejected seek leaves the offset alone
    assert_eq!(host.fs.seek(fd, 0, libc::SEEK_CUR), Ok(7));
    assert_eq!(host.fs.read(fd, 10).unwrap().as_ref(), b"789");

    // Seeking past the end is allowed
    assert_eq!(host.fs.seek(fd, 20, libc::SEEK_SET), Ok(20));
    assert_eq!(host.fs.read(fd, 4).unwrap().len(), 0);
}

#[test]
fn test_seek_end_sees_other_descriptors() {
    let host = Host::new();
    let reader = host.fs.open("/grown", RW_CREATE, 0o644).unwrap();
    let writer = host.fs.open("/grown", libc::O_WRONLY, 0).unwrap();
    host.fs.write(writer, b"0123456789").unwrap();

    assert_eq!(host.fs.seek(reader, 0, libc::SEEK_END), Ok(10));
    assert_eq!(host.fs.fstat(reader).unwrap().size, 10);
    assert_eq!(host.fs.seek(reader, -4, libc::SEEK_END), Ok(6));
    assert_eq!(host.fs.read(reader, 10).unwrap().as_ref(), b"6789");
    assert_eq!(host.fs.seek(reader, -11, libc::SEEK_END), Err(Errno::EINVAL));
}

#[test]
fn test_store_fcntl() {
    let host = Host::new();
    let fd = host.fs.open("/f", RW_CREATE, 0o644).unwrap();
    assert_eq!(host.fs.fcntl(fd, libc::F_GETFD, 0), Ok(0));
    assert_eq!(
        host.fs.fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC as i64),
        Ok(0)
    );
    assert_eq!(
        host.fs.fcntl(fd, libc::F_GETFL, 0).unwrap() & libc::O_ACCMODE,
        libc::O_RDWR
    );
    assert_eq!(host.fs.fcntl(fd, libc::F_SETFL, 0), Err(Errno::ENOSYS));
}

#[test]
fn test_access_mode_is_enforced() {
    let host = Host::new();
    let fd = host.fs.open("/ro", RW_CREATE, 0o644).unwrap();
    host.fs.write(fd, b"data").unwrap();
    host.fs.close(fd).unwrap();

    let ro = host.fs.open("/ro", libc::O_RDONLY, 0).unwrap();
    assert_eq!(host.fs.write(ro, b"x"), Err(Errno::EBADF));

    let wo = host.fs.open("/ro", libc::O_WRONLY, 0).unwrap();
    assert_eq!(host.fs.read(wo, 1), Err(Errno::EBADF));
}

#[test]
fn test_descriptors_are_never_reused() {
    let host = Host::new();
    let fd = host.fs.open("/once", RW_CREATE, 0o644).unwrap();
    host.fs.close(fd).unwrap();
    assert_eq!(host.fs.close(fd), Err(Errno::EBADF));
    assert_eq!(host.fs.read(fd, 1), Err(Errno::EBADF));

    let next = host.fs.open("/once", libc::O_RDONLY, 0).unwrap();
    assert_eq!(next, fd + 1);
}

#[test]
fn test_leg_counts() {
    let (host, backend) = instrumented(FsConfig::default());
    let before = host.fs.stats().completions;

    // Cold: open_store, open_object, query
    let fd = host.fs.open("/legs", RW_CREATE, 0o644).unwrap();
    let cold = host.fs.stats().completions;
    assert_eq!(cold - before, 3);
    assert_eq!(backend.counts.open_store.load(Ordering::SeqCst), 1);

    // Warm: open_object, query
    let again = host.fs.open("/legs", libc::O_RDONLY, 0).unwrap();
    let warm = host.fs.stats().completions;
    assert_eq!(warm - cold, 2);

    // Warm stat: open_object, query
    host.fs.stat("/legs").unwrap();
    assert_eq!(host.fs.stats().completions - warm, 2);

    // One leg each
    let before_io = host.fs.stats().completions;
    host.fs.write(fd, b"abc").unwrap();
    host.fs.read(again, 3).unwrap();
    assert_eq!(host.fs.stats().completions - before_io, 2);

    // Append writes refresh the size first
    let log = host
        .fs
        .open("/legs", libc::O_WRONLY | libc::O_APPEND, 0)
        .unwrap();
    let before_append = host.fs.stats().completions;
    host.fs.write(log, b"d").unwrap();
    assert_eq!(host.fs.stats().completions - before_append, 2);

    // SEEK_END queries, other origins are local
    let before_end = host.fs.stats().completions;
    assert_eq!(host.fs.seek(fd, 0, libc::SEEK_END), Ok(4));
    assert_eq!(host.fs.stats().completions - before_end, 1);

    // Seek, fcntl and empty writes never reach the backend
    let total = backend.counts.total();
    host.fs.seek(fd, 0, libc::SEEK_SET).unwrap();
    host.fs.fcntl(fd, libc::F_GETFL, 0).unwrap();
    host.fs.write(fd, b"").unwrap();
    assert_eq!(backend.counts.total(), total);

    assert_eq!(backend.counts.open_store.load(Ordering::SeqCst), 1);
    assert_eq!(host.fs.stats().stale_completions, 0);
}

#[test]
fn test_failed_store_open_is_retried() {
    let (host, backend) = instrumented(FsConfig::default());
    backend.fail_open_store.store(1, Ordering::SeqCst);

    assert_eq!(host.fs.open("/r", RW_CREATE, 0o644), Err(Errno::EACCES));
    assert!(!host.fs.context().session().is_ready());

    assert_eq!(host.fs.open("/r", RW_CREATE, 0o644), Ok(3));
    assert!(host.fs.context().session().is_ready());
    assert_eq!(backend.counts.open_store.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_open_releases_nothing() {
    let (host, backend) = instrumented(FsConfig::default());
    assert_eq!(host.fs.open("/absent", libc::O_RDONLY, 0), Err(Errno::ENOENT));
    assert_eq!(backend.counts.query.load(Ordering::SeqCst), 0);
    assert_eq!(host.store.open_objects(), 0);
}

/// Hands back more bytes than each read asked for
struct OversizedReads(Arc<MemoryStore>);

impl StoreBackend for OversizedReads {
    fn open_store(&self, quota: u64, done: Completion) -> Result<(), i32> {
        self.0.open_store(quota, done)
    }

    fn open_object(&self, path: &str, flags: OpenFlags, done: Completion) -> Result<(), i32> {
        self.0.open_object(path, flags, done)
    }

    fn query(&self, object: ObjectId, done: Completion) -> Result<(), i32> {
        self.0.query(object, done)
    }

    fn read(&self, object: ObjectId, offset: u64, len: usize, done: Completion) -> Result<(), i32> {
        self.0.read(object, offset, len + 8, done)
    }

    fn write(&self, object: ObjectId, offset: u64, data: Bytes, done: Completion) -> Result<(), i32> {
        self.0.write(object, offset, data, done)
    }

    fn make_directory(&self, path: &str, done: Completion) -> Result<(), i32> {
        self.0.make_directory(path, done)
    }

    fn list_directory(&self, path: &str, done: Completion) -> Result<(), i32> {
        self.0.list_directory(path, done)
    }

    fn close(&self, object: ObjectId) {
        self.0.close(object)
    }
}

#[test]
fn test_oversized_read_completion_is_clamped() {
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(OversizedReads(Arc::clone(&store)));
    let host = Host::with_backend(FsConfig::default(), store, backend);

    let fd = host.fs.open("/long", RW_CREATE, 0o644).unwrap();
    host.fs.write(fd, b"0123456789abcdef").unwrap();
    host.fs.seek(fd, 0, libc::SEEK_SET).unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(host.fs.read_into(fd, &mut buf), Ok(4));
    assert_eq!(&buf, b"0123");
    // The offset moved by what was returned, not by what the backend sent
    assert_eq!(host.fs.seek(fd, 0, libc::SEEK_CUR), Ok(4));
}
