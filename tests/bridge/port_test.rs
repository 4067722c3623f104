/*!
 * Port Handler Tests
 * stdin/stdout/stderr over the message channel
 */

use crate::common::{wait_until, Host};
use bridgefs::{Errno, FileType};
use nix::libc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_blocking_read_waits_for_input() {
    let host = Host::new();
    let fs = Arc::clone(&host.fs);
    let (tx, rx) = flume::bounded(1);
    let reader = thread::spawn(move || {
        tx.send(fs.read(0, 10)).unwrap();
    });

    // Nothing typed yet: the reader must still be parked
    thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());

    host.type_input(b"ab");
    let data = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(data.as_ref(), b"ab");
    reader.join().unwrap();
}

#[test]
fn test_empty_push_wakes_reader_without_data() {
    let host = Host::new();
    let fs = Arc::clone(&host.fs);
    let reader = thread::spawn(move || fs.read(0, 4));

    thread::sleep(Duration::from_millis(20));
    host.type_input(b"");
    thread::sleep(Duration::from_millis(20));
    assert!(!reader.is_finished());

    host.type_input(b"z");
    assert_eq!(reader.join().unwrap().unwrap().as_ref(), b"z");
}

#[test]
fn test_read_returns_at_most_len() {
    let host = Host::new();
    host.type_input(b"hello");
    assert_eq!(host.fs.read(0, 2).unwrap().as_ref(), b"he");
    assert_eq!(host.fs.read(0, 10).unwrap().as_ref(), b"llo");
    assert_eq!(host.fs.read(0, 0).unwrap().len(), 0);
}

#[test]
fn test_read_into_buffer() {
    let host = Host::new();
    host.type_input(b"xyz");
    let mut buf = [0u8; 8];
    assert_eq!(host.fs.read_into(0, &mut buf), Ok(3));
    assert_eq!(&buf[..3], b"xyz");
}

#[test]
fn test_nonblocking_read() {
    let host = Host::new();
    let fs = &host.fs;
    assert_eq!(fs.fcntl(0, libc::F_SETFL, libc::O_NONBLOCK as i64), Ok(0));
    assert_eq!(fs.read(0, 4), Err(Errno::EAGAIN));

    let flags = fs.fcntl(0, libc::F_GETFL, 0).unwrap();
    assert_ne!(flags & libc::O_NONBLOCK, 0);

    host.type_input(b"q");
    assert_eq!(fs.read(0, 4).unwrap().as_ref(), b"q");

    // Back to blocking
    assert_eq!(fs.fcntl(0, libc::F_SETFL, 0), Ok(0));
    assert_eq!(fs.fcntl(0, libc::F_GETFL, 0).unwrap() & libc::O_NONBLOCK, 0);
}

#[test]
fn test_open_with_nonblock_flag() {
    let host = Host::new();
    let fd = host
        .fs
        .open("/dev/stdin", libc::O_RDONLY | libc::O_NONBLOCK, 0)
        .unwrap();
    assert_eq!(host.fs.read(fd, 1), Err(Errno::EAGAIN));
}

#[test]
fn test_output_streams() {
    let host = Host::new();
    assert_eq!(host.fs.write(1, b"out"), Ok(3));
    assert_eq!(host.fs.write(2, b"err"), Ok(3));
    assert_eq!(host.fs.write(1, b"!"), Ok(1));
    host.expect_stdout(b"out!");
    host.expect_stderr(b"err");
}

#[test]
fn test_direction_is_enforced() {
    let host = Host::new();
    assert_eq!(host.fs.write(0, b"x"), Err(Errno::EBADF));
    assert_eq!(host.fs.read(1, 1), Err(Errno::EBADF));
    assert_eq!(host.fs.read(2, 1), Err(Errno::EBADF));
}

#[test]
fn test_port_attributes() {
    let host = Host::new();
    let stat = host.fs.stat("/dev/stdout").unwrap();
    assert_eq!(stat.file_type(), FileType::CharDevice);
    assert_eq!(stat.mode, libc::S_IFCHR as u32 | 0o600);
    assert_eq!(host.fs.fstat(0).unwrap(), stat);
    assert_eq!(host.fs.stat("/dev/stdnothing"), Err(Errno::ENOENT));
}

#[test]
fn test_unknown_port_device() {
    let host = Host::new();
    assert_eq!(host.fs.open("/dev/stdaux", libc::O_RDWR, 0), Err(Errno::ENOENT));
    // The failed open consumed no descriptor
    assert_eq!(host.fs.open("/dev/stdout", libc::O_WRONLY, 0), Ok(3));
}

#[test]
fn test_unsupported_port_operations() {
    let host = Host::new();
    assert_eq!(host.fs.seek(0, 0, libc::SEEK_SET), Err(Errno::ENOTSUP));
    assert_eq!(host.fs.mkdir("/dev/stdx", 0o755), Err(Errno::ENOTSUP));
    assert_eq!(host.fs.opendir("/dev/stdin"), Err(Errno::ENOTSUP));
    assert_eq!(host.fs.fcntl(1, libc::F_GETFD, 0), Err(Errno::ENOSYS));
}

#[test]
fn test_isatty() {
    let host = Host::new();
    assert_eq!(host.fs.isatty(0), Ok(true));
    assert_eq!(host.fs.isatty(1), Ok(true));

    let fd = host
        .fs
        .open("/plain", libc::O_CREAT | libc::O_WRONLY, 0o644)
        .unwrap();
    assert_eq!(host.fs.isatty(fd), Ok(false));
    assert_eq!(host.fs.isatty(99), Err(Errno::EBADF));
}

#[test]
fn test_closed_port_descriptor() {
    let host = Host::new();
    host.fs.close(2).unwrap();
    assert_eq!(host.fs.write(2, b"x"), Err(Errno::EBADF));
    assert_eq!(host.fs.close(2), Err(Errno::EBADF));
    assert!(wait_until(|| host.stderr().is_empty()));
}
