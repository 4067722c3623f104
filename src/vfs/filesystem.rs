/*!
 * Filesystem Front Door
 *
 * POSIX-shaped blocking calls callable from any thread. Each call resolves
 * its path or descriptor to a handler, runs one operation through the call
 * bridge and reports failure as an [`Errno`].
 *
 * Routing errors (bad descriptor, empty path) are answered here and never
 * reach a handler or the backend.
 */

use super::config::FsConfig;
use super::context::FsContext;
use super::descriptors::DescriptorTable;
use super::paths;
use super::types::{DirEntry, FcntlCommand, FileStat, OpenFlags, Whence};
use crate::backend::StoreBackend;
use crate::bridge::{Executor, ExecutorStats, Operands, Reply};
use crate::channel::{parse_port_message, MessageChannel};
use crate::core::limits::{STDERR_PATH, STDIN_PATH, STDOUT_PATH};
use crate::core::{BridgeResult, Errno, Fd, FsResult};
use crate::handlers::{HandlerCell, PortInbox};
use crate::monitoring::CallSpan;
use bytes::Bytes;
use nix::libc;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Open directory stream returned by [`FileSystem::opendir`]
#[derive(Debug, PartialEq, Eq)]
pub struct DirHandle {
    fd: Fd,
}

impl DirHandle {
    /// Descriptor backing this stream
    #[inline]
    pub fn fd(&self) -> Fd {
        self.fd
    }
}

pub struct FileSystem {
    ctx: FsContext,
    descriptors: DescriptorTable,
    cwd: RwLock<String>,
}

impl FileSystem {
    /// Create a filesystem over `backend`, talking to the host through `channel`
    pub fn new(
        config: FsConfig,
        backend: Arc<dyn StoreBackend>,
        channel: Arc<dyn MessageChannel>,
    ) -> BridgeResult<Self> {
        let ctx = FsContext::new(config, backend, channel)?;
        Ok(Self::with_context(ctx))
    }

    pub fn with_context(ctx: FsContext) -> Self {
        let fs = Self {
            ctx,
            descriptors: DescriptorTable::new(),
            cwd: RwLock::new("/".to_string()),
        };
        if fs.ctx.config().preopen_stdio {
            fs.preopen_stdio();
        }
        fs
    }

    fn preopen_stdio(&self) {
        let stdio = [
            (STDIN_PATH, libc::O_RDONLY),
            (STDOUT_PATH, libc::O_WRONLY),
            (STDERR_PATH, libc::O_WRONLY),
        ];
        for (path, flags) in stdio {
            match self.open(path, flags, 0) {
                Ok(fd) => debug!(path = path, fd = fd, "Pre-opened stdio port"),
                Err(errno) => error!(path = path, errno = %errno, "Failed to pre-open stdio port"),
            }
        }
    }

    #[inline]
    pub fn context(&self) -> &FsContext {
        &self.ctx
    }

    #[inline]
    pub fn executor(&self) -> &Executor {
        self.ctx.executor()
    }

    #[inline]
    pub fn inbox(&self) -> &PortInbox {
        self.ctx.inbox()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.ctx.executor().stats()
    }

    /// Descriptors currently bound
    pub fn open_descriptors(&self) -> usize {
        self.descriptors.open_count()
    }

    /// Stop the executor; every later call fails with EIO
    pub fn shutdown(&self) {
        self.ctx.executor().shutdown();
        // Readers parked on the inbox retry and fail with EIO
        self.ctx.inbox().wake_all();
    }

    fn traced<T, A, F>(&self, operation: &'static str, args: A, f: F) -> FsResult<T>
    where
        T: fmt::Debug,
        A: fmt::Debug,
        F: FnOnce() -> FsResult<T>,
    {
        if !self.ctx.config().trace {
            return f();
        }
        let span = CallSpan::enter(operation, &args);
        let result = f();
        span.leave(&result);
        result
    }

    fn resolve(&self, path: &str) -> FsResult<String> {
        if path.is_empty() {
            return Err(Errno::ENOENT);
        }
        Ok(paths::resolve(&self.cwd.read(), path))
    }

    fn lookup(&self, fd: Fd) -> FsResult<Arc<HandlerCell>> {
        self.descriptors.lookup(fd).ok_or(Errno::EBADF)
    }

    fn call(&self, handler: &Arc<HandlerCell>, operands: Operands) -> FsResult<Reply> {
        self.ctx.bridge().call(handler, operands)
    }

    /// Close a handler that never got a descriptor
    fn dispose(&self, handler: &Arc<HandlerCell>) {
        if let Err(errno) = self.call(handler, Operands::Close) {
            debug!(handler = %handler.id, errno = %errno, "Closing transient handler failed");
        }
    }

    fn unexpected<T>(&self, operation: &str, reply: Reply) -> FsResult<T> {
        error!(operation = operation, reply = ?reply, "Handler answered with the wrong reply shape");
        Err(Errno::EIO)
    }

    pub fn open(&self, path: &str, flags: i32, mode: u32) -> FsResult<Fd> {
        self.traced("open", (path, flags, mode), || {
            let path = self.resolve(path)?;
            let translated = OpenFlags::from_posix(flags);
            if translated.ignored != 0 {
                warn!(path = %path, ignored = translated.ignored, "Ignoring unsupported open flags");
            }
            let handler = self.ctx.handler_for(&path);
            self.call(
                &handler,
                Operands::Open {
                    path,
                    flags: translated.flags,
                    mode,
                },
            )?;
            Ok(self.descriptors.bind(handler))
        })
    }

    pub fn close(&self, fd: Fd) -> FsResult<()> {
        self.traced("close", fd, || {
            let handler = self.lookup(fd)?;
            self.call(&handler, Operands::Close)?;
            self.descriptors.release(fd);
            Ok(())
        })
    }

    /// Read up to `len` bytes
    ///
    /// A blocking port with nothing buffered parks the calling thread until
    /// the host pushes more input.
    ///
    /// # Panics
    /// If a blocking read has to wait on the executor thread.
    pub fn read(&self, fd: Fd, len: usize) -> FsResult<Bytes> {
        self.traced("read", (fd, len), || {
            let handler = self.lookup(fd)?;
            loop {
                let generation = self.ctx.inbox().generation();
                match self.call(&handler, Operands::Read { len })? {
                    Reply::Bytes(data) => return Ok(data),
                    Reply::WouldBlock => {
                        if self.ctx.executor().is_executor_thread() {
                            panic!(
                                "blocking read on descriptor {} would stall the executor thread",
                                fd
                            );
                        }
                        trace!(fd = fd, generation = generation, "Waiting for port input");
                        self.ctx.inbox().wait_newer_than(generation);
                    }
                    other => return self.unexpected("read", other),
                }
            }
        })
    }

    /// `read(2)` into a caller buffer
    pub fn read_into(&self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        let data = self.read(fd, buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    pub fn write(&self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        self.traced("write", (fd, data.len()), || {
            let handler = self.lookup(fd)?;
            let data = Bytes::copy_from_slice(data);
            match self.call(&handler, Operands::Write { data })? {
                Reply::Count(n) => Ok(n),
                other => self.unexpected("write", other),
            }
        })
    }

    pub fn seek(&self, fd: Fd, offset: i64, whence: i32) -> FsResult<i64> {
        self.traced("seek", (fd, offset, whence), || {
            let handler = self.lookup(fd)?;
            let whence = Whence::from_raw(whence).ok_or(Errno::EINVAL)?;
            match self.call(&handler, Operands::Seek { offset, whence })? {
                Reply::Offset(position) => Ok(position),
                other => self.unexpected("seek", other),
            }
        })
    }

    pub fn stat(&self, path: &str) -> FsResult<FileStat> {
        self.traced("stat", path, || {
            let path = self.resolve(path)?;
            let handler = self.ctx.handler_for(&path);
            let result = self.call(&handler, Operands::Stat { path });
            self.dispose(&handler);
            match result? {
                Reply::Attributes(stat) => Ok(stat),
                other => self.unexpected("stat", other),
            }
        })
    }

    pub fn fstat(&self, fd: Fd) -> FsResult<FileStat> {
        self.traced("fstat", fd, || {
            let handler = self.lookup(fd)?;
            match self.call(&handler, Operands::Fstat)? {
                Reply::Attributes(stat) => Ok(stat),
                other => self.unexpected("fstat", other),
            }
        })
    }

    pub fn fcntl(&self, fd: Fd, cmd: i32, arg: i64) -> FsResult<i32> {
        self.traced("fcntl", (fd, cmd, arg), || {
            let handler = self.lookup(fd)?;
            let command = FcntlCommand::from_raw(cmd, arg);
            match self.call(&handler, Operands::Fcntl { command })? {
                Reply::Value(value) => Ok(value),
                other => self.unexpected("fcntl", other),
            }
        })
    }

    pub fn isatty(&self, fd: Fd) -> FsResult<bool> {
        self.traced("isatty", fd, || {
            let handler = self.lookup(fd)?;
            match self.call(&handler, Operands::IsATty)? {
                Reply::Bool(tty) => Ok(tty),
                other => self.unexpected("isatty", other),
            }
        })
    }

    /// `access(2)`: stat plus an owner permission bit check
    pub fn access(&self, path: &str, amode: i32) -> FsResult<()> {
        self.traced("access", (path, amode), || {
            let stat = self.stat(path)?;
            if amode == libc::F_OK || stat.permits(amode) {
                Ok(())
            } else {
                Err(Errno::EACCES)
            }
        })
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.traced("mkdir", (path, mode), || {
            let path = self.resolve(path)?;
            let handler = self.ctx.handler_for(&path);
            let result = self.call(&handler, Operands::MkDir { path, mode });
            self.dispose(&handler);
            result.map(|_| ())
        })
    }

    pub fn opendir(&self, path: &str) -> FsResult<DirHandle> {
        self.traced("opendir", path, || {
            let path = self.resolve(path)?;
            let handler = self.ctx.handler_for(&path);
            self.call(&handler, Operands::OpenDir { path })?;
            Ok(DirHandle {
                fd: self.descriptors.bind(handler),
            })
        })
    }

    /// Next entry, or `None` once the listing is exhausted
    pub fn readdir(&self, dir: &DirHandle) -> FsResult<Option<DirEntry>> {
        self.traced("readdir", dir.fd, || {
            let handler = self.lookup(dir.fd)?;
            match self.call(&handler, Operands::ReadDir)? {
                Reply::Entry(entry) => Ok(entry),
                other => self.unexpected("readdir", other),
            }
        })
    }

    pub fn rewinddir(&self, dir: &DirHandle) -> FsResult<()> {
        self.traced("rewinddir", dir.fd, || {
            let handler = self.lookup(dir.fd)?;
            self.call(&handler, Operands::RewindDir).map(|_| ())
        })
    }

    pub fn closedir(&self, dir: DirHandle) -> FsResult<()> {
        self.traced("closedir", dir.fd, || {
            let handler = self.lookup(dir.fd)?;
            self.call(&handler, Operands::CloseDir)?;
            self.descriptors.release(dir.fd);
            Ok(())
        })
    }

    pub fn chdir(&self, path: &str) -> FsResult<()> {
        self.traced("chdir", path, || {
            let resolved = self.resolve(path)?;
            let stat = self.stat(&resolved)?;
            if !stat.is_dir() {
                return Err(Errno::ENOTDIR);
            }
            *self.cwd.write() = resolved;
            Ok(())
        })
    }

    pub fn getcwd(&self) -> String {
        self.cwd.read().clone()
    }

    /// Deliver one inbound host message
    ///
    /// Port data (`S<d><bytes>`) lands in the inbox and wakes blocked
    /// readers; anything else is offered to the pending remote queries.
    /// Returns false when nobody recognized the message.
    pub fn handle_message(&self, message: &[u8]) -> bool {
        if let Some((stream, payload)) = parse_port_message(message) {
            trace!(stream = stream, len = payload.len(), "Inbound port data");
            self.ctx.inbox().push(payload);
            return true;
        }
        let handled = self.ctx.remote().handle(message);
        if !handled {
            debug!(len = message.len(), "Dropping unrecognized inbound message");
        }
        handled
    }
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("cwd", &*self.cwd.read())
            .field("descriptors", &self.descriptors)
            .field("executor", self.ctx.executor())
            .finish()
    }
}
