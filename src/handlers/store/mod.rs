/*!
 * Store Handler
 *
 * Files and directories in the asynchronous object store. Each entry point
 * is a state machine over [`Phase`]; every operation that needs the store
 * first goes through the shared [`StoreSession`], which may prepend an
 * `open_store` leg. Every terminal path returns to `Phase::Idle`.
 *
 * ```text
 * open:  [store] -> open_object -> query -> done (append: offset = size)
 * stat:  [store] -> open_object(metadata) -> query -> done
 *                    `-- ERROR_FAILED -> directory | proxied stat -> done
 * read/write: one leg, moves the offset (append: query -> write)
 * seek:  SEEK_END queries the size first, other origins are immediate
 * opendir: [store] -> proxied listing | trial open (ERROR_FAILED = directory)
 * readdir: served from the cursor, first read of a lazy cursor lists
 * ```
 */

mod cursor;
mod session;

pub use cursor::DirCursor;
pub use session::{Acquire, StoreSession};

use crate::backend::{codes, ObjectId, ObjectInfo, StoreBackend};
use crate::bridge::{CallResult, Leg, Reply, Step};
use crate::channel::{ProxyCommand, RemoteQueries};
use crate::core::{Errno, ErrnoTable, HandlerKind};
use crate::handlers::Handler;
use crate::vfs::config::{DirectoryFallback, ListingSource};
use crate::vfs::types::{FcntlCommand, FileStat, OpenFlags, Whence};
use bytes::Bytes;
use nix::libc;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// What every store handler of one filesystem shares
#[derive(Clone)]
pub struct StoreEnv {
    pub backend: Arc<dyn StoreBackend>,
    pub session: Arc<StoreSession>,
    pub remote: Arc<RemoteQueries>,
    pub errno: Arc<ErrnoTable>,
    pub quota: u64,
    pub directory_fallback: DirectoryFallback,
    pub listing: ListingSource,
}

/// Where the current call stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingStore { initiator: bool },
    AwaitingOpen,
    AwaitingQuery,
    AwaitingRemote,
    AwaitingIo,
    AwaitingMkdir,
    AwaitingListing,
}

enum Gate {
    Ready,
    Pending,
    Failed(Step),
}

pub struct StoreHandler {
    env: StoreEnv,
    phase: Phase,
    path: String,
    object: Option<ObjectId>,
    flags: OpenFlags,
    info: ObjectInfo,
    offset: i64,
    cursor: Option<DirCursor>,
}

impl StoreHandler {
    pub fn new(env: StoreEnv) -> Self {
        Self {
            env,
            phase: Phase::Idle,
            path: String::new(),
            object: None,
            flags: OpenFlags::default(),
            info: ObjectInfo::default(),
            offset: 0,
            cursor: None,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    fn finish(&mut self, result: CallResult) -> Step {
        self.phase = Phase::Idle;
        Step::Done(result)
    }

    fn fail(&mut self, errno: Errno) -> Step {
        self.finish(Err(errno))
    }

    fn fail_code(&mut self, code: i32) -> Step {
        debug!(path = %self.path, code = code, phase = ?self.phase, "Store leg failed");
        let errno = self.env.errno.translate(code);
        self.fail(errno)
    }

    fn unexpected(&mut self, operation: &str) -> Step {
        error!(
            path = %self.path,
            operation = operation,
            phase = ?self.phase,
            "Store handler stepped in a phase the operation never enters"
        );
        self.fail(Errno::EIO)
    }

    /// Start a leg through `issue`, or fail with its synchronous refusal
    fn pending_or(&mut self, next: Phase, issued: Result<(), i32>) -> Step {
        match issued {
            Ok(()) => {
                self.phase = next;
                Step::Pending
            }
            Err(code) => self.fail_code(code),
        }
    }

    fn start_store(&mut self, leg: &Leg) -> Gate {
        let acquired = self
            .env
            .session
            .acquire(self.env.backend.as_ref(), self.env.quota, leg);
        match acquired {
            Ok(Acquire::Ready) => Gate::Ready,
            Ok(Acquire::Started) => {
                self.phase = Phase::AwaitingStore { initiator: true };
                Gate::Pending
            }
            Ok(Acquire::Parked) => {
                self.phase = Phase::AwaitingStore { initiator: false };
                Gate::Pending
            }
            Err(code) => Gate::Failed(self.fail_code(code)),
        }
    }

    fn resume_store(&mut self, leg: &Leg, initiator: bool) -> Gate {
        let code = leg.code();
        if initiator {
            self.env.session.complete(code);
        }
        if code == codes::OK {
            self.phase = Phase::Idle;
            Gate::Ready
        } else {
            Gate::Failed(self.fail_code(code))
        }
    }

    /// Common prologue of operations that need the store
    fn with_store(&mut self, leg: &Leg, issue: impl FnOnce(&mut Self, &Leg) -> Step) -> Step {
        let gate = match self.phase {
            Phase::Idle => self.start_store(leg),
            Phase::AwaitingStore { initiator } => self.resume_store(leg, initiator),
            _ => return self.unexpected("store prologue"),
        };
        match gate {
            Gate::Ready => issue(self, leg),
            Gate::Pending => Step::Pending,
            Gate::Failed(step) => step,
        }
    }

    fn issue_open(&mut self, leg: &Leg, flags: OpenFlags) -> Step {
        let issued = self
            .env
            .backend
            .open_object(&self.path, flags, leg.completion());
        self.pending_or(Phase::AwaitingOpen, issued)
    }

    fn issue_query(&mut self, leg: &Leg) -> Step {
        let Some(object) = self.object else {
            return self.fail(Errno::EBADF);
        };
        let issued = self.env.backend.query(object, leg.completion());
        self.pending_or(Phase::AwaitingQuery, issued)
    }

    fn issue_write(&mut self, leg: &Leg, data: &Bytes) -> Step {
        let Some(object) = self.object else {
            return self.fail(Errno::EBADF);
        };
        let issued =
            self.env
                .backend
                .write(object, self.offset as u64, data.clone(), leg.completion());
        self.pending_or(Phase::AwaitingIo, issued)
    }

    /// Adopt the attributes a query leg returned, keeping the old ones if it carried none
    fn refresh_info(&mut self, leg: &mut Leg) {
        if let Some(info) = leg.take_info() {
            self.info = info;
        }
    }

    fn move_offset(&mut self, base: i64, offset: i64) -> Step {
        match base.checked_add(offset) {
            Some(target) if target >= 0 => {
                self.offset = target;
                self.finish(Ok(Reply::Offset(target)))
            }
            _ => self.fail(Errno::EINVAL),
        }
    }

    fn release_object(&mut self) {
        if let Some(object) = self.object.take() {
            self.env.backend.close(object);
        }
    }

    fn adopt_object(&mut self, leg: &mut Leg) -> Result<(), Step> {
        match leg.take_object() {
            Some(object) => {
                self.object = Some(object);
                Ok(())
            }
            None => Err(self.fail(Errno::EIO)),
        }
    }
}

impl Handler for StoreHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Store
    }

    fn open(&mut self, leg: &mut Leg, path: &str, flags: OpenFlags, _mode: u32) -> Step {
        match self.phase {
            Phase::Idle | Phase::AwaitingStore { .. } => {
                if self.phase == Phase::Idle {
                    self.path = path.to_string();
                    self.flags = flags;
                }
                self.with_store(leg, |this, leg| this.issue_open(leg, flags))
            }
            Phase::AwaitingOpen => {
                if !leg.succeeded() {
                    return self.fail_code(leg.code());
                }
                if let Err(step) = self.adopt_object(leg) {
                    return step;
                }
                self.issue_query(leg)
            }
            Phase::AwaitingQuery => {
                if !leg.succeeded() {
                    let code = leg.code();
                    self.release_object();
                    return self.fail_code(code);
                }
                self.info = leg.take_info().unwrap_or_default();
                self.offset = if flags.append {
                    self.info.size as i64
                } else {
                    0
                };
                trace!(path = %self.path, size = self.info.size, "Store object opened");
                self.finish(Ok(Reply::Unit))
            }
            _ => self.unexpected("open"),
        }
    }

    fn close(&mut self, _leg: &mut Leg) -> Step {
        self.release_object();
        self.cursor = None;
        self.finish(Ok(Reply::Unit))
    }

    fn read(&mut self, leg: &mut Leg, len: usize) -> Step {
        match self.phase {
            Phase::Idle => {
                let Some(object) = self.object else {
                    return self.fail(Errno::EBADF);
                };
                if !self.flags.read {
                    return self.fail(Errno::EBADF);
                }
                if len == 0 {
                    return self.finish(Ok(Reply::Bytes(Bytes::new())));
                }
                let issued =
                    self.env
                        .backend
                        .read(object, self.offset as u64, len, leg.completion());
                self.pending_or(Phase::AwaitingIo, issued)
            }
            Phase::AwaitingIo => {
                let code = leg.code();
                if code < 0 {
                    return self.fail_code(code);
                }
                let mut bytes = leg.take_bytes();
                bytes.truncate((code as usize).min(len));
                self.offset += bytes.len() as i64;
                self.finish(Ok(Reply::Bytes(bytes)))
            }
            _ => self.unexpected("read"),
        }
    }

    fn write(&mut self, leg: &mut Leg, data: &Bytes) -> Step {
        match self.phase {
            Phase::Idle => {
                if self.object.is_none() || !self.flags.is_writable() {
                    return self.fail(Errno::EBADF);
                }
                if data.is_empty() {
                    return self.finish(Ok(Reply::Count(0)));
                }
                // Other descriptors may have grown the object since open
                if self.flags.append {
                    return self.issue_query(leg);
                }
                self.issue_write(leg, data)
            }
            Phase::AwaitingQuery => {
                if !leg.succeeded() {
                    return self.fail_code(leg.code());
                }
                self.refresh_info(leg);
                self.offset = self.info.size as i64;
                self.issue_write(leg, data)
            }
            Phase::AwaitingIo => {
                let code = leg.code();
                if code < 0 {
                    return self.fail_code(code);
                }
                self.offset += i64::from(code);
                self.info.size = self.info.size.max(self.offset as u64);
                self.finish(Ok(Reply::Count(code as usize)))
            }
            _ => self.unexpected("write"),
        }
    }

    fn seek(&mut self, leg: &mut Leg, offset: i64, whence: Whence) -> Step {
        match self.phase {
            Phase::Idle => {
                if self.object.is_none() {
                    return self.fail(Errno::EBADF);
                }
                let base = match whence {
                    Whence::Set => 0,
                    Whence::Current => self.offset,
                    Whence::End => return self.issue_query(leg),
                };
                self.move_offset(base, offset)
            }
            Phase::AwaitingQuery => {
                if !leg.succeeded() {
                    return self.fail_code(leg.code());
                }
                self.refresh_info(leg);
                self.move_offset(self.info.size as i64, offset)
            }
            _ => self.unexpected("seek"),
        }
    }

    fn stat(&mut self, leg: &mut Leg, path: &str) -> Step {
        match self.phase {
            Phase::Idle | Phase::AwaitingStore { .. } => {
                if self.phase == Phase::Idle {
                    self.path = path.to_string();
                }
                self.with_store(leg, |this, leg| {
                    this.issue_open(leg, OpenFlags::metadata_only())
                })
            }
            Phase::AwaitingOpen => match leg.code() {
                codes::OK => {
                    if let Err(step) = self.adopt_object(leg) {
                        return step;
                    }
                    self.issue_query(leg)
                }
                // Directories cannot be opened as objects
                codes::ERROR_FAILED => match self.env.directory_fallback {
                    DirectoryFallback::AssumeDirectory => {
                        debug!(path = %self.path, "Open failed, reporting a directory");
                        self.finish(Ok(Reply::Attributes(FileStat::directory())))
                    }
                    DirectoryFallback::RemoteProxy => {
                        let issued = self
                            .env
                            .remote
                            .begin(ProxyCommand::Stat, &self.path, leg.completion())
                            .map(|_| ());
                        self.pending_or(Phase::AwaitingRemote, issued)
                    }
                },
                code => self.fail_code(code),
            },
            Phase::AwaitingRemote => {
                if leg.succeeded() {
                    self.finish(Ok(Reply::Attributes(FileStat::directory())))
                } else {
                    debug!(path = %self.path, status = leg.code(), "Proxied stat denied");
                    self.fail(Errno::ENOENT)
                }
            }
            Phase::AwaitingQuery => {
                if !leg.succeeded() {
                    return self.fail_code(leg.code());
                }
                self.info = leg.take_info().unwrap_or_default();
                self.finish(Ok(Reply::Attributes(FileStat::from_info(&self.info))))
            }
            _ => self.unexpected("stat"),
        }
    }

    fn fstat(&mut self, leg: &mut Leg) -> Step {
        match self.phase {
            Phase::Idle => self.issue_query(leg),
            Phase::AwaitingQuery => {
                if !leg.succeeded() {
                    return self.fail_code(leg.code());
                }
                self.info = leg.take_info().unwrap_or_default();
                self.finish(Ok(Reply::Attributes(FileStat::from_info(&self.info))))
            }
            _ => self.unexpected("fstat"),
        }
    }

    fn fcntl(&mut self, _leg: &mut Leg, command: FcntlCommand) -> Step {
        match command {
            // Close-on-exec is accepted but has no effect
            FcntlCommand::GetFd => self.finish(Ok(Reply::Value(0))),
            FcntlCommand::SetFd(arg) if arg == i64::from(libc::FD_CLOEXEC) => {
                self.finish(Ok(Reply::Value(0)))
            }
            FcntlCommand::GetFl => self.finish(Ok(Reply::Value(self.flags.to_posix()))),
            other => {
                debug!(command = ?other, "fcntl command not supported on store objects");
                self.fail(Errno::ENOSYS)
            }
        }
    }

    fn mkdir(&mut self, leg: &mut Leg, path: &str, _mode: u32) -> Step {
        match self.phase {
            Phase::Idle | Phase::AwaitingStore { .. } => {
                if self.phase == Phase::Idle {
                    self.path = path.to_string();
                }
                self.with_store(leg, |this, leg| {
                    let issued = this.env.backend.make_directory(&this.path, leg.completion());
                    this.pending_or(Phase::AwaitingMkdir, issued)
                })
            }
            Phase::AwaitingMkdir => {
                if leg.succeeded() {
                    self.finish(Ok(Reply::Unit))
                } else {
                    self.fail_code(leg.code())
                }
            }
            _ => self.unexpected("mkdir"),
        }
    }

    fn opendir(&mut self, leg: &mut Leg, path: &str) -> Step {
        match self.phase {
            Phase::Idle | Phase::AwaitingStore { .. } => {
                if self.phase == Phase::Idle {
                    self.path = path.to_string();
                }
                self.with_store(leg, |this, leg| match this.env.listing {
                    ListingSource::RemoteProxy => {
                        let issued = this
                            .env
                            .remote
                            .begin(ProxyCommand::Dir, &this.path, leg.completion())
                            .map(|_| ());
                        this.pending_or(Phase::AwaitingRemote, issued)
                    }
                    ListingSource::Backend => this.issue_open(leg, OpenFlags::metadata_only()),
                })
            }
            Phase::AwaitingRemote => {
                if leg.succeeded() {
                    self.cursor = Some(DirCursor::filled(leg.take_entries()));
                    self.finish(Ok(Reply::Unit))
                } else {
                    debug!(path = %self.path, status = leg.code(), "Proxied listing denied");
                    self.fail(Errno::ENOENT)
                }
            }
            Phase::AwaitingOpen => match leg.code() {
                codes::ERROR_FAILED => {
                    self.cursor = Some(DirCursor::lazy());
                    self.finish(Ok(Reply::Unit))
                }
                codes::OK => {
                    // A plain object, not a directory
                    if let Some(object) = leg.take_object() {
                        self.env.backend.close(object);
                    }
                    self.fail(Errno::ENOTDIR)
                }
                code => self.fail_code(code),
            },
            _ => self.unexpected("opendir"),
        }
    }

    fn readdir(&mut self, leg: &mut Leg) -> Step {
        match self.phase {
            Phase::Idle => {
                let needs_fetch = match &self.cursor {
                    Some(cursor) => cursor.needs_fetch(),
                    None => return self.fail(Errno::EBADF),
                };
                if needs_fetch {
                    let issued = self
                        .env
                        .backend
                        .list_directory(&self.path, leg.completion());
                    return self.pending_or(Phase::AwaitingListing, issued);
                }
                let entry = self.cursor.as_mut().and_then(DirCursor::next_entry);
                self.finish(Ok(Reply::Entry(entry)))
            }
            Phase::AwaitingListing => {
                if !leg.succeeded() {
                    return self.fail_code(leg.code());
                }
                let entries = leg.take_entries();
                let entry = self.cursor.as_mut().and_then(|cursor| {
                    cursor.fill(entries);
                    cursor.next_entry()
                });
                self.finish(Ok(Reply::Entry(entry)))
            }
            _ => self.unexpected("readdir"),
        }
    }

    fn rewinddir(&mut self, _leg: &mut Leg) -> Step {
        match self.cursor.as_mut() {
            Some(cursor) => {
                cursor.rewind();
                self.finish(Ok(Reply::Unit))
            }
            None => self.fail(Errno::EBADF),
        }
    }

    fn closedir(&mut self, _leg: &mut Leg) -> Step {
        match self.cursor.take() {
            Some(_) => {
                self.release_object();
                self.finish(Ok(Reply::Unit))
            }
            None => self.fail(Errno::EBADF),
        }
    }
}
