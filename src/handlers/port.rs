/*!
 * Port Handler
 *
 * Console-like byte streams. Reads drain a FIFO that the host feeds through
 * inbound messages; writes leave as outbound messages. Nothing here ever
 * starts a backend leg.
 */

use crate::bridge::{Leg, Reply, Step};
use crate::channel::{port_message, MessageChannel};
use crate::core::limits::{STDERR_PATH, STDIN_PATH, STDOUT_PATH};
use crate::core::{Errno, HandlerKind};
use crate::handlers::Handler;
use crate::vfs::types::{FcntlCommand, FileStat, OpenFlags};
use bytes::Bytes;
use nix::libc;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which standard stream a port stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    Input,
    Output,
    Error,
}

impl PortRole {
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            STDIN_PATH => Some(PortRole::Input),
            STDOUT_PATH => Some(PortRole::Output),
            STDERR_PATH => Some(PortRole::Error),
            _ => None,
        }
    }

    /// Stream number used in port messages
    #[inline]
    pub fn stream(self) -> u8 {
        match self {
            PortRole::Input => 0,
            PortRole::Output => 1,
            PortRole::Error => 2,
        }
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self == PortRole::Input
    }

    /// Access mode the stream is expected to be opened with
    fn expected_flags(self) -> OpenFlags {
        match self {
            PortRole::Input => OpenFlags::read_only(),
            PortRole::Output | PortRole::Error => OpenFlags::write_only(),
        }
    }
}

#[derive(Debug, Default)]
struct InboxState {
    bytes: VecDeque<u8>,
    /// Bumped on every push so waiters can tell new data from old
    generation: u64,
}

/// Shared FIFO behind every readable port
///
/// Appended to by the host, drained by reads. Its lock is independent of
/// handler serialization.
#[derive(Debug, Default)]
pub struct PortInbox {
    state: Mutex<InboxState>,
    arrived: Condvar,
}

impl PortInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and wake every blocked reader
    pub fn push(&self, data: &[u8]) {
        let mut state = self.state.lock();
        state.bytes.extend(data.iter().copied());
        state.generation += 1;
        drop(state);
        self.arrived.notify_all();
    }

    /// Wake every blocked reader without adding data
    pub fn wake_all(&self) {
        self.state.lock().generation += 1;
        self.arrived.notify_all();
    }

    /// Take up to `max` bytes
    pub fn drain(&self, max: usize) -> Bytes {
        let mut state = self.state.lock();
        let n = max.min(state.bytes.len());
        let taken: Vec<u8> = state.bytes.drain(..n).collect();
        Bytes::from(taken)
    }

    pub fn len(&self) -> usize {
        self.state.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current push generation
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Block until a push newer than `generation` happened
    pub fn wait_newer_than(&self, generation: u64) {
        let mut state = self.state.lock();
        while state.generation == generation {
            self.arrived.wait(&mut state);
        }
    }
}

/// What every port handler shares
#[derive(Clone)]
pub struct PortEnv {
    pub inbox: Arc<PortInbox>,
    pub channel: Arc<dyn MessageChannel>,
}

/// Handler for /dev/stdin, /dev/stdout and /dev/stderr
pub struct PortHandler {
    env: PortEnv,
    role: Option<PortRole>,
    flags: OpenFlags,
    blocking: bool,
}

impl PortHandler {
    pub fn new(env: PortEnv) -> Self {
        Self {
            env,
            role: None,
            flags: OpenFlags::default(),
            blocking: true,
        }
    }

    #[inline]
    pub fn role(&self) -> Option<PortRole> {
        self.role
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }
}

impl Handler for PortHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Port
    }

    fn open(&mut self, _leg: &mut Leg, path: &str, flags: OpenFlags, _mode: u32) -> Step {
        let Some(role) = PortRole::from_path(path) else {
            debug!(path = path, "Unknown port device");
            return Step::err(Errno::ENOENT);
        };

        let expected = role.expected_flags();
        if (flags.read, flags.write) != (expected.read, expected.write) {
            warn!(path = path, ?flags, "Ignoring open flags that do not match the port");
        }

        self.role = Some(role);
        self.flags = OpenFlags {
            nonblock: flags.nonblock,
            ..expected
        };
        self.blocking = !flags.nonblock;
        Step::unit()
    }

    fn close(&mut self, _leg: &mut Leg) -> Step {
        match self.role.take() {
            Some(_) => Step::unit(),
            None => Step::err(Errno::EBADF),
        }
    }

    fn read(&mut self, _leg: &mut Leg, len: usize) -> Step {
        if !self.role.is_some_and(PortRole::is_readable) {
            return Step::err(Errno::EBADF);
        }
        if len == 0 {
            return Step::ok(Reply::Bytes(Bytes::new()));
        }

        let bytes = self.env.inbox.drain(len);
        if !bytes.is_empty() {
            Step::ok(Reply::Bytes(bytes))
        } else if self.blocking {
            Step::ok(Reply::WouldBlock)
        } else {
            Step::err(Errno::EAGAIN)
        }
    }

    fn write(&mut self, _leg: &mut Leg, data: &Bytes) -> Step {
        let role = match self.role {
            Some(role) if !role.is_readable() => role,
            _ => return Step::err(Errno::EBADF),
        };

        match self.env.channel.post(port_message(role.stream(), data)) {
            Ok(()) => Step::ok(Reply::Count(data.len())),
            Err(e) => {
                warn!(error = %e, stream = role.stream(), "Port write could not be posted");
                Step::err(Errno::EIO)
            }
        }
    }

    fn stat(&mut self, _leg: &mut Leg, path: &str) -> Step {
        match PortRole::from_path(path) {
            Some(_) => Step::ok(Reply::Attributes(FileStat::char_device())),
            None => Step::err(Errno::ENOENT),
        }
    }

    fn fstat(&mut self, _leg: &mut Leg) -> Step {
        match self.role {
            Some(_) => Step::ok(Reply::Attributes(FileStat::char_device())),
            None => Step::err(Errno::EBADF),
        }
    }

    fn fcntl(&mut self, _leg: &mut Leg, command: FcntlCommand) -> Step {
        match command {
            FcntlCommand::GetFl => Step::ok(Reply::Value(self.flags.to_posix())),
            FcntlCommand::SetFl(arg) => {
                let arg = arg as i32;
                self.blocking = arg & libc::O_NONBLOCK == 0;
                self.flags.nonblock = !self.blocking;
                if arg & !libc::O_NONBLOCK != 0 {
                    warn!(flags = arg, "F_SETFL on a port ignores everything but O_NONBLOCK");
                }
                Step::ok(Reply::Value(0))
            }
            other => {
                debug!(command = ?other, "fcntl command not supported on ports");
                Step::err(Errno::ENOSYS)
            }
        }
    }

    fn isatty(&mut self, _leg: &mut Leg) -> Step {
        match self.role {
            Some(_) => Step::ok(Reply::Bool(true)),
            None => Step::err(Errno::EBADF),
        }
    }
}
