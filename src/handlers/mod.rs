/*!
 * Handlers
 *
 * One handler instance per open resource. Entry points are small state
 * machines: they read the previous leg from [`Leg`], keep their progress in
 * handler-private state and answer with a [`Step`]. Only one call is ever
 * stepped per handler at a time, enforced by [`HandlerCell::gate`].
 */

pub mod port;
pub mod store;

pub use port::{PortEnv, PortHandler, PortInbox, PortRole};
pub use store::{StoreEnv, StoreHandler, StoreSession};

use crate::bridge::{Leg, Reply, Step};
use crate::core::{Errno, HandlerId, HandlerKind};
use crate::vfs::types::{FcntlCommand, OpenFlags, Whence};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;

/// The capability set every handler family implements
///
/// Every operation defaults to ENOTSUP so a family only spells out what it
/// supports.
#[allow(unused_variables)]
pub trait Handler: Send {
    fn kind(&self) -> HandlerKind;

    fn open(&mut self, leg: &mut Leg, path: &str, flags: OpenFlags, mode: u32) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn close(&mut self, leg: &mut Leg) -> Step {
        Step::unit()
    }

    fn read(&mut self, leg: &mut Leg, len: usize) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn write(&mut self, leg: &mut Leg, data: &Bytes) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn seek(&mut self, leg: &mut Leg, offset: i64, whence: Whence) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn stat(&mut self, leg: &mut Leg, path: &str) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn fstat(&mut self, leg: &mut Leg) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn fcntl(&mut self, leg: &mut Leg, command: FcntlCommand) -> Step {
        Step::err(Errno::ENOSYS)
    }

    fn isatty(&mut self, leg: &mut Leg) -> Step {
        Step::ok(Reply::Bool(false))
    }

    fn mkdir(&mut self, leg: &mut Leg, path: &str, mode: u32) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn opendir(&mut self, leg: &mut Leg, path: &str) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn readdir(&mut self, leg: &mut Leg) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn rewinddir(&mut self, leg: &mut Leg) -> Step {
        Step::err(Errno::ENOTSUP)
    }

    fn closedir(&mut self, leg: &mut Leg) -> Step {
        Step::err(Errno::ENOTSUP)
    }
}

/// A handler plus the locks that serialize calls against it
pub struct HandlerCell {
    pub id: HandlerId,
    pub kind: HandlerKind,
    /// Held by a caller for the whole duration of one call
    pub gate: Mutex<()>,
    /// Locked only by the executor while stepping
    pub(crate) state: Mutex<Box<dyn Handler>>,
}

impl HandlerCell {
    pub fn new(id: HandlerId, handler: Box<dyn Handler>) -> Self {
        Self {
            id,
            kind: handler.kind(),
            gate: Mutex::new(()),
            state: Mutex::new(handler),
        }
    }
}

impl fmt::Debug for HandlerCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCell")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("busy", &self.gate.is_locked())
            .finish()
    }
}
