/*!
 * Descriptor Table
 *
 * Append-only slots; the index is the descriptor number. Closing clears a
 * slot but never compacts, so a number is never handed to a second handler.
 */

use crate::core::Fd;
use crate::handlers::HandlerCell;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct DescriptorTable {
    slots: RwLock<Vec<Option<Arc<HandlerCell>>>>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler and return its descriptor
    pub fn bind(&self, handler: Arc<HandlerCell>) -> Fd {
        let mut slots = self.slots.write();
        slots.push(Some(handler));
        (slots.len() - 1) as Fd
    }

    /// Handler behind `fd`; `None` for negative, unknown or closed descriptors
    pub fn lookup(&self, fd: Fd) -> Option<Arc<HandlerCell>> {
        let index = usize::try_from(fd).ok()?;
        self.slots.read().get(index)?.clone()
    }

    /// Tombstone `fd` and hand back what it held
    pub fn release(&self, fd: Fd) -> Option<Arc<HandlerCell>> {
        let index = usize::try_from(fd).ok()?;
        self.slots.write().get_mut(index)?.take()
    }

    /// Slots ever allocated, closed ones included
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptors currently bound
    pub fn open_count(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_some()).count()
    }
}
