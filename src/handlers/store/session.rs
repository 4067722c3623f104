/*!
 * Store Session
 *
 * The store is opened lazily, once per filesystem. The first call that
 * needs it starts `open_store` as an extra leg; calls arriving while that is
 * in progress park their completion here and resume with the same code.
 */

use crate::backend::{codes, StoreBackend};
use crate::bridge::{Completion, Leg, LegOutput};
use parking_lot::Mutex;
use std::mem;
use tracing::{info, warn};

enum SessionState {
    Uninitialized,
    Opening { waiters: Vec<Completion> },
    Ready,
}

/// Outcome of asking for the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Usable right now
    Ready,
    /// This call started the open and must report its completion
    Started,
    /// Someone else is opening; this call was parked
    Parked,
}

/// Lazily opened store shared by every store handler
pub struct StoreSession {
    state: Mutex<SessionState>,
}

impl Default for StoreSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), SessionState::Ready)
    }

    /// Get the store, opening it if nobody has yet
    ///
    /// `Err(code)` if the backend refused to start the open.
    pub fn acquire(
        &self,
        backend: &dyn StoreBackend,
        quota: u64,
        leg: &Leg,
    ) -> Result<Acquire, i32> {
        let mut state = self.state.lock();
        if let SessionState::Opening { waiters } = &mut *state {
            waiters.push(leg.completion());
            return Ok(Acquire::Parked);
        }
        if matches!(*state, SessionState::Ready) {
            return Ok(Acquire::Ready);
        }

        backend.open_store(quota, leg.completion())?;
        info!(quota = quota, "Opening store");
        *state = SessionState::Opening {
            waiters: Vec::new(),
        };
        Ok(Acquire::Started)
    }

    /// Record the result of the open; only the starting call reports it
    pub fn complete(&self, code: i32) {
        let waiters = {
            let mut state = self.state.lock();
            let next = if code == codes::OK {
                SessionState::Ready
            } else {
                SessionState::Uninitialized
            };
            match mem::replace(&mut *state, next) {
                SessionState::Opening { waiters } => waiters,
                _ => Vec::new(),
            }
        };

        if code == codes::OK {
            info!(waiters = waiters.len(), "Store ready");
        } else {
            warn!(code = code, waiters = waiters.len(), "Store open failed");
        }
        for waiter in waiters {
            waiter.complete(code, LegOutput::None);
        }
    }
}
