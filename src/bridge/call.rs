/*!
 * Call Bridge
 *
 * Makes a multi-leg asynchronous call look like one blocking call. Worker
 * threads take the handler's serialization slot, hand the envelope to the
 * executor and block on a one-shot reply. On the executor thread the call
 * is driven inline instead.
 */

use super::envelope::{CallEnvelope, CallResult, Operands};
use super::executor::Executor;
use crate::core::{BridgeResult, Errno};
use crate::handlers::HandlerCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Which calls serialize against each other
///
/// `PerHandler` lets independent descriptors proceed concurrently; `Global`
/// queues every cross-thread call behind one lock regardless of target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Serialization {
    #[default]
    PerHandler,
    Global,
}

/// Blocking front end of the executor
#[derive(Debug)]
pub struct CallBridge {
    executor: Executor,
    serialization: Serialization,
    global: Mutex<()>,
}

impl CallBridge {
    pub fn new(executor: Executor, serialization: Serialization) -> Self {
        Self {
            executor,
            serialization,
            global: Mutex::new(()),
        }
    }

    #[inline]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    #[inline]
    pub fn serialization(&self) -> Serialization {
        self.serialization
    }

    /// Run `envelope` to completion against `handler`
    ///
    /// # Panics
    /// On the executor thread, if the handler's slot is already held. The
    /// holder is waiting on this very thread, so waiting would deadlock.
    pub fn invoke(
        &self,
        handler: &Arc<HandlerCell>,
        envelope: CallEnvelope,
    ) -> BridgeResult<CallEnvelope> {
        if self.executor.is_executor_thread() {
            let Some(_slot) = handler.gate.try_lock() else {
                panic!(
                    "{} handler {} re-entered on the executor thread while its slot is held",
                    handler.kind, handler.id
                );
            };
            return self.executor.execute_inline(Arc::clone(handler), envelope);
        }

        let _global = match self.serialization {
            Serialization::Global => Some(self.global.lock()),
            Serialization::PerHandler => None,
        };
        let _slot = handler.gate.lock();
        self.executor.submit(Arc::clone(handler), envelope)
    }

    /// Run one operation and return its result
    pub fn call(&self, handler: &Arc<HandlerCell>, operands: Operands) -> CallResult {
        let envelope = CallEnvelope::new(handler.id, operands);
        let operation = envelope.operation;
        match self.invoke(handler, envelope) {
            Ok(envelope) => envelope.into_result(),
            Err(e) => {
                warn!(
                    handler = %handler.id,
                    operation = %operation,
                    error = %e,
                    "Call could not reach the executor"
                );
                Err(Errno::EIO)
            }
        }
    }
}
