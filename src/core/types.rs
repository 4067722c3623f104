/*!
 * Core Types
 * Identifiers shared across the bridge
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Descriptor number handed out by the descriptor table
///
/// Signed so that callers can pass through whatever the C layer gave them;
/// negative values never resolve.
pub type Fd = i32;

/// Sequence number of one in-flight call on the executor
pub type CallId = u64;

/// Identity of a handler instance (stable for its lifetime)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Which handler family serves a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Push-fed byte stream (stdin/stdout/stderr style ports)
    Port,
    /// Asynchronous quota-backed object store
    Store,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::Port => write!(f, "port"),
            HandlerKind::Store => write!(f, "store"),
        }
    }
}
