/*!
 * Error Types
 * Bridge faults (thiserror + miette) and the POSIX-shaped front-door error channel
 */

use crate::backend::codes;
use dashmap::DashSet;
use miette::Diagnostic;
use thiserror::Error;
use tracing::warn;

pub use nix::errno::Errno;

/// Result of every front-door operation
///
/// # Must Use
/// POSIX-style calls report failure only through this channel
#[must_use = "filesystem operations can fail and must be handled"]
pub type FsResult<T> = Result<T, Errno>;

/// Faults of the bridge machinery itself (not of a file operation)
#[derive(Error, Debug, Diagnostic)]
pub enum BridgeError {
    #[error("Failed to spawn executor thread: {0}")]
    #[diagnostic(
        code(bridge::spawn_failed),
        help("The host refused to create a thread. Check process thread limits.")
    )]
    SpawnFailed(#[from] std::io::Error),

    #[error("Executor is not running")]
    #[diagnostic(
        code(bridge::executor_stopped),
        help("The executor was shut down or its thread exited. Create a new FileSystem.")
    )]
    ExecutorStopped,

    #[error("Task panicked on the executor thread: {0}")]
    #[diagnostic(
        code(bridge::task_panicked),
        help("A closure passed to Executor::run panicked. The executor keeps running.")
    )]
    TaskPanicked(String),
}

/// Bridge result type
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Backend completion code to errno translation
///
/// Codes outside the fixed table degrade to ENOSYS. Each unmapped code is
/// reported once per table instance.
#[derive(Debug, Default)]
pub struct ErrnoTable {
    reported: DashSet<i32, ahash::RandomState>,
}

impl ErrnoTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate a non-zero backend code
    pub fn translate(&self, code: i32) -> Errno {
        match errno_from_code(code) {
            Some(errno) => errno,
            None => {
                if self.reported.insert(code) {
                    warn!(code = code, "Unmapped backend completion code, reporting ENOSYS");
                }
                Errno::ENOSYS
            }
        }
    }
}

/// The fixed backend-code table
#[inline]
pub fn errno_from_code(code: i32) -> Option<Errno> {
    match code {
        codes::ERROR_NOACCESS => Some(Errno::EACCES),
        codes::ERROR_NOMEMORY => Some(Errno::ENOMEM),
        codes::ERROR_NOSPACE | codes::ERROR_NOQUOTA => Some(Errno::ENOSPC),
        codes::ERROR_FILENOTFOUND => Some(Errno::ENOENT),
        codes::ERROR_FILEEXISTS => Some(Errno::EEXIST),
        codes::ERROR_FILETOOBIG => Some(Errno::EFBIG),
        _ => None,
    }
}
