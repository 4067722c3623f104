/*!
 * Store Backend
 *
 * The asynchronous, quota-limited object store the store handler talks to.
 * Every method must be called on the executor thread; it either refuses
 * synchronously (`Err(code)`) or takes ownership of the [`Completion`] and
 * fires it later, again on the executor thread.
 */

pub mod memory;

pub use memory::MemoryStore;

use crate::bridge::Completion;
use crate::vfs::types::{FileType, OpenFlags};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend completion codes
///
/// Zero is success; read and write legs complete with a non-negative byte
/// count instead.
pub mod codes {
    pub const OK: i32 = 0;
    pub const COMPLETION_PENDING: i32 = -1;
    pub const ERROR_FAILED: i32 = -2;
    pub const ERROR_ABORTED: i32 = -3;
    pub const ERROR_BADARGUMENT: i32 = -4;
    pub const ERROR_BADRESOURCE: i32 = -5;
    pub const ERROR_NOACCESS: i32 = -7;
    pub const ERROR_NOMEMORY: i32 = -8;
    pub const ERROR_NOSPACE: i32 = -9;
    pub const ERROR_NOQUOTA: i32 = -10;
    pub const ERROR_FILENOTFOUND: i32 = -20;
    pub const ERROR_FILEEXISTS: i32 = -21;
    pub const ERROR_FILETOOBIG: i32 = -22;
}

/// Handle of an object opened on the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{}", self.0)
    }
}

/// Result of a metadata query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ObjectInfo {
    pub file_type: FileType,
    pub size: u64,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_modified_time: i64,
}

/// The asynchronous store
///
/// Outputs travel with the completion: `open_object` completes with
/// `LegOutput::Object`, `query` with `LegOutput::Info`, `read` with
/// `LegOutput::Bytes` and `list_directory` with `LegOutput::Entries`.
#[cfg_attr(test, mockall::automock)]
pub trait StoreBackend: Send + Sync {
    /// Open (or create) the store itself with the given quota
    fn open_store(&self, quota: u64, done: Completion) -> Result<(), i32>;

    /// Open an object; directories complete with `ERROR_FAILED`
    fn open_object(&self, path: &str, flags: OpenFlags, done: Completion) -> Result<(), i32>;

    /// Query the metadata of an open object
    fn query(&self, object: ObjectId, done: Completion) -> Result<(), i32>;

    /// Read up to `len` bytes at `offset`; the code is the byte count
    fn read(&self, object: ObjectId, offset: u64, len: usize, done: Completion)
        -> Result<(), i32>;

    /// Write `data` at `offset`; the code is the byte count
    fn write(&self, object: ObjectId, offset: u64, data: Bytes, done: Completion)
        -> Result<(), i32>;

    /// Create a directory
    fn make_directory(&self, path: &str, done: Completion) -> Result<(), i32>;

    /// List the direct children of a directory
    fn list_directory(&self, path: &str, done: Completion) -> Result<(), i32>;

    /// Release an open object (synchronous)
    fn close(&self, object: ObjectId);
}
