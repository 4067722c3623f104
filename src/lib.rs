/*!
 * BridgeFS Library
 * Blocking POSIX-style file calls over a single-threaded asynchronous backend
 */

pub mod backend;
pub mod bridge;
pub mod channel;
pub mod core;
pub mod handlers;
pub mod monitoring;
pub mod vfs;

// Re-exports
pub use backend::{MemoryStore, ObjectId, ObjectInfo, StoreBackend};
pub use bridge::{CallBridge, Completion, Executor, ExecutorStats, Serialization};
pub use channel::{ChannelError, MessageChannel};
pub use core::{BridgeError, BridgeResult, Errno, Fd, FsResult};
pub use monitoring::init_tracing;
pub use vfs::{
    DirEntry, DirHandle, DirectoryFallback, FileStat, FileSystem, FileType, FsConfig,
    ListingSource, OpenFlags,
};
