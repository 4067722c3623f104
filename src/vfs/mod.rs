/*!
 * Virtual File System Module
 * The POSIX-shaped front door over port and store handlers
 */

pub mod config;
pub mod context;
pub mod descriptors;
pub mod filesystem;
pub mod paths;
pub mod types;

// Re-exports
pub use config::{DirectoryFallback, FsConfig, ListingSource, TRACE_ENV};
pub use context::FsContext;
pub use descriptors::DescriptorTable;
pub use filesystem::{DirHandle, FileSystem};
pub use types::{DirEntry, FcntlCommand, FileStat, FileType, OpenFlags, Whence};
