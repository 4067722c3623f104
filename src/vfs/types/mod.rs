/*!
 * VFS Types
 * Value types shared by handlers and the front door
 */

mod entry;
mod fcntl;
mod file_type;
mod open_flags;
mod stat;

pub use entry::{DirEntry, MAX_NAME_LEN};
pub use fcntl::{FcntlCommand, Whence};
pub use file_type::FileType;
pub use open_flags::{OpenFlags, Translated};
pub use stat::{FileStat, PORT_PERMISSIONS, STORE_PERMISSIONS};

#[inline]
pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}
