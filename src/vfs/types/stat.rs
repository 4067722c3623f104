/*!
 * VFS Stat Record
 * Attributes returned by stat/fstat, shaped like `struct stat`
 */

use super::file_type::FileType;
use crate::backend::ObjectInfo;
use crate::core::limits::STAT_BLOCK_SIZE;
use nix::libc;
use serde::{Deserialize, Serialize};

/// Permission bits every store object reports (rwx for everyone)
pub const STORE_PERMISSIONS: u32 = 0o777;

/// Permission bits of a console port (owner read/write)
pub const PORT_PERMISSIONS: u32 = 0o600;

/// Attributes of one object
///
/// Timestamps are whole seconds since the UNIX epoch, as the store reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileStat {
    pub mode: u32,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl FileStat {
    /// Build from a backend metadata query
    #[must_use]
    pub fn from_info(info: &ObjectInfo) -> Self {
        Self {
            mode: info.file_type.mode_bits() | STORE_PERMISSIONS,
            size: info.size,
            blksize: STAT_BLOCK_SIZE,
            blocks: info.size.div_ceil(u64::from(STAT_BLOCK_SIZE)),
            atime: info.last_access_time,
            mtime: info.last_modified_time,
            ctime: info.creation_time,
        }
    }

    /// Attributes of a path known only to be a directory
    #[must_use]
    pub fn directory() -> Self {
        Self {
            mode: FileType::Directory.mode_bits() | STORE_PERMISSIONS,
            ..Default::default()
        }
    }

    /// Attributes of a console port
    #[must_use]
    pub fn char_device() -> Self {
        Self {
            mode: FileType::CharDevice.mode_bits() | PORT_PERMISSIONS,
            ..Default::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn file_type(&self) -> FileType {
        match self.mode & libc::S_IFMT as u32 {
            m if m == libc::S_IFREG as u32 => FileType::File,
            m if m == libc::S_IFDIR as u32 => FileType::Directory,
            m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
            _ => FileType::Unknown,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    /// Check `access(2)` style `R_OK`/`W_OK`/`X_OK` bits against the owner bits
    #[must_use]
    pub fn permits(&self, amode: i32) -> bool {
        let wanted = [
            (libc::R_OK, libc::S_IRUSR),
            (libc::W_OK, libc::S_IWUSR),
            (libc::X_OK, libc::S_IXUSR),
        ];
        wanted
            .iter()
            .filter(|(bit, _)| amode & bit != 0)
            .all(|(_, perm)| self.mode & (*perm as u32) != 0)
    }
}
