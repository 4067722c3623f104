/*!
 * VFS Directory Entry
 * One name yielded by readdir
 */

use super::file_type::FileType;
use serde::{Deserialize, Serialize};

/// Directory entry
///
/// The type is best effort: listings proxied through the message channel
/// may not know it and report [`FileType::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirEntry {
    pub name: String,
    #[serde(default)]
    pub file_type: FileType,
}

impl DirEntry {
    /// Create an entry, clipping the name to what a `dirent` can carry
    pub fn new(name: impl Into<String>, file_type: FileType) -> Self {
        let mut name = name.into();
        if name.len() > MAX_NAME_LEN {
            let mut cut = MAX_NAME_LEN;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        Self { name, file_type }
    }

    #[inline]
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    #[inline]
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }

    #[inline]
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.file_type, FileType::Directory)
    }
}

/// Longest name a `dirent.d_name` holds (without the terminator)
pub const MAX_NAME_LEN: usize = 255;
