/*!
 * VFS File Type Enum
 * Kinds of objects a handler can report
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// File type enumeration with serde support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    File,
    Directory,
    #[serde(rename = "char_device")]
    CharDevice,
    #[default]
    Unknown,
}

impl FileType {
    /// File-format bits (`S_IFMT` part) of a stat mode
    #[inline]
    #[must_use]
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::File => nix::libc::S_IFREG as u32,
            FileType::Directory => nix::libc::S_IFDIR as u32,
            FileType::CharDevice => nix::libc::S_IFCHR as u32,
            FileType::Unknown => 0,
        }
    }

    /// Type character used by the proxied directory listing
    #[inline]
    #[must_use]
    pub fn from_listing_char(c: u8) -> Self {
        match c {
            b'D' => FileType::Directory,
            b'F' => FileType::File,
            _ => FileType::Unknown,
        }
    }

    /// Inverse of [`FileType::from_listing_char`]
    #[inline]
    #[must_use]
    pub fn listing_char(self) -> char {
        match self {
            FileType::Directory => 'D',
            FileType::File => 'F',
            _ => ' ',
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileType::File => write!(f, "file"),
            FileType::Directory => write!(f, "directory"),
            FileType::CharDevice => write!(f, "char device"),
            FileType::Unknown => write!(f, "unknown"),
        }
    }
}
