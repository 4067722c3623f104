/*!
 * VFS Open Flags
 * Translation between POSIX `O_*` bits and the flag set handlers understand
 */

use super::is_false;
use nix::libc;
use serde::{Deserialize, Serialize};

/// File open flags with compact serialization (skips false values)
///
/// `OpenFlags::default()` opens for metadata only: stat uses it to check a
/// path without asking for read or write access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct OpenFlags {
    #[serde(skip_serializing_if = "is_false")]
    pub read: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub write: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub append: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub truncate: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub create: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub create_new: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub nonblock: bool,
}

/// Result of translating raw POSIX flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translated {
    pub flags: OpenFlags,
    /// Bits that have no meaning for any handler (logged, then ignored)
    pub ignored: i32,
}

const KNOWN_BITS: i32 = libc::O_ACCMODE
    | libc::O_CREAT
    | libc::O_TRUNC
    | libc::O_EXCL
    | libc::O_APPEND
    | libc::O_NONBLOCK;

impl OpenFlags {
    /// Create read-only flags
    #[inline]
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    /// Create write-only flags
    #[inline]
    #[must_use]
    pub fn write_only() -> Self {
        Self {
            write: true,
            ..Default::default()
        }
    }

    /// Create read-write flags
    #[inline]
    #[must_use]
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Flags used to check a path for stat
    #[inline]
    #[must_use]
    pub fn metadata_only() -> Self {
        Self::default()
    }

    /// Check if any write operation is possible
    #[inline]
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.write || self.append
    }

    /// Check if this will create a file
    #[inline]
    #[must_use]
    pub const fn will_create(&self) -> bool {
        self.create || self.create_new
    }

    /// Convert from POSIX flags (`O_RDONLY`, `O_WRONLY`, `O_RDWR`, `O_CREAT`, ...)
    ///
    /// `O_EXCL` only means "must not exist" together with `O_CREAT`; alone it is
    /// reported as ignored.
    #[must_use]
    pub fn from_posix(raw: i32) -> Translated {
        let (read, write) = match raw & libc::O_ACCMODE {
            libc::O_RDONLY => (true, false),
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => (false, false),
        };
        let create = raw & libc::O_CREAT != 0;
        let excl = raw & libc::O_EXCL != 0;

        let mut ignored = raw & !KNOWN_BITS;
        if excl && !create {
            ignored |= libc::O_EXCL;
        }

        Translated {
            flags: Self {
                read,
                write,
                append: raw & libc::O_APPEND != 0,
                truncate: raw & libc::O_TRUNC != 0,
                create: create && !excl,
                create_new: create && excl,
                nonblock: raw & libc::O_NONBLOCK != 0,
            },
            ignored,
        }
    }

    /// Convert back to POSIX flags (what `F_GETFL` reports)
    #[must_use]
    pub fn to_posix(&self) -> i32 {
        let mut raw = match (self.read, self.write) {
            (true, true) => libc::O_RDWR,
            (false, true) => libc::O_WRONLY,
            _ => libc::O_RDONLY,
        };

        if self.append {
            raw |= libc::O_APPEND;
        }
        if self.truncate {
            raw |= libc::O_TRUNC;
        }
        if self.create {
            raw |= libc::O_CREAT;
        }
        if self.create_new {
            raw |= libc::O_CREAT | libc::O_EXCL;
        }
        if self.nonblock {
            raw |= libc::O_NONBLOCK;
        }
        raw
    }
}
