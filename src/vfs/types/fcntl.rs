/*!
 * VFS Control Commands
 * Decoded fcntl commands and seek origins
 */

use nix::libc;
use serde::{Deserialize, Serialize};

/// A decoded `fcntl` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FcntlCommand {
    GetFd,
    SetFd(i64),
    GetFl,
    SetFl(i64),
    /// Anything else, kept raw for logging
    Other { cmd: i32, arg: i64 },
}

impl FcntlCommand {
    pub fn from_raw(cmd: i32, arg: i64) -> Self {
        match cmd {
            libc::F_GETFD => FcntlCommand::GetFd,
            libc::F_SETFD => FcntlCommand::SetFd(arg),
            libc::F_GETFL => FcntlCommand::GetFl,
            libc::F_SETFL => FcntlCommand::SetFl(arg),
            _ => FcntlCommand::Other { cmd, arg },
        }
    }
}

/// Origin of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    /// Decode `SEEK_SET`/`SEEK_CUR`/`SEEK_END`
    pub fn from_raw(whence: i32) -> Option<Self> {
        match whence {
            libc::SEEK_SET => Some(Whence::Set),
            libc::SEEK_CUR => Some(Whence::Current),
            libc::SEEK_END => Some(Whence::End),
            _ => None,
        }
    }
}
