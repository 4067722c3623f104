/*!
 * Call Envelope
 * Tagged request/result record for one logical call crossing the thread boundary
 */

use crate::backend::{ObjectId, ObjectInfo};
use crate::core::{Errno, HandlerId};
use crate::vfs::types::{DirEntry, FcntlCommand, FileStat, OpenFlags, Whence};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed operation set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Open,
    Close,
    Read,
    Write,
    Seek,
    Stat,
    Fstat,
    Fcntl,
    IsATty,
    MkDir,
    OpenDir,
    ReadDir,
    RewindDir,
    CloseDir,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Seek => "seek",
            Operation::Stat => "stat",
            Operation::Fstat => "fstat",
            Operation::Fcntl => "fcntl",
            Operation::IsATty => "isatty",
            Operation::MkDir => "mkdir",
            Operation::OpenDir => "opendir",
            Operation::ReadDir => "readdir",
            Operation::RewindDir => "rewinddir",
            Operation::CloseDir => "closedir",
        };
        f.write_str(name)
    }
}

/// Per-operation inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operands {
    Open {
        path: String,
        flags: OpenFlags,
        mode: u32,
    },
    Close,
    Read {
        len: usize,
    },
    Write {
        data: Bytes,
    },
    Seek {
        offset: i64,
        whence: Whence,
    },
    Stat {
        path: String,
    },
    Fstat,
    Fcntl {
        command: FcntlCommand,
    },
    IsATty,
    MkDir {
        path: String,
        mode: u32,
    },
    OpenDir {
        path: String,
    },
    ReadDir,
    RewindDir,
    CloseDir,
}

impl Operands {
    pub fn operation(&self) -> Operation {
        match self {
            Operands::Open { .. } => Operation::Open,
            Operands::Close => Operation::Close,
            Operands::Read { .. } => Operation::Read,
            Operands::Write { .. } => Operation::Write,
            Operands::Seek { .. } => Operation::Seek,
            Operands::Stat { .. } => Operation::Stat,
            Operands::Fstat => Operation::Fstat,
            Operands::Fcntl { .. } => Operation::Fcntl,
            Operands::IsATty => Operation::IsATty,
            Operands::MkDir { .. } => Operation::MkDir,
            Operands::OpenDir { .. } => Operation::OpenDir,
            Operands::ReadDir => Operation::ReadDir,
            Operands::RewindDir => Operation::RewindDir,
            Operands::CloseDir => Operation::CloseDir,
        }
    }
}

/// Final value of a successful call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Unit,
    Bytes(Bytes),
    Count(usize),
    Offset(i64),
    Attributes(FileStat),
    Value(i32),
    Entry(Option<DirEntry>),
    Bool(bool),
    /// Flow-control sentinel: blocking read found nothing, wait and retry
    WouldBlock,
}

/// Outcome of a whole call
pub type CallResult = Result<Reply, Errno>;

/// Data a backend leg hands back alongside its code
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LegOutput {
    #[default]
    None,
    Object(ObjectId),
    Info(ObjectInfo),
    Bytes(Bytes),
    Entries(Vec<DirEntry>),
}

/// Raw result of the most recent backend leg
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LegResult {
    pub code: i32,
    pub output: LegOutput,
}

/// One in-flight call
///
/// Owned by whoever is currently driving it: the caller until it is handed
/// to the executor, then the executor until the call finishes and the
/// envelope travels back.
#[derive(Debug)]
pub struct CallEnvelope {
    pub operation: Operation,
    pub handler: HandlerId,
    pub operands: Operands,
    /// Set once the call reached a terminal state
    pub result: Option<CallResult>,
    /// Raw completion of the last backend leg
    pub completion: LegResult,
    /// Cleared before every step; set when the handler started another leg
    pub continuing: bool,
    /// Dispatcher steps taken so far
    pub steps: u32,
    /// Asynchronous backend legs started so far
    pub legs: u32,
}

impl CallEnvelope {
    pub fn new(handler: HandlerId, operands: Operands) -> Self {
        Self {
            operation: operands.operation(),
            handler,
            operands,
            result: None,
            completion: LegResult::default(),
            continuing: false,
            steps: 0,
            legs: 0,
        }
    }

    /// Finish the call from outside the dispatcher (executor shutdown)
    pub fn fail(mut self, errno: Errno) -> Self {
        self.result = Some(Err(errno));
        self.continuing = false;
        self
    }

    /// Result of a finished call; EIO if the call never reached a terminal state
    pub fn into_result(self) -> CallResult {
        self.result.unwrap_or(Err(Errno::EIO))
    }
}
