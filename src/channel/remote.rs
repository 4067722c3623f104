/*!
 * Proxied Store Queries
 *
 * Some store questions cannot be answered through the backend API (a
 * directory cannot be opened as an object), so the host answers them over
 * the message channel instead.
 *
 * Requests: `X5<cmd><id>:<path>` with `cmd` `S` (does it exist as a
 * directory) or `D` (list it).
 * Replies:
 * - `X5S<id>:<status>`
 * - `X5D<id>:<type><name>` once per entry, type `D`, `F` or a space
 * - `X5D<id>:_<status>` to finish a listing
 *
 * `<status>` is one character whose value is `char - '0'`. Every reply
 * carries the request id, so any number of queries may be outstanding.
 */

use super::MessageChannel;
use crate::backend::codes;
use crate::bridge::{Completion, LegOutput};
use crate::vfs::types::{DirEntry, FileType};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix shared by every proxied query message
pub const PROXY_TAG: &[u8] = b"X5";

/// Kind of proxied query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyCommand {
    Stat,
    Dir,
}

impl ProxyCommand {
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            ProxyCommand::Stat => b'S',
            ProxyCommand::Dir => b'D',
        }
    }

    #[inline]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'S' => Some(ProxyCommand::Stat),
            b'D' => Some(ProxyCommand::Dir),
            _ => None,
        }
    }
}

struct PendingRemoteQuery {
    command: ProxyCommand,
    entries: Vec<DirEntry>,
    done: Completion,
}

/// Outstanding proxied queries keyed by request id
pub struct RemoteQueries {
    channel: Arc<dyn MessageChannel>,
    pending: DashMap<u64, PendingRemoteQuery, ahash::RandomState>,
    next_id: AtomicU64,
}

/// A parsed reply
#[derive(Debug, PartialEq, Eq)]
enum ProxyReply<'a> {
    Status(i32),
    Entry(FileType, &'a str),
    /// Recognised prefix, unreadable body
    Malformed,
}

fn status_of(c: u8) -> i32 {
    i32::from(c) - i32::from(b'0')
}

/// Split `X5<cmd><id>:<body>`; `None` if the message is not a proxy reply
fn parse(message: &[u8]) -> Option<(ProxyCommand, Option<u64>, &[u8])> {
    let rest = message.strip_prefix(PROXY_TAG)?;
    let (&cmd, rest) = rest.split_first()?;
    let command = ProxyCommand::from_byte(cmd)?;

    let Some(colon) = rest.iter().position(|&b| b == b':') else {
        return Some((command, None, rest));
    };
    let id = std::str::from_utf8(&rest[..colon])
        .ok()
        .and_then(|s| s.parse::<u64>().ok());
    Some((command, id, &rest[colon + 1..]))
}

fn reply_body(command: ProxyCommand, body: &[u8]) -> ProxyReply<'_> {
    match (command, body) {
        (ProxyCommand::Stat, [status]) => ProxyReply::Status(status_of(*status)),
        (ProxyCommand::Dir, [b'_', status]) => ProxyReply::Status(status_of(*status)),
        (ProxyCommand::Dir, [kind, name @ ..]) if *kind != b'_' => match std::str::from_utf8(name) {
            Ok(name) if !name.is_empty() => {
                ProxyReply::Entry(FileType::from_listing_char(*kind), name)
            }
            _ => ProxyReply::Malformed,
        },
        _ => ProxyReply::Malformed,
    }
}

impl RemoteQueries {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            channel,
            pending: DashMap::with_hasher(ahash::RandomState::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of queries waiting for a reply
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Post a query; `done` fires with the reply status
    ///
    /// Listings complete with `LegOutput::Entries`. A query that cannot be
    /// posted fails synchronously with `ERROR_FAILED`.
    pub fn begin(&self, command: ProxyCommand, path: &str, done: Completion) -> Result<u64, i32> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending.insert(
            id,
            PendingRemoteQuery {
                command,
                entries: Vec::new(),
                done,
            },
        );

        let message = Bytes::from(format!(
            "X5{}{}:{}",
            command.as_byte() as char,
            id,
            path
        ));
        match self.channel.post(message) {
            Ok(()) => {
                debug!(id = id, ?command, path = path, "Proxied query posted");
                Ok(id)
            }
            Err(e) => {
                warn!(id = id, error = %e, "Proxied query could not be posted");
                if let Some((_, query)) = self.pending.remove(&id) {
                    // Nobody waits for this leg; the caller fails it synchronously
                    query.done.complete(codes::ERROR_FAILED, LegOutput::None);
                }
                Err(codes::ERROR_FAILED)
            }
        }
    }

    /// Feed an inbound message; returns whether it was a proxy reply
    pub fn handle(&self, message: &[u8]) -> bool {
        let Some((command, id, body)) = parse(message) else {
            return false;
        };
        let Some(id) = id else {
            warn!(message = %String::from_utf8_lossy(message), "Proxy reply without request id");
            return true;
        };

        match reply_body(command, body) {
            ProxyReply::Entry(file_type, name) => {
                // The shard guard must be gone before `fail` removes the entry
                let accepted = match self.pending.get_mut(&id) {
                    Some(mut query) if query.command == ProxyCommand::Dir => {
                        query.entries.push(DirEntry::new(name, file_type));
                        Some(true)
                    }
                    Some(_) => Some(false),
                    None => None,
                };
                match accepted {
                    Some(true) => {}
                    Some(false) => self.fail(id, "listing entry for a stat query"),
                    None => debug!(id = id, "Listing entry for unknown query ignored"),
                }
            }
            ProxyReply::Status(status) => match self.pending.remove(&id) {
                Some((_, query)) if query.command == command => {
                    let output = match query.command {
                        ProxyCommand::Dir => LegOutput::Entries(query.entries),
                        ProxyCommand::Stat => LegOutput::None,
                    };
                    query.done.complete(status, output);
                }
                Some((_, query)) => {
                    warn!(id = id, "Proxy reply command does not match its query");
                    query.done.complete(codes::ERROR_FAILED, LegOutput::None);
                }
                None => debug!(id = id, "Reply for unknown query ignored"),
            },
            ProxyReply::Malformed => self.fail(id, "malformed reply"),
        }
        true
    }

    fn fail(&self, id: u64, reason: &str) {
        if let Some((_, query)) = self.pending.remove(&id) {
            warn!(id = id, reason = reason, "Proxied query failed");
            query.done.complete(codes::ERROR_FAILED, LegOutput::None);
        }
    }
}
