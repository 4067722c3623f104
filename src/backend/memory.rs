/*!
 * In-Memory Store
 *
 * Deterministic [`StoreBackend`] kept entirely in memory. Every leg completes
 * through the executor queue, never inline, so callers see the same
 * multi-leg behavior as with a real asynchronous store. Opening a directory
 * as an object fails with `ERROR_FAILED`, like the store this stands in for.
 */

use super::codes::*;
use super::{ObjectId, ObjectInfo, StoreBackend};
use crate::bridge::{Completion, LegOutput};
use crate::vfs::types::{DirEntry, FileType, OpenFlags};
use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

#[derive(Debug)]
enum Node {
    File {
        data: Vec<u8>,
        created: i64,
        accessed: i64,
        modified: i64,
    },
    Directory {
        created: i64,
    },
}

#[derive(Debug)]
struct Inner {
    opened: bool,
    quota: u64,
    used: u64,
    nodes: AHashMap<String, Node>,
    objects: AHashMap<ObjectId, String>,
    next_object: u64,
}

/// In-memory quota-limited store
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Key of a path inside the store: absolute, no trailing slash except root
fn key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parent_of(key: &str) -> Option<&str> {
    if key == "/" {
        return None;
    }
    match key.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&key[..idx]),
        None => None,
    }
}

fn name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

impl Inner {
    fn is_dir(&self, key: &str) -> bool {
        matches!(self.nodes.get(key), Some(Node::Directory { .. }))
    }

    fn parent_is_dir(&self, key: &str) -> bool {
        parent_of(key).is_some_and(|p| self.is_dir(p))
    }

    fn path_of(&self, object: ObjectId) -> Option<&str> {
        self.objects.get(&object).map(String::as_str)
    }

    fn open_object(&mut self, path: &str, flags: OpenFlags) -> Result<ObjectId, i32> {
        let key = key(path);
        match self.nodes.get_mut(&key) {
            Some(Node::Directory { .. }) => return Err(ERROR_FAILED),
            Some(Node::File { data, modified, .. }) => {
                if flags.create_new {
                    return Err(ERROR_FILEEXISTS);
                }
                if flags.truncate && flags.write {
                    self.used -= data.len() as u64;
                    data.clear();
                    *modified = now();
                }
            }
            None => {
                if !flags.will_create() {
                    return Err(ERROR_FILENOTFOUND);
                }
                if !self.parent_is_dir(&key) {
                    return Err(ERROR_FILENOTFOUND);
                }
                let t = now();
                self.nodes.insert(
                    key.clone(),
                    Node::File {
                        data: Vec::new(),
                        created: t,
                        accessed: t,
                        modified: t,
                    },
                );
            }
        }

        self.next_object += 1;
        let id = ObjectId(self.next_object);
        self.objects.insert(id, key);
        Ok(id)
    }

    fn query(&self, object: ObjectId) -> Result<ObjectInfo, i32> {
        let path = self.path_of(object).ok_or(ERROR_BADRESOURCE)?;
        match self.nodes.get(path) {
            Some(Node::File {
                data,
                created,
                accessed,
                modified,
            }) => Ok(ObjectInfo {
                file_type: FileType::File,
                size: data.len() as u64,
                creation_time: *created,
                last_access_time: *accessed,
                last_modified_time: *modified,
            }),
            Some(Node::Directory { created }) => Ok(ObjectInfo {
                file_type: FileType::Directory,
                size: 0,
                creation_time: *created,
                last_access_time: *created,
                last_modified_time: *created,
            }),
            // Deleted underneath an open handle
            None => Err(ERROR_FILENOTFOUND),
        }
    }

    fn read(&mut self, object: ObjectId, offset: u64, len: usize) -> Result<Bytes, i32> {
        let path = self.path_of(object).ok_or(ERROR_BADRESOURCE)?.to_string();
        match self.nodes.get_mut(&path) {
            Some(Node::File { data, accessed, .. }) => {
                *accessed = now();
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(Bytes::copy_from_slice(&data[start..end]))
            }
            _ => Err(ERROR_FAILED),
        }
    }

    fn write(&mut self, object: ObjectId, offset: u64, payload: &[u8]) -> Result<usize, i32> {
        let path = self.path_of(object).ok_or(ERROR_BADRESOURCE)?.to_string();
        let quota = self.quota;
        let used = self.used;
        match self.nodes.get_mut(&path) {
            Some(Node::File { data, modified, .. }) => {
                let start = offset as usize;
                let end = start + payload.len();
                let growth = end.saturating_sub(data.len()) as u64;
                if used + growth > quota {
                    return Err(ERROR_NOQUOTA);
                }
                if end > data.len() {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(payload);
                *modified = now();
                self.used += growth;
                Ok(payload.len())
            }
            _ => Err(ERROR_FAILED),
        }
    }

    fn make_directory(&mut self, path: &str) -> Result<(), i32> {
        let key = key(path);
        if self.nodes.contains_key(&key) {
            return Err(ERROR_FILEEXISTS);
        }
        if !self.parent_is_dir(&key) {
            return Err(ERROR_FILENOTFOUND);
        }
        self.nodes
            .insert(key, Node::Directory { created: now() });
        Ok(())
    }

    fn children(&self, path: &str) -> Result<Vec<DirEntry>, i32> {
        let key = key(path);
        match self.nodes.get(&key) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => return Err(ERROR_FAILED),
            None => return Err(ERROR_FILENOTFOUND),
        }
        let mut entries: Vec<DirEntry> = self
            .nodes
            .iter()
            .filter(|(k, _)| parent_of(k) == Some(key.as_str()))
            .map(|(k, node)| {
                let file_type = match node {
                    Node::File { .. } => FileType::File,
                    Node::Directory { .. } => FileType::Directory,
                };
                DirEntry::new(name_of(k), file_type)
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl MemoryStore {
    /// Create an empty store containing only the root directory
    pub fn new() -> Self {
        let mut nodes = AHashMap::new();
        nodes.insert("/".to_string(), Node::Directory { created: now() });
        Self {
            inner: Mutex::new(Inner {
                opened: false,
                quota: 0,
                used: 0,
                nodes,
                objects: AHashMap::new(),
                next_object: 0,
            }),
        }
    }

    /// Whether `open_store` has completed at least once
    pub fn is_open(&self) -> bool {
        self.inner.lock().opened
    }

    /// Bytes currently charged against the quota
    pub fn usage(&self) -> u64 {
        self.inner.lock().used
    }

    /// Number of objects currently open
    pub fn open_objects(&self) -> usize {
        self.inner.lock().objects.len()
    }

    /// Kind of the node at `path`, if any
    pub fn kind_of(&self, path: &str) -> Option<FileType> {
        self.inner.lock().nodes.get(&key(path)).map(|node| match node {
            Node::File { .. } => FileType::File,
            Node::Directory { .. } => FileType::Directory,
        })
    }

    /// Sorted children of a directory
    pub fn children(&self, path: &str) -> Option<Vec<DirEntry>> {
        self.inner.lock().children(path).ok()
    }

    /// Contents of a file
    pub fn contents(&self, path: &str) -> Option<Bytes> {
        match self.inner.lock().nodes.get(&key(path)) {
            Some(Node::File { data, .. }) => Some(Bytes::copy_from_slice(data)),
            _ => None,
        }
    }

    /// Complete a leg whose output carries nothing
    fn settle(done: Completion, result: Result<(), i32>) {
        match result {
            Ok(()) => done.complete(OK, LegOutput::None),
            Err(code) => done.complete(code, LegOutput::None),
        }
    }
}

impl StoreBackend for MemoryStore {
    fn open_store(&self, quota: u64, done: Completion) -> Result<(), i32> {
        let mut inner = self.inner.lock();
        inner.opened = true;
        inner.quota = quota;
        debug!(quota = quota, "Memory store opened");
        drop(inner);
        done.complete(OK, LegOutput::None);
        Ok(())
    }

    fn open_object(&self, path: &str, flags: OpenFlags, done: Completion) -> Result<(), i32> {
        let mut inner = self.inner.lock();
        if !inner.opened {
            drop(inner);
            done.complete(ERROR_BADRESOURCE, LegOutput::None);
            return Ok(());
        }
        let result = inner.open_object(path, flags);
        drop(inner);
        trace!(path = path, result = ?result, "open_object");
        match result {
            Ok(object) => done.complete(OK, LegOutput::Object(object)),
            Err(code) => done.complete(code, LegOutput::None),
        }
        Ok(())
    }

    fn query(&self, object: ObjectId, done: Completion) -> Result<(), i32> {
        let result = self.inner.lock().query(object);
        match result {
            Ok(info) => done.complete(OK, LegOutput::Info(info)),
            Err(code) => done.complete(code, LegOutput::None),
        }
        Ok(())
    }

    fn read(
        &self,
        object: ObjectId,
        offset: u64,
        len: usize,
        done: Completion,
    ) -> Result<(), i32> {
        let result = self.inner.lock().read(object, offset, len);
        match result {
            Ok(bytes) => done.complete(bytes.len() as i32, LegOutput::Bytes(bytes)),
            Err(code) => done.complete(code, LegOutput::None),
        }
        Ok(())
    }

    fn write(
        &self,
        object: ObjectId,
        offset: u64,
        data: Bytes,
        done: Completion,
    ) -> Result<(), i32> {
        let result = self.inner.lock().write(object, offset, &data);
        match result {
            Ok(written) => done.complete(written as i32, LegOutput::None),
            Err(code) => done.complete(code, LegOutput::None),
        }
        Ok(())
    }

    fn make_directory(&self, path: &str, done: Completion) -> Result<(), i32> {
        let mut inner = self.inner.lock();
        let result = if inner.opened {
            inner.make_directory(path)
        } else {
            Err(ERROR_BADRESOURCE)
        };
        drop(inner);
        Self::settle(done, result);
        Ok(())
    }

    fn list_directory(&self, path: &str, done: Completion) -> Result<(), i32> {
        let inner = self.inner.lock();
        let result = if inner.opened {
            inner.children(path)
        } else {
            Err(ERROR_BADRESOURCE)
        };
        drop(inner);
        match result {
            Ok(entries) => done.complete(OK, LegOutput::Entries(entries)),
            Err(code) => done.complete(code, LegOutput::None),
        }
        Ok(())
    }

    fn close(&self, object: ObjectId) {
        if self.inner.lock().objects.remove(&object).is_none() {
            debug!(object = %object, "Close of unknown object ignored");
        }
    }
}
