/*!
 * Directory Cursor
 * Lazily filled entry list plus a read offset
 */

use crate::vfs::types::DirEntry;

#[derive(Debug, Clone, Default)]
pub struct DirCursor {
    entries: Option<Vec<DirEntry>>,
    offset: usize,
}

impl DirCursor {
    /// Cursor that fetches on first read
    pub fn lazy() -> Self {
        Self::default()
    }

    /// Cursor over entries already fetched
    pub fn filled(entries: Vec<DirEntry>) -> Self {
        Self {
            entries: Some(entries),
            offset: 0,
        }
    }

    #[inline]
    pub fn needs_fetch(&self) -> bool {
        self.entries.is_none()
    }

    pub fn fill(&mut self, entries: Vec<DirEntry>) {
        self.entries = Some(entries);
        self.offset = 0;
    }

    /// Next entry, `None` at the end (or before any fetch)
    pub fn next_entry(&mut self) -> Option<DirEntry> {
        let entry = self.entries.as_ref()?.get(self.offset).cloned()?;
        self.offset += 1;
        Some(entry)
    }

    /// Back to the first entry; an unfetched cursor fetches on the next read
    pub fn rewind(&mut self) {
        self.offset = 0;
    }
}
