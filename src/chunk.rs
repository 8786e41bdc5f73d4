use bitflags::bitflags;

use crate::hash::HashVal;

/// Line numbers are 16-bit by default so the consolidated chunk array stays
/// compact on multi-million-line corpora. The `large-files` feature widens
/// them to 32 bits (and widens the wire fields to match).
#[cfg(feature = "large-files")]
pub type LineNum = u32;
#[cfg(not(feature = "large-files"))]
pub type LineNum = u16;

/// Largest representable line number. Files are truncated one line short of
/// this; the value itself is reserved as the wire-format sentinel.
pub const MAX_LINE: LineNum = LineNum::MAX;

bitflags! {
    /// Per-chunk flag byte, stored verbatim in catalogues.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChunkFlags: u8 {
        /// Every feature in the chunk is language boilerplate.
        const INSIGNIFICANT = 0x01;
        const C_CODE = 0x02;
        const SHELL_CODE = 0x04;
        /// Engine-private: marks unique singletons for compaction. Never
        /// valid in a catalogue.
        const INTERNAL = 0x08;
    }
}

impl ChunkFlags {
    /// Language-classified chunks. An uncategorized chunk (neither bit set)
    /// is exempt from significance filtering.
    pub const CATEGORIZED: ChunkFlags = ChunkFlags::C_CODE.union(ChunkFlags::SHELL_CODE);
}

/// One sliding-window position: the inclusive line range it covers and the
/// content hash of its normalized features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: LineNum,
    pub end: LineNum,
    pub hash: HashVal,
    pub flags: ChunkFlags,
}

/// Index into the [`FileRegistry`]. Chunks carry this instead of a pointer;
/// headers outlive every chunk that references them.
pub type FileId = u32;

/// A chunk plus its owning file. The global match array is built of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortedChunk {
    pub start: LineNum,
    pub end: LineNum,
    pub hash: HashVal,
    pub flags: ChunkFlags,
    pub file: FileId,
}

impl SortedChunk {
    pub fn new(chunk: Chunk, file: FileId) -> Self {
        Self {
            start: chunk.start,
            end: chunk.end,
            hash: chunk.hash,
            flags: chunk.flags,
            file,
        }
    }
}

/// Registered source file: tree-relative path, physical line count (set once
/// scanning completes), and the tree it came from.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub path: String,
    pub length: LineNum,
    pub tree: String,
}

/// Append-only store of file headers, addressed by stable [`FileId`].
#[derive(Debug, Default)]
pub struct FileRegistry {
    headers: Vec<FileHeader>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: String, tree: String) -> FileId {
        let id = self.headers.len() as FileId;
        self.headers.push(FileHeader {
            path,
            length: 0,
            tree,
        });
        id
    }

    pub fn set_length(&mut self, id: FileId, length: LineNum) {
        self.headers[id as usize].length = length;
    }

    pub fn get(&self, id: FileId) -> &FileHeader {
        &self.headers[id as usize]
    }

    pub fn path(&self, id: FileId) -> &str {
        &self.headers[id as usize].path
    }

    pub fn tree(&self, id: FileId) -> &str {
        &self.headers[id as usize].tree
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileHeader> {
        self.headers.iter()
    }

    /// Physical lines across every file registered under `tree`.
    pub fn total_lines(&self, tree: &str) -> u64 {
        self.headers
            .iter()
            .filter(|h| h.tree == tree)
            .map(|h| u64::from(h.length))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorized_is_the_union_of_both_language_bits() {
        assert!(ChunkFlags::CATEGORIZED.contains(ChunkFlags::C_CODE));
        assert!(ChunkFlags::CATEGORIZED.contains(ChunkFlags::SHELL_CODE));
        assert!(!ChunkFlags::CATEGORIZED.contains(ChunkFlags::INSIGNIFICANT));
    }

    #[test]
    fn registry_ids_are_stable_and_lengths_update_in_place() {
        let mut reg = FileRegistry::new();
        let a = reg.add("linux/a.c".into(), "linux".into());
        let b = reg.add("bsd/a.c".into(), "bsd".into());
        reg.set_length(a, 120);
        reg.set_length(b, 80);

        assert_eq!(reg.path(a), "linux/a.c");
        assert_eq!(reg.tree(b), "bsd");
        assert_eq!(reg.get(a).length, 120);
        assert_eq!(reg.total_lines("linux"), 120);
        assert_eq!(reg.total_lines("bsd"), 80);
    }
}
