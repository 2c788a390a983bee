//! Directory entries.
//!
//! A directory's content is a densely packed sequence of fixed-size records,
//! each holding a NUL-padded filename and the inode id of the child. The
//! names `.` and `..` are never stored; they are interpreted by the path
//! resolver.

use crate::superblock::MAX_FILENAME;

/// The size of an encoded directory entry in bytes.
pub const ENTRY_SIZE: usize = MAX_FILENAME + 4;

/// A single directory entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntry {
    /// The name of the child. At most [`MAX_FILENAME`]` - 1` bytes; longer
    /// names are truncated on insertion.
    pub name: String,
    /// The inode id of the child.
    pub inode: u32,
}

impl DirEntry {
    /// Creates an entry, truncating `name` to the on-disk capacity.
    pub fn new(name: &str, inode: u32) -> Self {
        let mut end = name.len().min(MAX_FILENAME - 1);
        // Do not cut through a multi-byte character
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            name: name[..end].to_owned(),
            inode,
        }
    }

    /// Serializes the entry.
    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0; ENTRY_SIZE];
        let name = self.name.as_bytes();
        buf[..name.len()].copy_from_slice(name);
        buf[MAX_FILENAME..].copy_from_slice(&self.inode.to_le_bytes());
        buf
    }

    /// Deserializes one entry record.
    pub fn decode(buf: &[u8; ENTRY_SIZE]) -> Self {
        let len = buf[..MAX_FILENAME]
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(MAX_FILENAME);
        Self {
            name: String::from_utf8_lossy(&buf[..len]).into_owned(),
            inode: u32::from_le_bytes(buf[MAX_FILENAME..].try_into().unwrap()),
        }
    }
}

/// Decodes the whole entry sequence of a directory's content.
pub fn decode_all(data: &[u8]) -> Vec<DirEntry> {
    data.chunks_exact(ENTRY_SIZE)
        .map(|chunk| DirEntry::decode(chunk.try_into().unwrap()))
        .collect()
}

/// Serializes an entry sequence back into directory content.
pub fn encode_all(entries: &[DirEntry]) -> Vec<u8> {
    let mut data = Vec::with_capacity(entries.len() * ENTRY_SIZE);
    for entry in entries {
        data.extend_from_slice(&entry.encode());
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let entries = vec![
            DirEntry::new("readme.txt", 4),
            DirEntry::new("a", 1023),
            DirEntry::new("", 0),
        ];
        let data = encode_all(&entries);
        assert_eq!(data.len(), 3 * ENTRY_SIZE);
        assert_eq!(decode_all(&data), entries);
    }

    #[test]
    fn long_name_truncated() {
        let name = "x".repeat(100);
        let entry = DirEntry::new(&name, 1);
        assert_eq!(entry.name.len(), MAX_FILENAME - 1);
        let decoded = DirEntry::decode(&entry.encode());
        assert_eq!(decoded.name, entry.name);
    }

    #[test]
    fn exact_capacity_name() {
        let name = "y".repeat(MAX_FILENAME - 1);
        let decoded = DirEntry::decode(&DirEntry::new(&name, 9).encode());
        assert_eq!(decoded.name, name);
        assert_eq!(decoded.inode, 9);
    }
}
