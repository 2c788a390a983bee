/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Inodes are the fixed-size metadata records of the volume.
//!
//! An inode holds the file's type, size, owner, permission bits, timestamps
//! and direct block pointers. The name of the file is not part of the inode:
//! it lives in the directory entry pointing to it.
//!
//! On-disk layout of a record (little-endian, 128 bytes):
//!
//! | offset | size | field             |
//! |--------|------|-------------------|
//! | 0      | 4    | id                |
//! | 4      | 1    | file type         |
//! | 5      | 1    | writer flag       |
//! | 6      | 2    | mode              |
//! | 8      | 2    | owner uid         |
//! | 12     | 4    | file size         |
//! | 16     | 4    | blocks count      |
//! | 20     | 40   | direct pointers   |
//! | 60     | 4    | indirect, unused  |
//! | 64     | 8    | create time       |
//! | 72     | 8    | modify time       |
//! | 80     | 48   | zero padding      |

use crate::device::BlockDevice;
use crate::error::Result;
use crate::superblock::{BLOCK_SIZE, DIRECT_BLOCKS, INODE_SIZE, INODE_TABLE_BLOCK, MAX_INODES};
use crate::timestamp;
use crate::user::Session;
use std::io;

/// The inode id of the root directory.
pub const ROOT_INODE: u32 = 0;

/// Permission bit: read.
pub const PERM_READ: u8 = 4;
/// Permission bit: write.
pub const PERM_WRITE: u8 = 2;
/// Permission bit: execute/traverse.
pub const PERM_EXEC: u8 = 1;

/// The type of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    Regular,
    Directory,
}

impl From<u8> for FileType {
    fn from(b: u8) -> Self {
        match b {
            1 => Self::Directory,
            _ => Self::Regular,
        }
    }
}

impl FileType {
    fn as_byte(self) -> u8 {
        match self {
            Self::Regular => 0,
            Self::Directory => 1,
        }
    }
}

/// The advisory writer flag stored in the inode, serializing writers across
/// processes sharing the backing file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteState {
    /// No writer holds the file.
    Available,
    /// A write is in progress.
    Writing,
}

impl From<u8> for WriteState {
    fn from(b: u8) -> Self {
        match b {
            1 => Self::Writing,
            _ => Self::Available,
        }
    }
}

impl WriteState {
    fn as_byte(self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Writing => 1,
        }
    }
}

/// A fixed-size inode record.
#[derive(Clone, Debug)]
pub struct Inode {
    pub id: u32,
    pub file_type: FileType,
    /// The cross-process advisory writer flag.
    pub state: WriteState,
    /// Permission bits. The nine low bits are rwx triples for owner, group
    /// and other; the upper bits are reserved.
    pub mode: u16,
    /// The uid of the owning user.
    pub owner: u16,
    /// The size of the file content in bytes.
    pub file_size: u32,
    /// The number of allocated data blocks.
    pub blocks_count: u32,
    /// Absolute block indices of the file content. `0` means the slot is
    /// unused.
    pub direct: [u32; DIRECT_BLOCKS],
    /// Reserved indirect block pointer, always `0`.
    pub indirect: u32,
    /// Creation timestamp, in seconds since the Unix epoch.
    pub create_time: u64,
    /// Last content modification timestamp.
    pub modify_time: u64,
}

impl Inode {
    /// Creates a fresh inode with no content, timestamped now.
    pub fn new(id: u32, file_type: FileType, mode: u16, owner: u16) -> Self {
        let now = timestamp().as_secs();
        Self {
            id,
            file_type,
            state: WriteState::Available,
            mode: mode & 0o777,
            owner,
            file_size: 0,
            blocks_count: 0,
            direct: [0; DIRECT_BLOCKS],
            indirect: 0,
            create_time: now,
            modify_time: now,
        }
    }

    /// Serializes the inode into a zero-padded record.
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0; INODE_SIZE];
        buf[0..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4] = self.file_type.as_byte();
        buf[5] = self.state.as_byte();
        buf[6..8].copy_from_slice(&self.mode.to_le_bytes());
        buf[8..10].copy_from_slice(&self.owner.to_le_bytes());
        buf[12..16].copy_from_slice(&self.file_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.blocks_count.to_le_bytes());
        for (i, ptr) in self.direct.iter().enumerate() {
            let off = 20 + i * 4;
            buf[off..off + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        buf[60..64].copy_from_slice(&self.indirect.to_le_bytes());
        buf[64..72].copy_from_slice(&self.create_time.to_le_bytes());
        buf[72..80].copy_from_slice(&self.modify_time.to_le_bytes());
        buf
    }

    /// Deserializes an inode record.
    pub fn decode(buf: &[u8; INODE_SIZE]) -> Self {
        let read_u32 =
            |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        let read_u64 =
            |off: usize| u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        let mut direct = [0; DIRECT_BLOCKS];
        for (i, ptr) in direct.iter_mut().enumerate() {
            *ptr = read_u32(20 + i * 4);
        }
        Self {
            id: read_u32(0),
            file_type: FileType::from(buf[4]),
            state: WriteState::from(buf[5]),
            mode: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            owner: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            file_size: read_u32(12),
            blocks_count: read_u32(16),
            direct,
            indirect: read_u32(60),
            create_time: read_u64(64),
            modify_time: read_u64(72),
        }
    }

    /// Tells whether `session` is granted every permission bit of `required`
    /// on this inode.
    ///
    /// Root is allowed unconditionally. The owner is checked against the
    /// owner triple, anyone else against the "other" triple. The group triple
    /// exists in the mode encoding but no group identity does, so it is never
    /// consulted.
    pub fn allows(&self, session: &Session, required: u8) -> bool {
        if session.root {
            return true;
        }
        let triple = if self.owner == session.uid {
            (self.mode >> 6) & 7
        } else {
            self.mode & 7
        } as u8;
        triple & required == required
    }
}

/// Renders a mode as the classical `drwxr-xr-x` string.
pub fn mode_string(file_type: FileType, mode: u16) -> String {
    let mut s = String::with_capacity(10);
    s.push(match file_type {
        FileType::Directory => 'd',
        FileType::Regular => '-',
    });
    for shift in [6, 3, 0] {
        let triple = (mode >> shift) & 7;
        s.push(if triple & 4 != 0 { 'r' } else { '-' });
        s.push(if triple & 2 != 0 { 'w' } else { '-' });
        s.push(if triple & 1 != 0 { 'x' } else { '-' });
    }
    s
}

fn table_position(id: u32) -> Result<(u32, usize)> {
    if id as usize >= MAX_INODES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("inode id {id} out of range"),
        )
        .into());
    }
    let byte_off = id as usize * INODE_SIZE;
    let block = INODE_TABLE_BLOCK + (byte_off / BLOCK_SIZE) as u32;
    Ok((block, byte_off % BLOCK_SIZE))
}

/// Reads inode `id` from the inode table.
pub fn read_inode(dev: &mut BlockDevice, id: u32) -> Result<Inode> {
    let (block, off) = table_position(id)?;
    let mut buf = [0; BLOCK_SIZE];
    dev.read_block(block, &mut buf)?;
    let mut record = [0; INODE_SIZE];
    record.copy_from_slice(&buf[off..off + INODE_SIZE]);
    Ok(Inode::decode(&record))
}

/// Writes `inode` to the inode table.
///
/// The containing block is read back first so neighboring records are
/// preserved.
pub fn write_inode(dev: &mut BlockDevice, inode: &Inode) -> Result<()> {
    let (block, off) = table_position(inode.id)?;
    let mut buf = [0; BLOCK_SIZE];
    dev.read_block(block, &mut buf)?;
    buf[off..off + INODE_SIZE].copy_from_slice(&inode.encode());
    dev.write_block(block, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsError;
    use std::env;
    use std::fs;

    #[test]
    fn roundtrip() {
        let mut inode = Inode::new(7, FileType::Regular, 0o644, 2);
        inode.file_size = 5000;
        inode.blocks_count = 2;
        inode.direct[0] = 35;
        inode.direct[1] = 36;
        inode.state = WriteState::Writing;
        let decoded = Inode::decode(&inode.encode());
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.file_type, FileType::Regular);
        assert_eq!(decoded.state, WriteState::Writing);
        assert_eq!(decoded.mode, 0o644);
        assert_eq!(decoded.owner, 2);
        assert_eq!(decoded.file_size, 5000);
        assert_eq!(decoded.blocks_count, 2);
        assert_eq!(decoded.direct, inode.direct);
        assert_eq!(decoded.indirect, 0);
        assert_eq!(decoded.create_time, inode.create_time);
    }

    #[test]
    fn permission_matrix() {
        let inode = Inode::new(1, FileType::Regular, 0o640, 1);
        let owner = Session {
            uid: 1,
            username: "user1".into(),
            root: false,
        };
        let other = Session {
            uid: 2,
            username: "user2".into(),
            root: false,
        };
        let root = Session {
            uid: 0,
            username: "root".into(),
            root: true,
        };
        assert!(inode.allows(&owner, PERM_READ));
        assert!(inode.allows(&owner, PERM_READ | PERM_WRITE));
        assert!(!inode.allows(&owner, PERM_EXEC));
        assert!(!inode.allows(&other, PERM_READ));
        assert!(root.root && inode.allows(&root, PERM_READ | PERM_WRITE | PERM_EXEC));
    }

    #[test]
    fn permission_monotone() {
        // Adding a mode bit never revokes access
        let session = Session {
            uid: 5,
            username: "u".into(),
            root: false,
        };
        for mode in 0..0o777u16 {
            let inode = Inode::new(1, FileType::Regular, mode, 5);
            for bit in [PERM_READ, PERM_WRITE, PERM_EXEC] {
                if inode.allows(&session, bit) {
                    let wider = Inode::new(1, FileType::Regular, mode | 0o100, 5);
                    assert!(wider.allows(&session, bit));
                }
            }
        }
    }

    #[test]
    fn mode_rendering() {
        assert_eq!(mode_string(FileType::Directory, 0o755), "drwxr-xr-x");
        assert_eq!(mode_string(FileType::Regular, 0o644), "-rw-r--r--");
        assert_eq!(mode_string(FileType::Regular, 0o000), "----------");
    }

    #[test]
    fn table_io() {
        let path = env::temp_dir().join(format!("mufs-inode-table-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        let mut dev = BlockDevice::open(&path).unwrap();

        // Two records sharing a block
        let a = Inode::new(0, FileType::Directory, 0o755, 0);
        let b = Inode::new(1, FileType::Regular, 0o644, 1);
        write_inode(&mut dev, &a).unwrap();
        write_inode(&mut dev, &b).unwrap();
        assert_eq!(read_inode(&mut dev, 0).unwrap().file_type, FileType::Directory);
        assert_eq!(read_inode(&mut dev, 1).unwrap().owner, 1);

        // A record on the last table block
        let last = Inode::new(MAX_INODES as u32 - 1, FileType::Regular, 0o600, 3);
        write_inode(&mut dev, &last).unwrap();
        assert_eq!(read_inode(&mut dev, last.id).unwrap().mode, 0o600);

        assert!(matches!(
            read_inode(&mut dev, MAX_INODES as u32),
            Err(FsError::Io(_))
        ));
        let _ = fs::remove_file(&path);
    }
}
