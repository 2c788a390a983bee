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

//! The superblock is the header of the volume: it identifies the filesystem
//! and locates every other on-disk region.
//!
//! All multi-byte fields are stored in little-endian, independent of the host.

use crate::error::{FsError, Result};
use uuid::Uuid;

/// The size of the volume in bytes.
pub const DISK_SIZE: usize = 10 * 1024 * 1024;
/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 4096;
/// The total number of blocks on the volume.
pub const MAX_BLOCKS: usize = DISK_SIZE / BLOCK_SIZE;
/// The size of an inode record in bytes.
pub const INODE_SIZE: usize = 128;
/// The total number of inodes on the volume.
pub const MAX_INODES: usize = 1024;
/// The size of the filename field of a directory entry, including the
/// terminating NUL byte.
pub const MAX_FILENAME: usize = 28;
/// The number of direct block pointers in an inode.
pub const DIRECT_BLOCKS: usize = 10;
/// The maximum size of a file in bytes. Files are capped at direct-block
/// capacity.
pub const MAX_FILE_SIZE: usize = DIRECT_BLOCKS * BLOCK_SIZE;
/// The filesystem's signature.
pub const MAGIC: u32 = 0x12345678;

/// The block storing the inode bitmap.
pub const INODE_BITMAP_BLOCK: u32 = 1;
/// The block storing the data block bitmap.
pub const DATA_BITMAP_BLOCK: u32 = 2;
/// The first block of the inode table.
pub const INODE_TABLE_BLOCK: u32 = 3;
/// The number of blocks occupied by the inode table.
pub const INODE_TABLE_BLOCKS: u32 = ((MAX_INODES * INODE_SIZE + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32;
/// The first block of the data region.
pub const DATA_BLOCK_START: u32 = INODE_TABLE_BLOCK + INODE_TABLE_BLOCKS;

/// The volume's superblock, stored in block 0.
#[derive(Clone, Debug)]
pub struct Superblock {
    /// The filesystem's signature.
    pub magic: u32,
    /// The size of the volume in bytes.
    pub disk_size: u32,
    /// The size of a block in bytes.
    pub block_size: u32,
    /// The total number of blocks.
    pub total_blocks: u32,
    /// The total number of inodes.
    pub total_inodes: u32,
    /// The number of allocatable data blocks left. This counter is
    /// informational only.
    pub free_blocks: u32,
    /// The number of free inodes.
    pub free_inodes: u32,
    /// The block storing the inode bitmap.
    pub inode_bitmap_block: u32,
    /// The block storing the data block bitmap.
    pub data_bitmap_block: u32,
    /// The first block of the inode table.
    pub inode_table_block: u32,
    /// The first block of the data region.
    pub data_block_start: u32,
    /// The volume's unique identifier, generated at format time.
    pub volume_id: Uuid,
}

impl Superblock {
    /// Creates the superblock of a freshly formatted volume.
    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            disk_size: DISK_SIZE as u32,
            block_size: BLOCK_SIZE as u32,
            total_blocks: MAX_BLOCKS as u32,
            total_inodes: MAX_INODES as u32,
            // Approximate: the metadata footprint is not accounted exactly
            free_blocks: (MAX_BLOCKS - 10) as u32,
            free_inodes: MAX_INODES as u32,
            inode_bitmap_block: INODE_BITMAP_BLOCK,
            data_bitmap_block: DATA_BITMAP_BLOCK,
            inode_table_block: INODE_TABLE_BLOCK,
            data_block_start: DATA_BLOCK_START,
            volume_id: Uuid::new_v4(),
        }
    }

    /// Serializes the superblock into a zero-padded block.
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0; BLOCK_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.disk_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[16..20].copy_from_slice(&self.total_inodes.to_le_bytes());
        buf[20..24].copy_from_slice(&self.free_blocks.to_le_bytes());
        buf[24..28].copy_from_slice(&self.free_inodes.to_le_bytes());
        buf[28..32].copy_from_slice(&self.inode_bitmap_block.to_le_bytes());
        buf[32..36].copy_from_slice(&self.data_bitmap_block.to_le_bytes());
        buf[36..40].copy_from_slice(&self.inode_table_block.to_le_bytes());
        buf[40..44].copy_from_slice(&self.data_block_start.to_le_bytes());
        buf[44..60].copy_from_slice(self.volume_id.as_bytes());
        buf
    }

    /// Deserializes the superblock from block 0, checking the signature.
    pub fn decode(buf: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let read_u32 =
            |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        let magic = read_u32(0);
        if magic != MAGIC {
            return Err(FsError::InvalidFs);
        }
        let mut volume_id = [0; 16];
        volume_id.copy_from_slice(&buf[44..60]);
        Ok(Self {
            magic,
            disk_size: read_u32(4),
            block_size: read_u32(8),
            total_blocks: read_u32(12),
            total_inodes: read_u32(16),
            free_blocks: read_u32(20),
            free_inodes: read_u32(24),
            inode_bitmap_block: read_u32(28),
            data_bitmap_block: read_u32(32),
            inode_table_block: read_u32(36),
            data_block_start: read_u32(40),
            volume_id: Uuid::from_bytes(volume_id),
        })
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}
