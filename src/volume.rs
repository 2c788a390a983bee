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

//! A mounted volume: the superblock and both allocation bitmaps, with the
//! allocation, file content and directory protocols built on top of them.
//!
//! Every mutation of the bitmaps or the superblock is written through to the
//! device immediately, so the on-disk state matches the in-memory state
//! outside the critical section of a single operation.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::dirent;
use crate::dirent::DirEntry;
use crate::error::{FsError, Result};
use crate::inode::{read_inode, write_inode, FileType, Inode, ROOT_INODE};
use crate::superblock::{
    Superblock, BLOCK_SIZE, DATA_BITMAP_BLOCK, DATA_BLOCK_START, DIRECT_BLOCKS,
    INODE_BITMAP_BLOCK, MAX_BLOCKS, MAX_FILE_SIZE, MAX_INODES,
};
use crate::timestamp;

/// The in-memory state of a mounted volume.
pub struct Volume {
    pub superblock: Superblock,
    inode_bitmap: Bitmap,
    data_bitmap: Bitmap,
}

impl Volume {
    /// Formats the device: zeroes it entirely, then writes a fresh
    /// superblock, empty bitmaps and the root directory inode.
    pub fn format(dev: &mut BlockDevice) -> Result<()> {
        dev.wipe()?;
        let mut superblock = Superblock::new();
        let mut inode_bitmap = Bitmap::new(MAX_INODES);
        let data_bitmap = Bitmap::new(MAX_BLOCKS);

        let root = Inode::new(ROOT_INODE, FileType::Directory, 0o755, 0);
        write_inode(dev, &root)?;
        inode_bitmap.set(ROOT_INODE as usize);
        superblock.free_inodes -= 1;

        dev.write_block(INODE_BITMAP_BLOCK, &inode_bitmap.encode())?;
        dev.write_block(DATA_BITMAP_BLOCK, &data_bitmap.encode())?;
        dev.write_block(0, &superblock.encode())?;
        Ok(())
    }

    /// Loads the volume from the device, verifying the superblock signature.
    pub fn mount(dev: &mut BlockDevice) -> Result<Self> {
        let mut buf = [0; BLOCK_SIZE];
        dev.read_block(0, &mut buf)?;
        let superblock = Superblock::decode(&buf)?;
        dev.read_block(INODE_BITMAP_BLOCK, &mut buf)?;
        let inode_bitmap = Bitmap::decode(&buf, MAX_INODES);
        dev.read_block(DATA_BITMAP_BLOCK, &mut buf)?;
        let data_bitmap = Bitmap::decode(&buf, MAX_BLOCKS);
        Ok(Self {
            superblock,
            inode_bitmap,
            data_bitmap,
        })
    }

    /// Writes both bitmaps and the superblock through to the device.
    fn sync_maps(&mut self, dev: &mut BlockDevice) -> Result<()> {
        dev.write_block(INODE_BITMAP_BLOCK, &self.inode_bitmap.encode())?;
        dev.write_block(DATA_BITMAP_BLOCK, &self.data_bitmap.encode())?;
        dev.write_block(0, &self.superblock.encode())
    }

    /// Allocates the lowest free inode id.
    pub fn alloc_inode(&mut self, dev: &mut BlockDevice) -> Result<u32> {
        let id = self.inode_bitmap.first_clear(0).ok_or(FsError::OutOfSpace)?;
        self.inode_bitmap.set(id);
        self.superblock.free_inodes -= 1;
        self.sync_maps(dev)?;
        Ok(id as u32)
    }

    /// Frees an inode id. A no-op if the id is already free.
    pub fn free_inode(&mut self, dev: &mut BlockDevice, id: u32) -> Result<()> {
        if !self.inode_bitmap.is_set(id as usize) {
            return Ok(());
        }
        self.inode_bitmap.clear(id as usize);
        self.superblock.free_inodes += 1;
        self.sync_maps(dev)
    }

    /// Tells whether inode `id` is allocated.
    pub fn inode_allocated(&self, id: u32) -> bool {
        self.inode_bitmap.is_set(id as usize)
    }

    /// The number of inodes currently allocated.
    pub fn live_inodes(&self) -> usize {
        self.inode_bitmap.count_set()
    }

    /// Allocates the lowest free data block, scanning from the start of the
    /// data region.
    pub fn alloc_block(&mut self, dev: &mut BlockDevice) -> Result<u32> {
        let id = self
            .data_bitmap
            .first_clear(DATA_BLOCK_START as usize)
            .ok_or(FsError::OutOfSpace)?;
        self.data_bitmap.set(id);
        self.superblock.free_blocks = self.superblock.free_blocks.saturating_sub(1);
        self.sync_maps(dev)?;
        Ok(id as u32)
    }

    /// Frees a data block. A no-op if the block is already free.
    pub fn free_block(&mut self, dev: &mut BlockDevice, id: u32) -> Result<()> {
        if !self.data_bitmap.is_set(id as usize) {
            return Ok(());
        }
        self.data_bitmap.clear(id as usize);
        self.superblock.free_blocks += 1;
        self.sync_maps(dev)
    }

    /// Tells whether data block `id` is allocated.
    pub fn block_allocated(&self, id: u32) -> bool {
        self.data_bitmap.is_set(id as usize)
    }

    /// Reads the whole content of `inode` by concatenating its direct
    /// blocks, stopping at the first unused slot.
    pub fn read_file_data(&self, dev: &mut BlockDevice, inode: &Inode) -> Result<Vec<u8>> {
        let mut remaining = inode.file_size as usize;
        let mut data = Vec::with_capacity(remaining);
        let mut buf = [0; BLOCK_SIZE];
        for ptr in inode.direct {
            if ptr == 0 || remaining == 0 {
                break;
            }
            dev.read_block(ptr, &mut buf)?;
            let take = remaining.min(BLOCK_SIZE);
            data.extend_from_slice(&buf[..take]);
            remaining -= take;
        }
        Ok(data)
    }

    /// Replaces the whole content of `inode` with `data`.
    ///
    /// All previously allocated blocks are freed first, then fresh blocks are
    /// allocated and written. If an allocation fails partway there is no
    /// rollback: the caller is expected to persist the inode truncated. The
    /// inode value is updated in place; persisting it is the caller's job.
    pub fn write_file_data(
        &mut self,
        dev: &mut BlockDevice,
        inode: &mut Inode,
        data: &[u8],
    ) -> Result<()> {
        if data.len() > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        let blocks_needed = data.len().div_ceil(BLOCK_SIZE);
        if blocks_needed > DIRECT_BLOCKS {
            return Err(FsError::TooLarge);
        }
        for i in 0..DIRECT_BLOCKS {
            if inode.direct[i] != 0 {
                let ptr = inode.direct[i];
                inode.direct[i] = 0;
                self.free_block(dev, ptr)?;
            }
        }
        let mut buf = [0; BLOCK_SIZE];
        for (i, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
            let block = self.alloc_block(dev)?;
            buf[..chunk.len()].copy_from_slice(chunk);
            // Zero the tail past the payload boundary
            buf[chunk.len()..].fill(0);
            dev.write_block(block, &buf)?;
            inode.direct[i] = block;
        }
        inode.file_size = data.len() as u32;
        inode.blocks_count = blocks_needed as u32;
        inode.modify_time = timestamp().as_secs();
        Ok(())
    }

    /// Returns the decoded entry sequence of directory `dir`.
    pub fn entries(&self, dev: &mut BlockDevice, dir: &Inode) -> Result<Vec<DirEntry>> {
        if dir.file_type != FileType::Directory {
            return Err(FsError::NotDirectory);
        }
        let data = self.read_file_data(dev, dir)?;
        Ok(dirent::decode_all(&data))
    }

    /// Appends an entry for `child` under `name` to directory `dir_id`,
    /// rejecting duplicate names. The directory inode is persisted.
    pub fn add_entry(
        &mut self,
        dev: &mut BlockDevice,
        dir_id: u32,
        name: &str,
        child: u32,
    ) -> Result<()> {
        let mut dir = read_inode(dev, dir_id)?;
        let mut entries = self.entries(dev, &dir)?;
        let entry = DirEntry::new(name, child);
        if entries.iter().any(|e| e.name == entry.name) {
            return Err(FsError::Exists);
        }
        entries.push(entry);
        self.write_file_data(dev, &mut dir, &dirent::encode_all(&entries))?;
        write_inode(dev, &dir)
    }

    /// Removes the entry named `name` from directory `dir_id`. When the last
    /// entry goes away the directory is shrunk to size 0 and its data blocks
    /// are freed. The directory inode is persisted.
    pub fn remove_entry(&mut self, dev: &mut BlockDevice, dir_id: u32, name: &str) -> Result<()> {
        let mut dir = read_inode(dev, dir_id)?;
        let mut entries = self.entries(dev, &dir)?;
        let pos = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(FsError::NotFound)?;
        entries.remove(pos);
        if entries.is_empty() {
            for i in 0..DIRECT_BLOCKS {
                if dir.direct[i] != 0 {
                    let ptr = dir.direct[i];
                    dir.direct[i] = 0;
                    self.free_block(dev, ptr)?;
                }
            }
            dir.file_size = 0;
            dir.blocks_count = 0;
            dir.modify_time = timestamp().as_secs();
        } else {
            self.write_file_data(dev, &mut dir, &dirent::encode_all(&entries))?;
        }
        write_inode(dev, &dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    fn temp_disk(name: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("mufs-volume-{name}-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    fn fresh(name: &str) -> (PathBuf, BlockDevice, Volume) {
        let path = temp_disk(name);
        let mut dev = BlockDevice::open(&path).unwrap();
        Volume::format(&mut dev).unwrap();
        let vol = Volume::mount(&mut dev).unwrap();
        (path, dev, vol)
    }

    #[test]
    fn format_then_mount() {
        let (path, mut dev, vol) = fresh("mount");
        assert_eq!(vol.live_inodes(), 1);
        assert!(vol.inode_allocated(ROOT_INODE));
        assert_eq!(vol.superblock.free_inodes as usize, MAX_INODES - 1);

        let root = read_inode(&mut dev, ROOT_INODE).unwrap();
        assert_eq!(root.file_type, FileType::Directory);
        assert_eq!(root.mode, 0o755);
        assert_eq!(root.owner, 0);
        assert_eq!(root.file_size, 0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn format_is_idempotent() {
        let (path, mut dev, _) = fresh("idem");
        Volume::format(&mut dev).unwrap();
        let vol = Volume::mount(&mut dev).unwrap();
        assert_eq!(vol.live_inodes(), 1);
        let root = read_inode(&mut dev, ROOT_INODE).unwrap();
        assert_eq!(vol.entries(&mut dev, &root).unwrap().len(), 0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn mount_unformatted_fails() {
        let path = temp_disk("raw");
        let mut dev = BlockDevice::open(&path).unwrap();
        assert!(matches!(Volume::mount(&mut dev), Err(FsError::InvalidFs)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn inode_alloc_free() {
        let (path, mut dev, mut vol) = fresh("ialloc");
        let a = vol.alloc_inode(&mut dev).unwrap();
        let b = vol.alloc_inode(&mut dev).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(vol.superblock.free_inodes as usize, MAX_INODES - 3);

        vol.free_inode(&mut dev, a).unwrap();
        // Freeing twice is a no-op
        vol.free_inode(&mut dev, a).unwrap();
        assert_eq!(vol.superblock.free_inodes as usize, MAX_INODES - 2);
        // The freed id is reused first
        assert_eq!(vol.alloc_inode(&mut dev).unwrap(), a);

        // The counter always matches the bitmap population
        assert_eq!(
            vol.superblock.free_inodes as usize,
            MAX_INODES - vol.live_inodes()
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn block_alloc_starts_at_data_region() {
        let (path, mut dev, mut vol) = fresh("balloc");
        let b = vol.alloc_block(&mut dev).unwrap();
        assert_eq!(b, DATA_BLOCK_START);
        assert!(vol.block_allocated(b));
        vol.free_block(&mut dev, b).unwrap();
        assert!(!vol.block_allocated(b));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn bitmaps_written_through() {
        let (path, mut dev, mut vol) = fresh("sync");
        vol.alloc_inode(&mut dev).unwrap();
        vol.alloc_block(&mut dev).unwrap();
        // A second mount sees the same state
        let vol2 = Volume::mount(&mut dev).unwrap();
        assert_eq!(vol2.live_inodes(), 2);
        assert!(vol2.block_allocated(DATA_BLOCK_START));
        assert_eq!(vol2.superblock.free_inodes, vol.superblock.free_inodes);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn file_data_roundtrip() {
        let (path, mut dev, mut vol) = fresh("data");
        let mut inode = Inode::new(1, FileType::Regular, 0o644, 0);
        let payload: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        vol.write_file_data(&mut dev, &mut inode, &payload).unwrap();
        assert_eq!(inode.file_size, 5000);
        assert_eq!(inode.blocks_count, 2);
        assert_ne!(inode.direct[0], 0);
        assert_ne!(inode.direct[1], 0);
        assert_eq!(inode.direct[2], 0);
        assert_eq!(vol.read_file_data(&mut dev, &inode).unwrap(), payload);

        // A rewrite replaces the content entirely
        vol.write_file_data(&mut dev, &mut inode, b"short").unwrap();
        assert_eq!(inode.blocks_count, 1);
        assert_eq!(inode.direct[1], 0);
        assert_eq!(vol.read_file_data(&mut dev, &inode).unwrap(), b"short");

        // Truncation to zero frees everything
        vol.write_file_data(&mut dev, &mut inode, b"").unwrap();
        assert_eq!(inode.blocks_count, 0);
        assert_eq!(inode.direct, [0; DIRECT_BLOCKS]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn file_data_capacity() {
        let (path, mut dev, mut vol) = fresh("cap");
        let mut inode = Inode::new(1, FileType::Regular, 0o644, 0);
        let full = vec![7u8; MAX_FILE_SIZE];
        vol.write_file_data(&mut dev, &mut inode, &full).unwrap();
        assert_eq!(inode.blocks_count as usize, DIRECT_BLOCKS);
        assert_eq!(vol.read_file_data(&mut dev, &inode).unwrap(), full);

        let over = vec![7u8; MAX_FILE_SIZE + 1];
        assert!(matches!(
            vol.write_file_data(&mut dev, &mut inode, &over),
            Err(FsError::TooLarge)
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rewrite_releases_blocks() {
        let (path, mut dev, mut vol) = fresh("release");
        let mut inode = Inode::new(1, FileType::Regular, 0o644, 0);
        let before = vol.superblock.free_blocks;
        vol.write_file_data(&mut dev, &mut inode, &vec![1u8; 3 * BLOCK_SIZE])
            .unwrap();
        vol.write_file_data(&mut dev, &mut inode, &vec![2u8; BLOCK_SIZE])
            .unwrap();
        assert_eq!(vol.superblock.free_blocks, before - 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn directory_entries() {
        let (path, mut dev, mut vol) = fresh("dir");
        vol.add_entry(&mut dev, ROOT_INODE, "a", 1).unwrap();
        vol.add_entry(&mut dev, ROOT_INODE, "b", 2).unwrap();
        assert!(matches!(
            vol.add_entry(&mut dev, ROOT_INODE, "a", 3),
            Err(FsError::Exists)
        ));

        let root = read_inode(&mut dev, ROOT_INODE).unwrap();
        assert_eq!(root.file_size as usize, 2 * dirent::ENTRY_SIZE);
        let entries = vol.entries(&mut dev, &root).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[1].inode, 2);

        vol.remove_entry(&mut dev, ROOT_INODE, "a").unwrap();
        assert!(matches!(
            vol.remove_entry(&mut dev, ROOT_INODE, "a"),
            Err(FsError::NotFound)
        ));
        // Removing the last entry shrinks the directory to nothing
        vol.remove_entry(&mut dev, ROOT_INODE, "b").unwrap();
        let root = read_inode(&mut dev, ROOT_INODE).unwrap();
        assert_eq!(root.file_size, 0);
        assert_eq!(root.direct, [0; DIRECT_BLOCKS]);
        let _ = fs::remove_file(&path);
    }
}
