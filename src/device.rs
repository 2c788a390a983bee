//! Access to the backing file as a fixed-size, random-access block device.

use crate::error::Result;
use crate::superblock::{BLOCK_SIZE, DISK_SIZE, MAX_BLOCKS};
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A block device simulated by a regular file of exactly [`DISK_SIZE`] bytes.
///
/// There is no caching layer: every write goes straight to the backing file.
pub struct BlockDevice {
    file: File,
}

impl BlockDevice {
    /// Opens the backing file at `path` read-write, creating it zero-filled if
    /// absent or shorter than the volume size.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if file.metadata()?.len() < DISK_SIZE as u64 {
            file.set_len(DISK_SIZE as u64)?;
        }
        Ok(Self { file })
    }

    /// Reads block `n` into `buf`.
    pub fn read_block(&mut self, n: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(Self::offset(n)?))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` to block `n`, flushing it to the OS before returning.
    pub fn write_block(&mut self, n: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(Self::offset(n)?))?;
        self.file.write_all(buf)?;
        self.file.flush()?;
        Ok(())
    }

    /// Zeroes every block of the device.
    pub fn wipe(&mut self) -> Result<()> {
        let zero = [0; BLOCK_SIZE];
        for n in 0..MAX_BLOCKS as u32 {
            self.write_block(n, &zero)?;
        }
        Ok(())
    }

    fn offset(n: u32) -> Result<u64> {
        if (n as usize) < MAX_BLOCKS {
            Ok(n as u64 * BLOCK_SIZE as u64)
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block index {n} out of range"),
            )
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsError;
    use std::env;
    use std::fs;

    fn temp_disk(name: &str) -> std::path::PathBuf {
        let path = env::temp_dir().join(format!("mufs-device-{name}-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn create_and_rw() {
        let path = temp_disk("rw");
        let mut dev = BlockDevice::open(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), DISK_SIZE as u64);

        let mut block = [0; BLOCK_SIZE];
        block[0] = 0xab;
        block[BLOCK_SIZE - 1] = 0xcd;
        dev.write_block(42, &block).unwrap();

        let mut read = [0; BLOCK_SIZE];
        dev.read_block(42, &mut read).unwrap();
        assert_eq!(read[0], 0xab);
        assert_eq!(read[BLOCK_SIZE - 1], 0xcd);
        // Neighboring blocks untouched
        dev.read_block(41, &mut read).unwrap();
        assert_eq!(read, [0; BLOCK_SIZE]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn out_of_range() {
        let path = temp_disk("range");
        let mut dev = BlockDevice::open(&path).unwrap();
        let mut buf = [0; BLOCK_SIZE];
        assert!(matches!(
            dev.read_block(MAX_BLOCKS as u32, &mut buf),
            Err(FsError::Io(_))
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn persistence_across_reopen() {
        let path = temp_disk("reopen");
        let mut block = [0; BLOCK_SIZE];
        block[7] = 7;
        {
            let mut dev = BlockDevice::open(&path).unwrap();
            dev.write_block(3, &block).unwrap();
        }
        let mut dev = BlockDevice::open(&path).unwrap();
        let mut read = [0; BLOCK_SIZE];
        dev.read_block(3, &mut read).unwrap();
        assert_eq!(read[7], 7);
        let _ = fs::remove_file(&path);
    }
}
