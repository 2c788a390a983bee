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

//! `mufs` is a multi-user file system hosted inside a fixed-size backing file
//! simulating a block device.
//!
//! The volume is divided into fixed-size blocks:
//! - block 0: superblock
//! - block 1: inode bitmap
//! - block 2: data block bitmap
//! - blocks 3..35: inode table
//! - blocks 35..: data region
//!
//! File content is addressed through direct block pointers only. Access is
//! checked against the logged-in user with Unix-style permission triples, and
//! writers are serialized both within the process (a readers/writers table)
//! and across processes sharing the backing file (an advisory flag stored in
//! the inode itself).

use std::fmt;
use std::process::exit;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod bitmap;
pub mod device;
pub mod dirent;
pub mod error;
pub mod fs;
pub mod inode;
pub mod lock;
pub mod prompt;
pub mod shell;
pub mod superblock;
pub mod user;
pub mod volume;

/// Writes an error to stderr, then exits.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}

/// Returns the current timestamp since the Unix epoch.
pub fn timestamp() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}
