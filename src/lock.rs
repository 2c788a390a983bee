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

//! In-process readers/writers coordination, keyed by inode id.
//!
//! Each inode gets a lazily created entry carrying a reader count, a
//! writer-present flag and a condition to wait on. Entries are never garbage
//! collected: they live for the rest of the process.
//!
//! Scheduling is not fair. Woken waiters re-contend and re-evaluate their
//! predicate, so a steady stream of readers can starve a writer.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

#[derive(Default)]
struct LockState {
    readers: u32,
    writer: bool,
}

/// The per-inode entry of the lock table.
#[derive(Default)]
struct FileLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

/// The process-wide table of per-inode locks.
#[derive(Default)]
pub struct LockTable {
    entries: Mutex<HashMap<u32, Arc<FileLock>>>,
}

impl LockTable {
    /// Looks up the entry for `id`, inserting it on first use. The outer
    /// mutex is released before the entry itself is touched.
    fn entry(&self, id: u32) -> Arc<FileLock> {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(id).or_default().clone()
    }

    /// Blocks until no writer holds `id`, then registers a reader.
    pub fn acquire_read(&self, id: u32) {
        let entry = self.entry(id);
        let mut state = entry.state.lock().unwrap();
        while state.writer {
            state = entry.cond.wait(state).unwrap();
        }
        state.readers += 1;
    }

    /// Drops a reader registration, waking waiters when the last reader
    /// leaves.
    pub fn release_read(&self, id: u32) {
        let entry = self.entry(id);
        let mut state = entry.state.lock().unwrap();
        state.readers -= 1;
        if state.readers == 0 {
            entry.cond.notify_all();
        }
    }

    /// Blocks until `id` has no reader and no writer, then claims the writer
    /// slot.
    pub fn acquire_write(&self, id: u32) {
        let entry = self.entry(id);
        let mut state = entry.state.lock().unwrap();
        while state.readers > 0 || state.writer {
            state = entry.cond.wait(state).unwrap();
        }
        state.writer = true;
    }

    /// Releases the writer slot and wakes all waiters.
    pub fn release_write(&self, id: u32) {
        let entry = self.entry(id);
        let mut state = entry.state.lock().unwrap();
        state.writer = false;
        entry.cond.notify_all();
    }

    /// Acquires a read registration released when the guard drops.
    pub fn read_guard(&self, id: u32) -> ReadGuard<'_> {
        self.acquire_read(id);
        ReadGuard { table: self, id }
    }

    /// Acquires the writer slot, released when the guard drops.
    pub fn write_guard(&self, id: u32) -> WriteGuard<'_> {
        self.acquire_write(id);
        WriteGuard { table: self, id }
    }
}

/// A scoped reader registration.
pub struct ReadGuard<'t> {
    table: &'t LockTable,
    id: u32,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.table.release_read(self.id);
    }
}

/// A scoped writer claim.
pub struct WriteGuard<'t> {
    table: &'t LockTable,
    id: u32,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.table.release_write(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_share() {
        let table = LockTable::default();
        let _a = table.read_guard(1);
        let _b = table.read_guard(1);
        // Independent inodes do not interact
        let _c = table.write_guard(2);
    }

    #[test]
    fn writer_waits_for_readers() {
        let table = Arc::new(LockTable::default());
        table.acquire_read(1);

        let acquired = Arc::new(AtomicBool::new(false));
        let handle = {
            let table = Arc::clone(&table);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                table.acquire_write(1);
                acquired.store(true, Ordering::SeqCst);
                table.release_write(1);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        table.release_read(1);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn reader_waits_for_writer() {
        let table = Arc::new(LockTable::default());
        table.acquire_write(1);

        let acquired = Arc::new(AtomicBool::new(false));
        let handle = {
            let table = Arc::clone(&table);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                table.acquire_read(1);
                acquired.store(true, Ordering::SeqCst);
                table.release_read(1);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        table.release_write(1);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn guard_releases_on_drop() {
        let table = LockTable::default();
        {
            let _guard = table.write_guard(1);
        }
        // If the guard leaked the claim, this would deadlock
        let _again = table.write_guard(1);
    }
}
