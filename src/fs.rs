//! The file-system façade: the named operations composing the device, the
//! volume, the lock table and the user table.
//!
//! Unless stated otherwise, every operation requires a logged-in user,
//! resolves its target, enforces the required permissions against the
//! session, performs the action and writes every changed structure through
//! to the backing file before returning.
//!
//! The façade is shared between threads: all mutable state sits behind
//! mutexes, and no condition wait ever happens while the volume mutex is
//! held.

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::inode::{
    read_inode, write_inode, FileType, Inode, WriteState, PERM_EXEC, PERM_READ, PERM_WRITE,
    ROOT_INODE,
};
use crate::lock::LockTable;
use crate::superblock::{Superblock, DIRECT_BLOCKS, MAX_FILE_SIZE};
use crate::timestamp;
use crate::user::{Session, UserTable};
use crate::volume::Volume;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// The device and, once mounted, the volume state.
struct State {
    dev: BlockDevice,
    vol: Option<Volume>,
}

/// The current directory, tracked as an inode id plus a display string.
///
/// The string is pure bookkeeping: absolute paths replace it, relative paths
/// are appended. It is never re-derived from the tree.
struct CwdState {
    inode: u32,
    path: String,
}

/// A multi-user file system hosted in a backing file.
pub struct FileSystem {
    state: Mutex<State>,
    locks: LockTable,
    users: Mutex<UserTable>,
    session: Mutex<Option<Session>>,
    cwd: Mutex<CwdState>,
    /// Inode ids locked through [`Self::lock_for_write`] and not yet
    /// released.
    held: Mutex<HashSet<u32>>,
}

/// Walks `path` from `start` (or from the root for absolute paths),
/// component by component. Empty components and `.` are skipped; `..` is a
/// documented limitation and is skipped as well.
fn resolve_from(dev: &mut BlockDevice, vol: &Volume, start: u32, path: &str) -> Result<u32> {
    let (mut cur, rest) = match path.strip_prefix('/') {
        Some(rest) => (ROOT_INODE, rest),
        None => (start, path),
    };
    for comp in rest.split('/') {
        if comp.is_empty() || comp == "." || comp == ".." {
            continue;
        }
        let dir = read_inode(dev, cur)?;
        if dir.file_type != FileType::Directory {
            return Err(FsError::NotFound);
        }
        cur = vol
            .entries(dev, &dir)?
            .into_iter()
            .find(|e| e.name == comp)
            .map(|e| e.inode)
            .ok_or(FsError::NotFound)?;
    }
    Ok(cur)
}

impl FileSystem {
    /// Opens the file system on the backing file at `path`, creating the
    /// file if needed. The volume is not mounted yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(State {
                dev: BlockDevice::open(path.as_ref())?,
                vol: None,
            }),
            locks: LockTable::default(),
            users: Mutex::new(UserTable::seeded()?),
            session: Mutex::new(None),
            cwd: Mutex::new(CwdState {
                inode: ROOT_INODE,
                path: "/".to_owned(),
            }),
            held: Mutex::new(HashSet::new()),
        })
    }

    /// Formats the volume. Any previously mounted state is discarded; the
    /// volume must be mounted again afterwards. The user table is re-seeded.
    pub fn format(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            Volume::format(&mut state.dev)?;
            state.vol = None;
        }
        *self.users.lock().unwrap() = UserTable::seeded()?;
        self.reset_cwd();
        Ok(())
    }

    /// Mounts the volume, verifying the superblock signature, and re-seeds
    /// the user table.
    pub fn mount(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let vol = Volume::mount(&mut state.dev)?;
            state.vol = Some(vol);
        }
        *self.users.lock().unwrap() = UserTable::seeded()?;
        self.reset_cwd();
        Ok(())
    }

    fn reset_cwd(&self) {
        let mut cwd = self.cwd.lock().unwrap();
        cwd.inode = ROOT_INODE;
        cwd.path = "/".to_owned();
    }

    /// Authenticates `username` and makes it the current session.
    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        let session = self
            .users
            .lock()
            .unwrap()
            .authenticate(username, password)
            .ok_or(FsError::PermissionDenied)?;
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    /// Drops the current session.
    pub fn logout(&self) {
        *self.session.lock().unwrap() = None;
    }

    /// Registers a new account and returns its uid.
    pub fn add_user(&self, username: &str, password: &str) -> Result<u16> {
        self.users.lock().unwrap().add(username, password)
    }

    /// The currently logged-in user, if any.
    pub fn current_session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    /// The current directory path string.
    pub fn current_path(&self) -> String {
        self.cwd.lock().unwrap().path.clone()
    }

    /// A snapshot of the superblock.
    pub fn superblock(&self) -> Result<Superblock> {
        self.with_vol(|_, vol| Ok(vol.superblock.clone()))
    }

    fn with_vol<R>(&self, f: impl FnOnce(&mut BlockDevice, &mut Volume) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let vol = state.vol.as_mut().ok_or(FsError::NotMounted)?;
        f(&mut state.dev, vol)
    }

    fn require_session(&self) -> Result<Session> {
        self.session.lock().unwrap().clone().ok_or(FsError::NoSession)
    }

    fn cwd_inode(&self) -> u32 {
        self.cwd.lock().unwrap().inode
    }

    /// Creates a regular file named `name` in the current directory, with
    /// mode 0644 and the session's uid as owner.
    pub fn create_file(&self, name: &str) -> Result<()> {
        self.create_node(name, FileType::Regular, 0o644)
    }

    /// Creates a directory named `name` in the current directory, with mode
    /// 0755.
    pub fn create_directory(&self, name: &str) -> Result<()> {
        self.create_node(name, FileType::Directory, 0o755)
    }

    fn create_node(&self, name: &str, file_type: FileType, mode: u16) -> Result<()> {
        let session = self.require_session()?;
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(FsError::Unsupported("invalid file name"));
        }
        let cwd = self.cwd_inode();
        self.with_vol(|dev, vol| {
            let dir = read_inode(dev, cwd)?;
            if !dir.allows(&session, PERM_WRITE) {
                return Err(FsError::PermissionDenied);
            }
            let id = vol.alloc_inode(dev)?;
            let inode = Inode::new(id, file_type, mode, session.uid);
            write_inode(dev, &inode)?;
            if let Err(e) = vol.add_entry(dev, cwd, name, id) {
                vol.free_inode(dev, id)?;
                return Err(e);
            }
            Ok(())
        })
    }

    /// Removes the regular file named `name` from the current directory,
    /// freeing its content.
    pub fn remove_file(&self, name: &str) -> Result<()> {
        let session = self.require_session()?;
        let cwd = self.cwd_inode();
        self.with_vol(|dev, vol| {
            let dir = read_inode(dev, cwd)?;
            let id = vol
                .entries(dev, &dir)?
                .into_iter()
                .find(|e| e.name == name)
                .map(|e| e.inode)
                .ok_or(FsError::NotFound)?;
            let inode = read_inode(dev, id)?;
            if inode.file_type == FileType::Directory {
                return Err(FsError::IsDirectory);
            }
            if !inode.allows(&session, PERM_WRITE) {
                return Err(FsError::PermissionDenied);
            }
            if inode.state == WriteState::Writing {
                return Err(FsError::Busy);
            }
            for ptr in inode.direct {
                if ptr != 0 {
                    vol.free_block(dev, ptr)?;
                }
            }
            vol.remove_entry(dev, cwd, name)?;
            vol.free_inode(dev, id)
        })
    }

    /// Removes the empty directory named `name` from the current directory.
    pub fn remove_directory(&self, name: &str) -> Result<()> {
        let session = self.require_session()?;
        let cwd = self.cwd_inode();
        self.with_vol(|dev, vol| {
            let dir = read_inode(dev, cwd)?;
            let id = vol
                .entries(dev, &dir)?
                .into_iter()
                .find(|e| e.name == name)
                .map(|e| e.inode)
                .ok_or(FsError::NotFound)?;
            let inode = read_inode(dev, id)?;
            if inode.file_type != FileType::Directory {
                return Err(FsError::NotDirectory);
            }
            if !inode.allows(&session, PERM_WRITE) {
                return Err(FsError::PermissionDenied);
            }
            if inode.file_size != 0 {
                return Err(FsError::NotEmpty);
            }
            vol.remove_entry(dev, cwd, name)?;
            vol.free_inode(dev, id)
        })
    }

    /// Sets the advisory writer flag on inode `id`, failing with [`FsError::Busy`]
    /// if it is already set. The check-then-write is not atomic against
    /// other processes; the flag is advisory.
    fn begin_write(&self, id: u32) -> Result<()> {
        self.with_vol(|dev, _| {
            let mut inode = read_inode(dev, id)?;
            if inode.state == WriteState::Writing {
                return Err(FsError::Busy);
            }
            inode.state = WriteState::Writing;
            write_inode(dev, &inode)
        })
    }

    /// Clears the advisory writer flag on inode `id`.
    fn end_write(&self, id: u32) -> Result<()> {
        self.with_vol(|dev, _| {
            let mut inode = read_inode(dev, id)?;
            inode.state = WriteState::Available;
            write_inode(dev, &inode)
        })
    }

    /// Resolves a writable regular file for `write_file` and friends.
    fn resolve_writable(&self, name: &str, session: &Session) -> Result<u32> {
        let cwd = self.cwd_inode();
        self.with_vol(|dev, vol| {
            let id = resolve_from(dev, vol, cwd, name)?;
            let inode = read_inode(dev, id)?;
            if inode.file_type == FileType::Directory {
                return Err(FsError::IsDirectory);
            }
            if !inode.allows(session, PERM_WRITE) {
                return Err(FsError::PermissionDenied);
            }
            Ok(id)
        })
    }

    /// Replaces the inode's content, persisting it truncated when the
    /// rewrite aborts partway. Already freed blocks are not rolled back.
    fn rewrite_content(&self, id: u32, data: &[u8]) -> Result<()> {
        self.with_vol(|dev, vol| {
            let mut inode = read_inode(dev, id)?;
            match vol.write_file_data(dev, &mut inode, data) {
                Ok(()) => write_inode(dev, &inode),
                Err(e) => {
                    inode.direct = [0; DIRECT_BLOCKS];
                    inode.file_size = 0;
                    inode.blocks_count = 0;
                    inode.modify_time = timestamp().as_secs();
                    write_inode(dev, &inode)?;
                    Err(e)
                }
            }
        })
    }

    /// Replaces the whole content of the file at `name` with `data`.
    ///
    /// The disk-resident writer flag is taken first, then the in-process
    /// writer slot; release happens in the reverse order on every exit path.
    pub fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let session = self.require_session()?;
        if data.len() > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        let id = self.resolve_writable(name, &session)?;
        self.begin_write(id)?;
        let res = {
            let _guard = self.locks.write_guard(id);
            self.rewrite_content(id, data)
        };
        let end = self.end_write(id);
        res.and(end)
    }

    /// Reads the whole content of the file at `name`.
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let session = self.require_session()?;
        let cwd = self.cwd_inode();
        let id = self.with_vol(|dev, vol| {
            let id = resolve_from(dev, vol, cwd, name)?;
            let inode = read_inode(dev, id)?;
            if inode.file_type == FileType::Directory {
                return Err(FsError::IsDirectory);
            }
            if !inode.allows(&session, PERM_READ) {
                return Err(FsError::PermissionDenied);
            }
            if inode.state == WriteState::Writing {
                return Err(FsError::Busy);
            }
            Ok(id)
        })?;
        let _guard = self.locks.read_guard(id);
        self.with_vol(|dev, vol| {
            let inode = read_inode(dev, id)?;
            vol.read_file_data(dev, &inode)
        })
    }

    /// Takes both layers of the write lock on the file at `name`, keeping
    /// them held until [`Self::unlock_for_write`]. Fails with
    /// [`FsError::Busy`] if another writer holds the file.
    pub fn lock_for_write(&self, name: &str) -> Result<()> {
        let session = self.require_session()?;
        let id = self.resolve_writable(name, &session)?;
        self.begin_write(id)?;
        self.locks.acquire_write(id);
        self.held.lock().unwrap().insert(id);
        Ok(())
    }

    /// Releases the write lock taken by [`Self::lock_for_write`].
    pub fn unlock_for_write(&self, name: &str) -> Result<()> {
        self.require_session()?;
        let cwd = self.cwd_inode();
        let id = self.with_vol(|dev, vol| resolve_from(dev, vol, cwd, name))?;
        if !self.held.lock().unwrap().remove(&id) {
            return Err(FsError::Unsupported("file is not locked for writing"));
        }
        self.locks.release_write(id);
        self.end_write(id)
    }

    /// Replaces the content of a file previously locked with
    /// [`Self::lock_for_write`], leaving the lock held.
    pub fn write_file_locked(&self, name: &str, data: &[u8]) -> Result<()> {
        self.require_session()?;
        if data.len() > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        let cwd = self.cwd_inode();
        let id = self.with_vol(|dev, vol| resolve_from(dev, vol, cwd, name))?;
        if !self.held.lock().unwrap().contains(&id) {
            return Err(FsError::Unsupported("file is not locked for writing"));
        }
        self.rewrite_content(id, data)
    }

    /// Changes the current directory to `path`.
    pub fn change_directory(&self, path: &str) -> Result<()> {
        let session = self.require_session()?;
        if path.split('/').any(|comp| comp == "..") {
            return Err(FsError::Unsupported(
                "`..` is not supported; use an absolute path",
            ));
        }
        let cwd = self.cwd_inode();
        let id = self.with_vol(|dev, vol| {
            let id = resolve_from(dev, vol, cwd, path)?;
            let inode = read_inode(dev, id)?;
            if inode.file_type != FileType::Directory {
                return Err(FsError::NotDirectory);
            }
            if !inode.allows(&session, PERM_EXEC) {
                return Err(FsError::PermissionDenied);
            }
            Ok(id)
        })?;
        let mut cwd = self.cwd.lock().unwrap();
        cwd.inode = id;
        if path.starts_with('/') {
            cwd.path = path.to_owned();
        } else if !path.is_empty() {
            if !cwd.path.ends_with('/') {
                cwd.path.push('/');
            }
            cwd.path.push_str(path);
        }
        Ok(())
    }

    /// Lists the directory at `path`, returning each entry's name and an
    /// inode snapshot.
    pub fn list_directory(&self, path: &str) -> Result<Vec<(String, Inode)>> {
        let session = self.require_session()?;
        let cwd = self.cwd_inode();
        self.with_vol(|dev, vol| {
            let id = resolve_from(dev, vol, cwd, path)?;
            let dir = read_inode(dev, id)?;
            if dir.file_type != FileType::Directory {
                return Err(FsError::NotDirectory);
            }
            if !dir.allows(&session, PERM_READ) {
                return Err(FsError::PermissionDenied);
            }
            vol.entries(dev, &dir)?
                .into_iter()
                .map(|e| Ok((e.name, read_inode(dev, e.inode)?)))
                .collect()
        })
    }

    /// Replaces the permission bits of the file at `name`. Only the owner or
    /// root may do this.
    pub fn change_permission(&self, name: &str, mode: u16) -> Result<()> {
        let session = self.require_session()?;
        let cwd = self.cwd_inode();
        self.with_vol(|dev, vol| {
            let id = resolve_from(dev, vol, cwd, name)?;
            let mut inode = read_inode(dev, id)?;
            if !session.root && inode.owner != session.uid {
                return Err(FsError::PermissionDenied);
            }
            inode.mode = mode & 0o777;
            inode.modify_time = timestamp().as_secs();
            write_inode(dev, &inode)
        })
    }

    /// Replaces the owner of the file at `name`. Root only.
    pub fn change_owner(&self, name: &str, uid: u16) -> Result<()> {
        let session = self.require_session()?;
        if !session.root {
            return Err(FsError::PermissionDenied);
        }
        let cwd = self.cwd_inode();
        self.with_vol(|dev, vol| {
            let id = resolve_from(dev, vol, cwd, name)?;
            let mut inode = read_inode(dev, id)?;
            inode.owner = uid;
            inode.modify_time = timestamp().as_secs();
            write_inode(dev, &inode)
        })
    }
}
