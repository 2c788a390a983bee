//! In-memory user accounts and sessions.
//!
//! There is no persistent user database: the table is re-seeded with the
//! default accounts on every format and mount. Passwords are stored hashed,
//! never in clear text.

use crate::error::{FsError, Result};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand_core::OsRng;
use std::collections::HashMap;
use std::io;

/// Hashes the given clear password with a generated salt.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| FsError::Io(io::Error::other(e.to_string())))?;
    Ok(hash.to_string())
}

/// Tells whether the given password `pass` corresponds to the hashed password
/// `hash`.
pub fn check_password(hash: &str, pass: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(pass.as_bytes(), &parsed_hash)
        .is_ok()
}

/// A user account.
pub struct Account {
    /// The user id, used as the owner field of inodes.
    pub uid: u16,
    /// The login name.
    pub username: String,
    /// The hashed password.
    password_hash: String,
    /// Tells whether the account bypasses permission checks.
    pub root: bool,
}

/// The identity of the currently authenticated user.
#[derive(Clone, Debug)]
pub struct Session {
    pub uid: u16,
    pub username: String,
    pub root: bool,
}

/// The table of known accounts, keyed by uid.
#[derive(Default)]
pub struct UserTable {
    accounts: HashMap<u16, Account>,
}

impl UserTable {
    /// Builds the default table: `root`/`root` (root), `user1`/`123456` and
    /// `user2`/`123456`.
    pub fn seeded() -> Result<Self> {
        let mut table = Self::default();
        table.insert("root", "root", true)?;
        table.insert("user1", "123456", false)?;
        table.insert("user2", "123456", false)?;
        Ok(table)
    }

    fn insert(&mut self, username: &str, password: &str, root: bool) -> Result<u16> {
        let uid = self.next_uid();
        self.accounts.insert(
            uid,
            Account {
                uid,
                username: username.to_owned(),
                password_hash: hash_password(password)?,
                root,
            },
        );
        Ok(uid)
    }

    /// The smallest unused non-negative uid.
    fn next_uid(&self) -> u16 {
        (0..).find(|uid| !self.accounts.contains_key(uid)).unwrap()
    }

    /// Adds a regular account, returning its uid.
    pub fn add(&mut self, username: &str, password: &str) -> Result<u16> {
        if self.accounts.values().any(|a| a.username == username) {
            return Err(FsError::Exists);
        }
        self.insert(username, password, false)
    }

    /// Checks `username`/`password` and returns a session on success.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<Session> {
        let account = self.accounts.values().find(|a| a.username == username)?;
        if !check_password(&account.password_hash, password) {
            return None;
        }
        Some(Session {
            uid: account.uid,
            username: account.username.clone(),
            root: account.root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_accounts() {
        let table = UserTable::seeded().unwrap();
        let root = table.authenticate("root", "root").unwrap();
        assert_eq!(root.uid, 0);
        assert!(root.root);
        let user1 = table.authenticate("user1", "123456").unwrap();
        assert_eq!(user1.uid, 1);
        assert!(!user1.root);
        assert!(table.authenticate("user2", "123456").is_some());

        assert!(table.authenticate("root", "wrong").is_none());
        assert!(table.authenticate("ghost", "123456").is_none());
    }

    #[test]
    fn add_assigns_smallest_unused_uid() {
        let mut table = UserTable::seeded().unwrap();
        assert_eq!(table.add("alice", "pw").unwrap(), 3);
        assert_eq!(table.add("bob", "pw").unwrap(), 4);
        assert!(matches!(table.add("alice", "pw"), Err(FsError::Exists)));
        assert!(table.authenticate("alice", "pw").is_some());
    }
}
