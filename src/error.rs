//! Errors surfaced by file system operations.

use std::io;
use thiserror::Error;

/// An error returned by a file system operation.
#[derive(Debug, Error)]
pub enum FsError {
    /// The volume has not been mounted yet, or the last mount failed.
    #[error("filesystem is not mounted")]
    NotMounted,
    /// The operation requires a logged-in user.
    #[error("please log in")]
    NoSession,
    /// The access control check failed.
    #[error("permission denied")]
    PermissionDenied,
    /// Path resolution failed.
    #[error("no such file or directory")]
    NotFound,
    /// A directory entry with the same name already exists.
    #[error("file exists")]
    Exists,
    /// The operation requires a directory.
    #[error("not a directory")]
    NotDirectory,
    /// The operation requires a regular file.
    #[error("is a directory")]
    IsDirectory,
    /// The directory still contains entries.
    #[error("directory not empty")]
    NotEmpty,
    /// The inode or data block bitmap is exhausted.
    #[error("no space left on volume")]
    OutOfSpace,
    /// The payload exceeds the direct-block capacity of a file.
    #[error("file too large")]
    TooLarge,
    /// Another writer holds the file, or a lock collision occurred.
    #[error("file is busy")]
    Busy,
    /// The superblock magic does not match.
    #[error("invalid filesystem")]
    InvalidFs,
    /// The operation is not supported by this file system.
    #[error("{0}")]
    Unsupported(&'static str),
    /// An underlying block device access failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
