use std::io;

use thiserror::Error;

/// A custom `Result` type for this crate, combining a return value with a [`CgError`]. It is used
/// all over the crate and also returned by many functions and methods of its external API.
pub type Result<T> = std::result::Result<T, CgError>;

/// An error type returned by calls to the API exposed by this crate.
#[derive(Debug, Error)]
pub enum CgError {
    /// Error opening one of the kernel tables (`/proc/self/pagemap`, `/proc/kpagecgroup`).
    ///
    /// This is the only kind of error that aborts a whole run; see [`CgError::is_fatal`].
    #[error("could not open kernel table '{path}': {source}")]
    TableOpen {
        /// The path of the kernel table.
        path: String,
        /// The underlying error.
        source: io::Error,
    },

    /// Error opening a file to be scanned.
    #[error("could not open '{path}': {source}")]
    Open {
        /// The path of the file that was attempted to be opened.
        path: String,
        /// The underlying error.
        source: io::Error,
    },

    /// Error reading from a file.
    #[error("could not read '{path}': {source}")]
    Read {
        /// The path of the file that was attempted to be read.
        path: String,
        /// The underlying error.
        source: io::Error,
    },

    /// A positioned read from a kernel table returned fewer bytes than requested.
    #[error("short read from '{path}' at offset {offset}: expected {expected} bytes, got {got}")]
    ShortRead {
        /// The path of the kernel table.
        path: String,
        /// The offset the read started at.
        offset: u64,
        /// The number of bytes requested.
        expected: usize,
        /// The number of bytes actually read.
        got: usize,
    },

    /// A memory system call is not supported for the file at hand.
    #[error("{op} is not supported for '{path}': {source}")]
    NotSupported {
        /// The failed system call.
        op: &'static str,
        /// The path of the file involved.
        path: String,
        /// The underlying error.
        source: io::Error,
    },

    /// A system call was refused for lack of permissions.
    #[error("{op} is not permitted for '{path}': {source}")]
    PermissionDenied {
        /// The failed system call.
        op: &'static str,
        /// The path of the file involved.
        path: String,
        /// The underlying error.
        source: io::Error,
    },

    /// Any other failure of a system call.
    #[error("{op} failed for '{path}': {source}")]
    Syscall {
        /// The failed system call.
        op: &'static str,
        /// The path of the file involved.
        path: String,
        /// The underlying error.
        source: io::Error,
    },

    /// Error retrieving the metadata of a path.
    #[error("could not stat '{path}': {source}")]
    Stat {
        /// The path that was attempted to be stat'ed.
        path: String,
        /// The underlying error.
        source: io::Error,
    },

    /// A symbolic link was met while following them is disabled.
    #[error("not following symbolic link '{0}'; use the \"--follow\" flag to follow it")]
    SymlinkNotFollowed(String),

    /// A directory lies deeper than the configured maximum depth.
    #[error("max depth reached for '{0}'")]
    MaxDepth(String),

    /// The path is neither a directory nor a regular file (device, pipe, socket, ...).
    #[error("'{0}' is not a regular file")]
    NotRegular(String),

    /// No directory under the cgroup mount point has the requested inode number.
    #[error("no cgroup with inode {id} under '{mount}'")]
    CgroupNotFound {
        /// The cgroup identifier that was looked up.
        id: u64,
        /// The cgroup mount point that was walked.
        mount: String,
    },

    /// Error walking a directory tree (a scanned tree, or the cgroup hierarchy).
    #[error("could not walk directory tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error retrieving `capabilities(7)`. Wrapper for [`CapsError`].
    ///
    /// [`CapsError`]: https://docs.rs/caps/0.5/caps/errors/struct.CapsError.html
    #[error(transparent)]
    CapsError(#[from] caps::errors::CapsError),
}

impl CgError {
    /// Classifies the failure of a memory system call (`mmap(2)`, `madvise(2)`, `mincore(2)`)
    /// by its `errno`.
    pub(crate) fn from_os(op: &'static str, path: &str, source: io::Error) -> Self {
        let path = path.to_owned();
        match source.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => CgError::PermissionDenied { op, path, source },
            Some(libc::ENOSYS) | Some(libc::EOPNOTSUPP) | Some(libc::ENODEV) | Some(libc::EINVAL) => {
                CgError::NotSupported { op, path, source }
            }
            _ => CgError::Syscall { op, path, source },
        }
    }

    /// Returns `true` if the error must abort the whole run, rather than just the processing of
    /// the path at hand.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CgError::TableOpen { .. })
    }
}
