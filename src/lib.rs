//! Live-restore overlay file system
//!
//! This crate layers a writable *destination* directory on top of a
//! read-only *source* directory so that a database engine can run against
//! the destination while its data is still being copied out of the source.
//! The engine sees a single coherent file system; per file, an ordered list
//! of *holes* records which byte ranges still live only in the source.
//! Writes and truncates retire holes, reads that land in a hole are served
//! from the source and promoted into the destination, and a background
//! sweep ([`LiveRestoreFile::fill_holes`]) drains whatever remains.
//!
//! Deletions and renames are recorded with *tombstones*: zero-byte marker
//! files in the destination that stop the source from resurrecting a name
//! that the engine has removed.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use std::io;
use std::path::Path;

use bitflags::bitflags;

pub use crate::config::LiveRestoreOption;
pub use crate::config::Options;
pub use crate::fs::LiveRestoreFs;
pub use crate::handle::LiveRestoreFile;
pub use crate::posix::PosixFile;
pub use crate::posix::PosixFileSystem;
pub use crate::tombstone::TOMBSTONE_SUFFIX;

mod config;
mod extent;
mod fs;
mod handle;
mod layer;
mod posix;
mod tombstone;

/// File types understood by the file system layer.
///
/// The type is a hint passed through to the operating system layer; the
/// overlay itself only distinguishes directories (which cannot carry holes)
/// from everything else.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FileType {
    /// Checkpoint or table data file.
    Data,
    /// Directory.
    Directory,
    /// Write-ahead log file.
    Log,
    /// Any other regular file.
    Regular,
}

bitflags! {
    /// Flags accepted by [`FileSystem::open_file`] and carried on the
    /// metadata operations that take a durability hint.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct OpenFlags: u32 {
        /// Create the file if it does not exist.
        const CREATE = 1 << 0;
        /// Fail if the file already exists. Implies `CREATE`.
        const EXCLUSIVE = 1 << 1;
        /// Open the file for reading only.
        const READONLY = 1 << 2;
        /// Make the operation durable before returning.
        const DURABLE = 1 << 3;
    }
}

/// The capability surface of a file system.
///
/// Implemented both by the plain operating-system layer
/// ([`PosixFileSystem`]) and by the overlay ([`LiveRestoreFs`]), which owns
/// a `PosixFileSystem` as its backing implementation. Host engines program
/// against this trait so a live restore can be slotted in without touching
/// the I/O paths.
pub trait FileSystem: Send + Sync {
    /// The handle type produced by [`open_file`](Self::open_file).
    type Handle: FileHandle;

    /// Open (and possibly create) the named file.
    fn open_file(
        &self,
        name: &Path,
        file_type: FileType,
        flags: OpenFlags,
    ) -> io::Result<Self::Handle>;

    /// Return whether the named file exists.
    fn exist(&self, name: &Path) -> io::Result<bool>;

    /// Remove the named file. Removing a file that does not exist succeeds
    /// silently.
    fn remove(&self, name: &Path, flags: OpenFlags) -> io::Result<()>;

    /// Rename a file. Fails with [`io::ErrorKind::NotFound`] when `from`
    /// does not exist.
    fn rename(&self, from: &Path, to: &Path, flags: OpenFlags) -> io::Result<()>;

    /// Return the size in bytes of the named file.
    fn size(&self, name: &Path) -> io::Result<u64>;

    /// List the file names in a directory that start with `prefix`.
    fn directory_list(&self, directory: &Path, prefix: &str) -> io::Result<Vec<String>>;

    /// Like [`directory_list`](Self::directory_list) but stops after the
    /// first matching name.
    fn directory_list_single(&self, directory: &Path, prefix: &str) -> io::Result<Vec<String>>;

    /// Tear the file system down. Further operations are an error.
    fn terminate(&self) -> io::Result<()>;
}

/// An open file.
///
/// All operations take `&self`: handles are shared between foreground
/// engine threads and the background migration sweep, and synchronize
/// internally where they must.
pub trait FileHandle: Send + Sync {
    /// The name the file was opened under.
    fn name(&self) -> &Path;

    /// Read `buf.len()` bytes at `offset`. The full range must be backed
    /// by data; short reads are an error.
    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` at `offset`.
    fn write(&self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Truncate (or extend) the file to `len` bytes.
    fn truncate(&self, len: u64) -> io::Result<()>;

    /// Return the file's size in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Flush the file's contents to stable storage.
    fn sync(&self) -> io::Result<()>;

    /// Acquire (`true`) or release (`false`) an exclusive advisory lock on
    /// the file.
    fn lock(&self, lock: bool) -> io::Result<()>;

    /// Run the handle's close-time protocol. Closing is idempotent; the
    /// underlying descriptors are released when the handle is dropped.
    fn close(&self) -> io::Result<()>;
}
