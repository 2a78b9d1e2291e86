//! The operating-system file system.
//!
//! `PosixFileSystem` is the direct, single-directory implementation of the
//! [`FileSystem`] trait. It is what the engine uses when no restore is in
//! flight, and what the overlay uses underneath for both of its layers.
//! Everything here is a thin layer over std, dropping to `libc` where std
//! has no wrapper (advisory locks, sparse-file probing).

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::path::PathBuf;

use log::trace;
use nix::errno::Errno;

use crate::FileHandle;
use crate::FileSystem;
use crate::FileType;
use crate::OpenFlags;

/// Direct pass-through to the operating system's file system.
#[derive(Debug, Default)]
pub struct PosixFileSystem {
    _private: (),
}

impl PosixFileSystem {
    /// Create the OS file system layer.
    pub fn new() -> PosixFileSystem {
        PosixFileSystem::default()
    }

    fn list_dir(&self, directory: &Path, prefix: &str, single: bool) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(directory)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                names.push(name);
                if single {
                    break;
                }
            }
        }
        Ok(names)
    }
}

/// Flush a rename/create/unlink of `path` down to its parent directory.
fn sync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

impl FileSystem for PosixFileSystem {
    type Handle = PosixFile;

    fn open_file(
        &self,
        name: &Path,
        file_type: FileType,
        flags: OpenFlags,
    ) -> io::Result<PosixFile> {
        trace!("open {} ({:?}, {:?})", name.display(), file_type, flags);
        let file = if file_type == FileType::Directory {
            File::open(name)?
        } else {
            let mut options = OpenOptions::new();
            options.read(true);
            options.write(!flags.contains(OpenFlags::READONLY));
            if flags.contains(OpenFlags::EXCLUSIVE) {
                options.create_new(true);
            } else if flags.contains(OpenFlags::CREATE) {
                options.create(true);
            }
            let file = options.open(name)?;
            if flags.contains(OpenFlags::DURABLE)
                && flags.intersects(OpenFlags::CREATE | OpenFlags::EXCLUSIVE)
            {
                file.sync_all()?;
                sync_parent(name)?;
            }
            file
        };
        Ok(PosixFile {
            name: name.to_path_buf(),
            file,
        })
    }

    fn exist(&self, name: &Path) -> io::Result<bool> {
        name.try_exists()
    }

    fn remove(&self, name: &Path, flags: OpenFlags) -> io::Result<()> {
        match fs::remove_file(name) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            result => result?,
        }
        if flags.contains(OpenFlags::DURABLE) {
            sync_parent(name)?;
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path, flags: OpenFlags) -> io::Result<()> {
        fs::rename(from, to)?;
        if flags.contains(OpenFlags::DURABLE) {
            sync_parent(to)?;
            sync_parent(from)?;
        }
        Ok(())
    }

    fn size(&self, name: &Path) -> io::Result<u64> {
        Ok(fs::metadata(name)?.len())
    }

    fn directory_list(&self, directory: &Path, prefix: &str) -> io::Result<Vec<String>> {
        self.list_dir(directory, prefix, false)
    }

    fn directory_list_single(&self, directory: &Path, prefix: &str) -> io::Result<Vec<String>> {
        self.list_dir(directory, prefix, true)
    }

    fn terminate(&self) -> io::Result<()> {
        Ok(())
    }
}

/// An open file in the operating system's file system.
#[derive(Debug)]
pub struct PosixFile {
    name: PathBuf,
    file: File,
}

impl PosixFile {
    /// Find the start of the next data region at or after `offset`, or
    /// `None` when only holes remain up to end of file.
    pub(crate) fn seek_data(&self, offset: u64) -> io::Result<Option<u64>> {
        match unsafe {
            libc::lseek(
                self.file.as_raw_fd(),
                offset as libc::off_t,
                libc::SEEK_DATA,
            )
        } {
            -1 => match Errno::last() {
                Errno::ENXIO => Ok(None),
                errno => Err(errno.into()),
            },
            off => Ok(Some(off as u64)),
        }
    }

    /// Find the start of the next hole at or after `offset`. There is
    /// always an implicit hole at end of file.
    pub(crate) fn seek_hole(&self, offset: u64) -> io::Result<u64> {
        match unsafe {
            libc::lseek(
                self.file.as_raw_fd(),
                offset as libc::off_t,
                libc::SEEK_HOLE,
            )
        } {
            -1 => Err(Errno::last().into()),
            off => Ok(off as u64),
        }
    }
}

impl FileHandle for PosixFile {
    fn name(&self) -> &Path {
        &self.name
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.write_all_at(buf, offset)
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn lock(&self, lock: bool) -> io::Result<()> {
        let operation = if lock { libc::LOCK_EX } else { libc::LOCK_UN };
        if unsafe { libc::flock(self.file.as_raw_fd(), operation) } == -1 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        // The descriptor is released when the handle drops.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        let fs = PosixFileSystem::new();

        let file = fs
            .open_file(&path, FileType::Data, OpenFlags::CREATE)
            .unwrap();
        file.write(10, b"hello").unwrap();
        assert_eq!(file.size().unwrap(), 15);

        let mut buf = [0u8; 5];
        file.read(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn exclusive_create_fails_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        let fs = PosixFileSystem::new();

        fs.open_file(&path, FileType::Data, OpenFlags::CREATE)
            .unwrap();
        let err = fs
            .open_file(&path, FileType::Data, OpenFlags::EXCLUSIVE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        let fs = PosixFileSystem::new();

        fs.open_file(&path, FileType::Data, OpenFlags::CREATE)
            .unwrap();
        fs.remove(&path, OpenFlags::empty()).unwrap();
        fs.remove(&path, OpenFlags::empty()).unwrap();
        assert!(!fs.exist(&path).unwrap());
    }

    #[test]
    fn directory_list_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let fs = PosixFileSystem::new();
        for name in ["table.data", "table.idx", "log.0001"] {
            fs.open_file(&dir.path().join(name), FileType::Data, OpenFlags::CREATE)
                .unwrap();
        }

        let mut names = fs.directory_list(dir.path(), "table").unwrap();
        names.sort();
        assert_eq!(names, ["table.data", "table.idx"]);
        assert_eq!(fs.directory_list_single(dir.path(), "log").unwrap().len(), 1);
    }

    #[test]
    fn sparse_probe_finds_data_and_holes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse");
        let fs = PosixFileSystem::new();

        let file = fs
            .open_file(&path, FileType::Data, OpenFlags::CREATE)
            .unwrap();
        file.truncate(1 << 20).unwrap();
        file.write(0, &[0xAB; 4096]).unwrap();
        file.sync().unwrap();

        assert_eq!(file.seek_data(0).unwrap(), Some(0));
        let hole = file.seek_hole(0).unwrap();
        assert!(hole >= 4096 && hole <= 1 << 20);
        // Nothing was written past the first block.
        assert_eq!(file.seek_data(hole).unwrap(), None);
    }

    #[test]
    fn lock_and_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let fs = PosixFileSystem::new();
        let file = fs
            .open_file(&dir.path().join("lock"), FileType::Data, OpenFlags::CREATE)
            .unwrap();
        file.lock(true).unwrap();
        file.lock(false).unwrap();
    }
}
