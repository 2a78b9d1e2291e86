//! The live-restore file handle.
//!
//! A handle binds one logical name to a destination file and, while the
//! file still has unrestored ranges, a read-only source file. The hole
//! list and the `complete` flag live behind one mutex per handle; the
//! mutex is held across a whole write (write, fsync, subtract) and across
//! a whole promotion (source read, write-through), so foreground I/O and
//! the background sweep cannot interleave on the same range.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use log::debug;
use log::error;
use log::trace;
use parking_lot::Mutex;

use crate::FileHandle;
use crate::FileType;
use crate::extent::HoleList;
use crate::fs::FsShared;
use crate::posix::PosixFile;

/// Holes can be as large as a whole file; the migration sweep promotes
/// them in reads of at most this many bytes.
pub(crate) const MIGRATION_CHUNK: usize = 4 * 1024;

#[derive(Debug)]
pub(crate) struct HandleState {
    pub(crate) holes: HoleList,
    /// True when the destination needs nothing from the source: the file
    /// was never source-backed, or a tombstone proves the destination is
    /// authoritative.
    pub(crate) complete: bool,
}

/// An open file in a live-restore overlay.
///
/// Obtained from [`LiveRestoreFs::open_file`](crate::LiveRestoreFs). The
/// handle may be shared (for example wrapped in an [`Arc`]) between engine
/// threads and a background thread draining it with
/// [`fill_holes`](LiveRestoreFile::fill_holes).
#[derive(Debug)]
pub struct LiveRestoreFile {
    name: PathBuf,
    file_type: FileType,
    destination: PosixFile,
    source: Option<PosixFile>,
    state: Mutex<HandleState>,
    shared: Arc<FsShared>,
    closed: AtomicBool,
}

impl LiveRestoreFile {
    pub(crate) fn new(
        name: PathBuf,
        file_type: FileType,
        destination: PosixFile,
        source: Option<PosixFile>,
        holes: HoleList,
        complete: bool,
        shared: Arc<FsShared>,
    ) -> LiveRestoreFile {
        LiveRestoreFile {
            name,
            file_type,
            destination,
            source,
            state: Mutex::new(HandleState { holes, complete }),
            shared,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the destination holds every byte of the file, so reads will
    /// never touch the source again.
    pub fn complete(&self) -> bool {
        let state = self.state.lock();
        state.complete || state.holes.is_empty()
    }

    /// Number of bytes that still have to be copied from the source.
    pub fn unrestored_bytes(&self) -> u64 {
        self.state.lock().holes.total_len()
    }

    /// Copy every remaining unrestored range from the source into the
    /// destination.
    ///
    /// Each chunk is promoted through the regular read path, which retires
    /// the range from the hole list, so the head hole shrinks or advances
    /// on every iteration and the loop terminates. Checks the engine's
    /// shutdown signal between chunks and fails with
    /// [`io::ErrorKind::Interrupted`] when it is raised.
    pub fn fill_holes(&self) -> io::Result<()> {
        let mut buf = vec![0_u8; MIGRATION_CHUNK];
        loop {
            if self.shared.shutdown_requested() {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "engine shutdown requested during migration",
                ));
            }
            let mut state = self.state.lock();
            let Some((off, len)) = state.holes.head_range() else {
                break;
            };
            trace!(
                "restoring {}: {} bytes at {}",
                self.name.display(),
                len,
                off
            );
            let chunk = len.min(MIGRATION_CHUNK);
            let source = self.source.as_ref().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unrestored ranges remain but the file has no source backing",
                )
            })?;
            source.read(off, &mut buf[..chunk])?;
            self.write_locked(&mut state, off, &buf[..chunk])?;
        }
        Ok(())
    }

    /// Write to the destination and retire the written range, in the only
    /// order that is crash-safe: the data must be durable before the hole
    /// is forgotten. Losing the subtract re-reads the source, which still
    /// matches; losing the write while the subtract survived would serve
    /// stale destination bytes.
    fn write_locked(&self, state: &mut HandleState, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.destination.write(offset, buf)?;
        self.destination.sync()?;
        state.holes.subtract(offset, buf.len());
        Ok(())
    }

    /// Whether a read can be satisfied by the destination alone.
    ///
    /// Callers read and write whole blocks, so a read either avoids every
    /// hole or sits entirely inside one. A read straddling a hole boundary
    /// breaks that contract and is fatal.
    fn can_service_read(&self, state: &HandleState, offset: u64, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        let read_end = offset + len as u64 - 1;
        for hole in state.holes.iter() {
            if read_end < hole.off {
                break;
            }
            let begins_in_hole = hole.contains(offset);
            let ends_in_hole = hole.contains(read_end);
            if begins_in_hole && ends_in_hole {
                return false;
            }
            assert!(
                begins_in_hole == ends_in_hole,
                "read {}-{} of {} partially overlaps unrestored range {}-{}",
                offset,
                read_end,
                self.name.display(),
                hole.off,
                hole.end()
            );
        }
        true
    }
}

impl FileHandle for LiveRestoreFile {
    fn name(&self) -> &Path {
        &self.name
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        trace!(
            "read {}: {} bytes at {}",
            self.name.display(),
            buf.len(),
            offset
        );
        let mut state = self.state.lock();
        if let Some(source) = &self.source {
            if !state.complete && !self.can_service_read(&state, offset, buf.len()) {
                // The read is entirely inside a hole: serve it from the
                // source and promote it so the hole is retired.
                source.read(offset, buf)?;
                trace!(
                    "promoting {} bytes at {} into {}",
                    buf.len(),
                    offset,
                    self.name.display()
                );
                return self.write_locked(&mut state, offset, buf);
            }
        }
        self.destination.read(offset, buf)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        trace!(
            "write {}: {} bytes at {}",
            self.name.display(),
            buf.len(),
            offset
        );
        let mut state = self.state.lock();
        self.write_locked(&mut state, offset, buf)
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        let mut state = self.state.lock();
        let old_len = self.destination.size()?;
        if old_len == len {
            return Ok(());
        }
        debug!(
            "truncating {} from {} to {}",
            self.name.display(),
            old_len,
            len
        );
        // Shrinking and extending alike: the affected range will never be
        // read from the source.
        let start = old_len.min(len);
        let end = old_len.max(len);
        state.holes.subtract(start, (end - start) as usize);
        self.destination.truncate(len)
    }

    fn size(&self) -> io::Result<u64> {
        // The destination is authoritative for the size from open onwards.
        self.destination.size()
    }

    fn sync(&self) -> io::Result<()> {
        // The source is read-only; only the destination needs flushing.
        self.destination.sync()
    }

    fn lock(&self, lock: bool) -> io::Result<()> {
        self.destination.lock(lock)
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        trace!("closing {:?} file {}", self.file_type, self.name.display());
        if self.shared.fill_holes_on_close() {
            self.fill_holes()?;
        }
        Ok(())
    }
}

impl Drop for LiveRestoreFile {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("failed to close {}: {}", self.name.display(), err);
        }
    }
}
