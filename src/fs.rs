//! The live-restore overlay file system.
//!
//! The overlay resolves every logical name against two layers: the
//! writable destination (checked first, authoritative when present) and
//! the read-only source. Opening a file binds both layers into a
//! [`LiveRestoreFile`]; metadata operations (remove, rename) work on the
//! layers directly and record their effects with tombstones so the source
//! can never resurrect a name the engine has dropped.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use log::debug;
use log::info;
use log::trace;

use crate::FileHandle;
use crate::FileSystem;
use crate::FileType;
use crate::OpenFlags;
use crate::config::Options;
use crate::extent::HoleList;
use crate::handle::LiveRestoreFile;
use crate::layer::Layer;
use crate::layer::LayerKind;
use crate::posix::PosixFile;
use crate::posix::PosixFileSystem;
use crate::tombstone;

/// State shared between the overlay and every handle it opens.
#[derive(Debug)]
pub(crate) struct FsShared {
    fill_holes_on_close: bool,
    shutdown: AtomicBool,
    active: AtomicBool,
}

impl FsShared {
    fn new(fill_holes_on_close: bool) -> FsShared {
        FsShared {
            fill_holes_on_close,
            shutdown: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn fill_holes_on_close(&self) -> bool {
        self.fill_holes_on_close
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// A live-restore overlay over a destination and a source directory.
#[derive(Debug)]
pub struct LiveRestoreFs {
    os: PosixFileSystem,
    destination: Layer,
    source: Layer,
    threads_max: u8,
    shared: Arc<FsShared>,
}

impl LiveRestoreFs {
    /// Build the overlay for a destination root.
    ///
    /// The source directory named by `options.path` is opened once as a
    /// smoke test; its contents are not validated here.
    pub fn create(destination: impl Into<PathBuf>, options: Options) -> io::Result<LiveRestoreFs> {
        let os = PosixFileSystem::new();
        os.open_file(&options.path, FileType::Directory, OpenFlags::empty())?
            .close()?;

        let destination = Layer::new(LayerKind::Destination, destination);
        let source = Layer::new(LayerKind::Source, options.path);
        info!(
            "live restore started: source {}, destination {}",
            source.home.display(),
            destination.home.display()
        );

        Ok(LiveRestoreFs {
            os,
            destination,
            source,
            threads_max: options.threads_max,
            shared: Arc::new(FsShared::new(options.fill_holes_on_close)),
        })
    }

    /// Advisory cap on background migration workers, recorded for the
    /// engine's scheduler.
    pub fn threads_max(&self) -> u8 {
        self.threads_max
    }

    /// Whether the overlay is live: true from construction until
    /// [`terminate`](FileSystem::terminate). Other engine subsystems key
    /// off this to know a restore is in flight.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Raise the engine-wide shutdown signal. In-flight
    /// [`fill_holes`](LiveRestoreFile::fill_holes) sweeps stop before
    /// their next chunk.
    pub fn request_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
    }

    /// Find which layer holds the ground-truth file for a name.
    ///
    /// Tombstones are deliberately not consulted: rename has to locate the
    /// real file wherever it lives. Callers that must honor deletions
    /// (open, exist, directory listing) check for tombstones themselves.
    pub(crate) fn find_layer(&self, name: &Path) -> io::Result<Option<LayerKind>> {
        if self.has_file(&self.destination, name)? {
            return Ok(Some(LayerKind::Destination));
        }
        if self.has_file(&self.source, name)? {
            return Ok(Some(LayerKind::Source));
        }
        Ok(None)
    }

    fn dest_path(&self, name: &Path) -> io::Result<PathBuf> {
        self.destination.backing_path(&self.destination.home, name)
    }

    fn source_path(&self, name: &Path) -> io::Result<PathBuf> {
        self.source.backing_path(&self.destination.home, name)
    }

    fn has_file(&self, layer: &Layer, name: &Path) -> io::Result<bool> {
        let path = layer.backing_path(&self.destination.home, name)?;
        self.os.exist(&path)
    }

    fn has_tombstone(&self, name: &Path) -> io::Result<bool> {
        tombstone::exists(&self.os, &self.dest_path(name)?)
    }

    fn create_tombstone(&self, name: &Path, flags: OpenFlags) -> io::Result<()> {
        tombstone::create(&self.os, &self.dest_path(name)?, flags)
    }

    /// Rebuild a destination file's unrestored ranges from its sparse map.
    ///
    /// The file starts as one hole covering `[0, size)`; every data region
    /// the file system reports is subtracted, leaving exactly the ranges
    /// that have never been written.
    fn discover_dest_holes(name: &Path, dest: &PosixFile) -> io::Result<HoleList> {
        let size = dest.size()?;
        let mut holes = HoleList::spanning(size);
        if size == 0 {
            return Ok(holes);
        }
        let mut probe = 0;
        while let Some(data_off) = dest.seek_data(probe)? {
            // Every data region is followed by a hole, if only the
            // implicit one at end of file.
            let data_end = dest.seek_hole(data_off)?;
            debug_assert!(data_end > data_off);
            trace!(
                "{}: data region {}-{}",
                name.display(),
                data_off,
                data_end
            );
            holes.subtract(data_off, (data_end - data_off) as usize);
            probe = data_end;
        }
        Ok(holes)
    }

    fn list_or_empty(&self, directory: &Path, prefix: &str) -> io::Result<Vec<String>> {
        match self.os.directory_list(directory, prefix) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            result => result,
        }
    }

    /// List the overlay's view of a directory: destination entries that
    /// are not tombstones, plus source entries whose logical name has
    /// neither a destination file nor a tombstone.
    fn list_layers(&self, directory: &Path, prefix: &str, single: bool) -> io::Result<Vec<String>> {
        debug!(
            "directory list {} (prefix {:?})",
            directory.display(),
            prefix
        );
        let mut entries = Vec::new();

        let dest_dir = self.dest_path(directory)?;
        for name in self.list_or_empty(&dest_dir, prefix)? {
            if tombstone::is_tombstone(&name) {
                continue;
            }
            entries.push(name);
            if single {
                return Ok(entries);
            }
        }

        let source_dir = self.source_path(directory)?;
        for name in self.list_or_empty(&source_dir, prefix)? {
            let logical = directory.join(&name);
            if self.has_file(&self.destination, &logical)? || self.has_tombstone(&logical)? {
                continue;
            }
            entries.push(name);
            if single {
                return Ok(entries);
            }
        }
        Ok(entries)
    }

    fn not_found(name: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("live restore cannot find: {}", name.display()),
        )
    }
}

impl FileSystem for LiveRestoreFs {
    type Handle = LiveRestoreFile;

    fn open_file(
        &self,
        name: &Path,
        file_type: FileType,
        flags: OpenFlags,
    ) -> io::Result<LiveRestoreFile> {
        debug!("open {} ({:?}, {:?})", name.display(), file_type, flags);
        if file_type == FileType::Directory {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "directories cannot be opened through the overlay",
            ));
        }

        let dest_path = self.dest_path(name)?;
        let dest_exist = self.os.exist(&dest_path)?;
        let have_tombstone = tombstone::exists(&self.os, &dest_path)?;

        if !dest_exist
            && have_tombstone
            && !flags.intersects(OpenFlags::CREATE | OpenFlags::EXCLUSIVE)
        {
            // The tombstone hides whatever the source may still hold, so
            // without a create flag there is nothing to open.
            return Err(Self::not_found(name));
        }

        let mut dest_flags = flags;
        if !dest_exist {
            dest_flags |= OpenFlags::CREATE;
        }
        // The destination handle backs promotions and the size fix-up
        // below, so it stays writable even for read-only opens.
        dest_flags.remove(OpenFlags::READONLY);
        let destination = self.os.open_file(&dest_path, file_type, dest_flags)?;

        let mut holes = Self::discover_dest_holes(name, &destination)?;
        let mut complete = false;
        let mut source = None;

        if have_tombstone {
            // The destination is authoritative; never look at the source,
            // even if it still holds a file under this name.
            complete = true;
            holes.clear();
        } else if self.has_file(&self.source, name)? {
            // The caller's create flags make no sense against the
            // read-only layer.
            let mut source_flags = flags;
            source_flags.remove(OpenFlags::CREATE | OpenFlags::EXCLUSIVE);
            source_flags.insert(OpenFlags::READONLY);
            let src = self
                .os
                .open_file(&self.source_path(name)?, file_type, source_flags)?;

            if !dest_exist {
                // A brand-new destination file backed by a source file:
                // match the source's size with a direct truncate, below
                // the hole accounting, then cover the file with one hole.
                let source_size = src.size()?;
                debug!(
                    "backing new file {} with {} source bytes",
                    name.display(),
                    source_size
                );
                destination.truncate(source_size)?;
                holes = HoleList::spanning(source_size);
            }
            source = Some(src);
        } else {
            // Nothing to restore from, so the destination is complete by
            // definition; any sparse regions it has are its own contents.
            complete = true;
            holes.clear();
        }

        if let Err(violation) = holes.validate() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("hole list for {} is corrupt: {}", name.display(), violation),
            ));
        }
        if let (Some(end), Some(src)) = (holes.last_end(), &source) {
            // A hole past the end of the source would promote junk bytes.
            let source_size = src.size()?;
            if end > source_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "hole list for {} extends past the end of the source file ({} > {})",
                        name.display(),
                        end,
                        source_size
                    ),
                ));
            }
        }

        Ok(LiveRestoreFile::new(
            name.to_path_buf(),
            file_type,
            destination,
            source,
            holes,
            complete,
            Arc::clone(&self.shared),
        ))
    }

    fn exist(&self, name: &Path) -> io::Result<bool> {
        if self.has_file(&self.destination, name)? {
            return Ok(true);
        }
        if self.has_tombstone(name)? {
            return Ok(false);
        }
        self.has_file(&self.source, name)
    }

    fn remove(&self, name: &Path, flags: OpenFlags) -> io::Result<()> {
        let Some(layer) = self.find_layer(name)? else {
            return Ok(());
        };
        debug!("remove {}", name.display());
        if layer == LayerKind::Destination {
            self.os.remove(&self.dest_path(name)?, flags)?;
        }
        // Tombstone strictly after the unlink: a crash in between leaves
        // the file visible for a retry instead of resurrecting the source
        // copy under a half-removed name. The marker also covers names
        // that only ever existed in the source.
        self.create_tombstone(name, flags)
    }

    fn rename(&self, from: &Path, to: &Path, flags: OpenFlags) -> io::Result<()> {
        debug!("rename {} -> {}", from.display(), to.display());
        let Some(layer) = self.find_layer(from)? else {
            return Err(Self::not_found(from));
        };
        if layer == LayerKind::Destination {
            self.os
                .rename(&self.dest_path(from)?, &self.dest_path(to)?, flags)?;
        }
        // Hide any source-side `from` and mark `to` as
        // destination-authoritative. Not atomic with the rename above: a
        // crash in between can leave the old name visible from the source.
        self.create_tombstone(to, flags)?;
        self.create_tombstone(from, flags)
    }

    fn size(&self, name: &Path) -> io::Result<u64> {
        let Some(layer) = self.find_layer(name)? else {
            return Err(Self::not_found(name));
        };
        // Every file the engine works with has a destination presence, and
        // the destination size is the authoritative one.
        assert_eq!(
            layer,
            LayerKind::Destination,
            "no destination file for {}",
            name.display()
        );
        self.os.size(&self.dest_path(name)?)
    }

    fn directory_list(&self, directory: &Path, prefix: &str) -> io::Result<Vec<String>> {
        self.list_layers(directory, prefix, false)
    }

    fn directory_list_single(&self, directory: &Path, prefix: &str) -> io::Result<Vec<String>> {
        self.list_layers(directory, prefix, true)
    }

    fn terminate(&self) -> io::Result<()> {
        info!("live restore stopped");
        self.shared.active.store(false, Ordering::Relaxed);
        self.os.terminate()
    }
}
