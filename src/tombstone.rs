//! Tombstones: deletion markers persisted in the destination.
//!
//! A tombstone is a zero-byte file at `<path><TOMBSTONE_SUFFIX>`. Its
//! presence means the logical name was removed or rewritten in the
//! destination and the source must never be consulted for it again.
//! Tombstones are created by remove and by both sides of a rename, always
//! *after* the associated destination change so a crash can lose the marker
//! but never hide data that was still needed.

use std::io;
use std::path::Path;
use std::path::PathBuf;

use log::debug;
use log::trace;

use crate::FileHandle;
use crate::FileSystem;
use crate::FileType;
use crate::OpenFlags;
use crate::posix::PosixFileSystem;

/// Suffix appended to a file's destination path to form its tombstone path.
///
/// The suffix is part of the persistent destination layout and must never
/// change, or existing restores would stop seeing their deletions.
pub const TOMBSTONE_SUFFIX: &str = ".wt_lr_tombstone";

/// The tombstone path for a backing file path.
pub(crate) fn tombstone_path(path: &Path) -> PathBuf {
    let mut marker = path.as_os_str().to_os_string();
    marker.push(TOMBSTONE_SUFFIX);
    PathBuf::from(marker)
}

/// Whether a directory entry is a tombstone marker.
pub(crate) fn is_tombstone(name: &str) -> bool {
    name.ends_with(TOMBSTONE_SUFFIX)
}

/// Create the tombstone for a destination backing path.
///
/// Creation is idempotent and carries the caller's durability hint through
/// to the marker file.
pub(crate) fn create(os: &PosixFileSystem, path: &Path, flags: OpenFlags) -> io::Result<()> {
    let marker = tombstone_path(path);
    let mut open_flags = OpenFlags::CREATE;
    if flags.contains(OpenFlags::DURABLE) {
        open_flags |= OpenFlags::DURABLE;
    }
    debug!("creating tombstone: {}", marker.display());
    let fh = os.open_file(&marker, FileType::Regular, open_flags)?;
    fh.close()
}

/// Whether the tombstone for a destination backing path exists.
pub(crate) fn exists(os: &PosixFileSystem, path: &Path) -> io::Result<bool> {
    let marker = tombstone_path(path);
    let exist = os.exist(&marker)?;
    trace!(
        "tombstone check for {}: {}",
        path.display(),
        if exist { "present" } else { "absent" }
    );
    Ok(exist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_appended_verbatim() {
        assert_eq!(
            tombstone_path(Path::new("/db/table.data")),
            Path::new("/db/table.data.wt_lr_tombstone")
        );
    }

    #[test]
    fn marker_names_are_recognized() {
        assert!(is_tombstone("table.data.wt_lr_tombstone"));
        assert!(!is_tombstone("table.data"));
        assert!(!is_tombstone("wt_lr_tombstone.data"));
    }
}
