//! Layer descriptors and logical-name mapping.
//!
//! A logical file name always begins with the destination root. Mapping a
//! name into a layer is pure path arithmetic: strip the destination root
//! and re-prefix with the layer's home.

use std::io;
use std::path::Path;
use std::path::PathBuf;

/// Which of the two overlay layers a path or file belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LayerKind {
    /// The writable layer the engine runs against.
    Destination,
    /// The read-only layer data is restored from.
    Source,
}

/// One overlay layer: a kind plus the directory it is rooted at.
#[derive(Debug)]
pub(crate) struct Layer {
    pub(crate) kind: LayerKind,
    pub(crate) home: PathBuf,
}

impl Layer {
    pub(crate) fn new(kind: LayerKind, home: impl Into<PathBuf>) -> Layer {
        Layer {
            kind,
            home: home.into(),
        }
    }

    /// Map a logical name to the path of its backing file in this layer.
    ///
    /// `name` must begin with the destination home; for the destination
    /// layer it is returned unchanged, for the source layer the destination
    /// prefix is replaced with the source home.
    pub(crate) fn backing_path(&self, dest_home: &Path, name: &Path) -> io::Result<PathBuf> {
        let relative = name.strip_prefix(dest_home).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "name {:?} is not rooted in the destination directory {:?}",
                    name, dest_home
                ),
            )
        })?;
        Ok(match self.kind {
            LayerKind::Destination => name.to_path_buf(),
            LayerKind::Source => self.home.join(relative),
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_paths_pass_through() {
        let layer = Layer::new(LayerKind::Destination, "/db");
        let path = layer
            .backing_path(Path::new("/db"), Path::new("/db/a/table.data"))
            .unwrap();
        assert_eq!(path, Path::new("/db/a/table.data"));
    }

    #[test]
    fn source_paths_swap_the_root() {
        let layer = Layer::new(LayerKind::Source, "/backup");
        let path = layer
            .backing_path(Path::new("/db"), Path::new("/db/a/table.data"))
            .unwrap();
        assert_eq!(path, Path::new("/backup/a/table.data"));

        // Relative destination roots work the same way.
        let path = layer
            .backing_path(Path::new("db_home"), Path::new("db_home/log.0001"))
            .unwrap();
        assert_eq!(path, Path::new("/backup/log.0001"));
    }

    #[test]
    fn the_root_itself_maps_to_the_layer_home() {
        let layer = Layer::new(LayerKind::Source, "/backup");
        let path = layer
            .backing_path(Path::new("/db"), Path::new("/db"))
            .unwrap();
        assert_eq!(path, Path::new("/backup"));
    }

    #[test]
    fn foreign_names_are_rejected() {
        let layer = Layer::new(LayerKind::Source, "/backup");
        let err = layer
            .backing_path(Path::new("/db"), Path::new("/elsewhere/table.data"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn prefix_match_is_by_component() {
        // "/db" must not be treated as a prefix of "/db2".
        let layer = Layer::new(LayerKind::Source, "/backup");
        assert!(
            layer
                .backing_path(Path::new("/db"), Path::new("/db2/table.data"))
                .is_err()
        );
    }
}
