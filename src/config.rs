//! Live-restore configuration options.

use std::io;
use std::path::PathBuf;

/// Default advisory cap on background migration workers.
const DEFAULT_THREADS_MAX: u8 = 8;

/// One parsed `key=value` option from the engine's `live_restore`
/// configuration block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LiveRestoreOption {
    /// `path`: the source directory the restore reads from.
    Path(PathBuf),
    /// `threads_max`: advisory cap on background migration workers.
    ThreadsMax(u8),
    /// `debug.fill_holes_on_close`: drain a file's holes when it is closed.
    FillHolesOnClose(bool),
}

impl LiveRestoreOption {
    /// Parse a single `key=value` option string.
    pub fn from_str(s: &str) -> io::Result<LiveRestoreOption> {
        let err = |msg: String| io::Error::new(io::ErrorKind::InvalidInput, msg);
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| err(format!("expected key=value, got {s:?}")))?;
        match key {
            "path" => Ok(LiveRestoreOption::Path(PathBuf::from(value))),
            "threads_max" => value
                .parse::<u8>()
                .map(LiveRestoreOption::ThreadsMax)
                .map_err(|_| err(format!("threads_max must be an integer in 0..=255: {value:?}"))),
            "debug.fill_holes_on_close" => match value {
                "true" | "1" => Ok(LiveRestoreOption::FillHolesOnClose(true)),
                "false" | "0" => Ok(LiveRestoreOption::FillHolesOnClose(false)),
                _ => Err(err(format!(
                    "debug.fill_holes_on_close must be a boolean: {value:?}"
                ))),
            },
            _ => Err(err(format!("unknown live restore option: {key:?}"))),
        }
    }
}

/// Validated live-restore configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    /// Source directory the restore reads from.
    pub path: PathBuf,
    /// Advisory cap on background migration workers. The overlay records
    /// the value for the engine's scheduler; it does not spawn threads
    /// itself.
    pub threads_max: u8,
    /// Drain a file's remaining holes when it is closed. Debugging aid.
    pub fill_holes_on_close: bool,
}

impl Options {
    /// Configuration with the given source path and default settings.
    pub fn new(path: impl Into<PathBuf>) -> Options {
        Options {
            path: path.into(),
            threads_max: DEFAULT_THREADS_MAX,
            fill_holes_on_close: false,
        }
    }

    /// Parse a list of `key=value` option strings. `path` is required;
    /// later options override earlier ones.
    pub fn parse<S: AsRef<str>>(options: &[S]) -> io::Result<Options> {
        let mut path = None;
        let mut threads_max = DEFAULT_THREADS_MAX;
        let mut fill_holes_on_close = false;
        for option in options {
            match LiveRestoreOption::from_str(option.as_ref())? {
                LiveRestoreOption::Path(value) => path = Some(value),
                LiveRestoreOption::ThreadsMax(value) => threads_max = value,
                LiveRestoreOption::FillHolesOnClose(value) => fill_holes_on_close = value,
            }
        }
        let path = path.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "live restore requires a source path",
            )
        })?;
        Ok(Options {
            path,
            threads_max,
            fill_holes_on_close,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options() {
        let options = Options::parse(&[
            "path=/backup/db",
            "threads_max=12",
            "debug.fill_holes_on_close=true",
        ])
        .unwrap();
        assert_eq!(
            options,
            Options {
                path: PathBuf::from("/backup/db"),
                threads_max: 12,
                fill_holes_on_close: true,
            }
        );
    }

    #[test]
    fn defaults_apply_when_only_path_is_given() {
        let options = Options::parse(&["path=/backup/db"]).unwrap();
        assert_eq!(options, Options::new("/backup/db"));
        assert!(!options.fill_holes_on_close);
    }

    #[test]
    fn path_is_required() {
        let err = Options::parse(&["threads_max=2"]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn malformed_options_are_rejected() {
        for option in [
            "path",
            "threads_max=many",
            "threads_max=300",
            "debug.fill_holes_on_close=maybe",
            "unknown=1",
        ] {
            let err = Options::parse(&[option]).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{option}");
        }
    }
}
