//! File access abstraction and the host-backed implementation.
//!
//! [`HostFileStore`] opens the parent directory of each path with ambient
//! authority and performs the operation relative to it, the same way the
//! configuration store does for `hostprep.toml`.

use std::io;
use std::os::unix::fs::PermissionsExt as _;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs::Permissions, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised by [`FileStore`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FileStoreError {
    /// Raised when a filesystem operation fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a glob pattern is not a literal directory followed by a
    /// name prefix and a single trailing `*`.
    #[error(
        "unsupported glob pattern {pattern}: only a trailing `*` in the final component is allowed"
    )]
    UnsupportedPattern {
        /// Pattern that was rejected.
        pattern: String,
    },
}

impl FileStoreError {
    pub(crate) fn io(path: &Utf8Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Synchronous file operations required by the provisioning engines.
pub trait FileStore {
    /// Returns `true` when `path` exists. Access errors count as absent.
    fn exists(&self, path: &Utf8Path) -> bool;

    /// Reads the whole file at `path` as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::Io`] when the file cannot be read.
    fn read_to_string(&self, path: &Utf8Path) -> Result<String, FileStoreError>;

    /// Writes `contents` to `path`, replacing any existing file, and applies
    /// `mode` to it.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::Io`] when the file cannot be written.
    fn write_file(&self, path: &Utf8Path, contents: &str, mode: u32)
    -> Result<(), FileStoreError>;

    /// Creates `path` and any missing parents.
    ///
    /// `mode` is applied to `path` only when it is newly created; an existing
    /// directory keeps its permissions.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::Io`] when a directory cannot be created.
    fn create_dir_all(&self, path: &Utf8Path, mode: u32) -> Result<(), FileStoreError>;

    /// Expands `pattern` into the sorted list of existing matching paths.
    ///
    /// The pattern is a literal directory followed by a name prefix and a
    /// trailing `*`, as in `/sys/class/net/*` or `/dev/xvd*`.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::UnsupportedPattern`] for any other wildcard
    /// use, or [`FileStoreError::Io`] when the parent cannot be listed.
    fn glob(&self, pattern: &str) -> Result<Vec<Utf8PathBuf>, FileStoreError>;

    /// Reads `path` when it exists.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::Io`] when the file exists but cannot be read.
    fn read_if_exists(&self, path: &Utf8Path) -> Result<Option<String>, FileStoreError> {
        if !self.exists(path) {
            return Ok(None);
        }
        self.read_to_string(path).map(Some)
    }
}

/// [`FileStore`] backed by the host filesystem via `cap-std`.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostFileStore;

impl HostFileStore {
    fn open_parent(path: &Utf8Path) -> Result<(Dir, &str), FileStoreError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = path.file_name().ok_or_else(|| FileStoreError::Io {
            path: path.to_path_buf(),
            message: String::from("path is missing a final component"),
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| FileStoreError::io(path, &err))?;
        Ok((dir, file_name))
    }
}

fn permissions(mode: u32) -> Permissions {
    Permissions::from_std(std::fs::Permissions::from_mode(mode))
}

impl FileStore for HostFileStore {
    fn exists(&self, path: &Utf8Path) -> bool {
        Self::open_parent(path)
            .and_then(|(dir, name)| {
                dir.try_exists(name)
                    .map_err(|err| FileStoreError::io(path, &err))
            })
            .unwrap_or(false)
    }

    fn read_to_string(&self, path: &Utf8Path) -> Result<String, FileStoreError> {
        let (dir, name) = Self::open_parent(path)?;
        dir.read_to_string(name)
            .map_err(|err| FileStoreError::io(path, &err))
    }

    fn write_file(
        &self,
        path: &Utf8Path,
        contents: &str,
        mode: u32,
    ) -> Result<(), FileStoreError> {
        let (dir, name) = Self::open_parent(path)?;
        dir.write(name, contents)
            .map_err(|err| FileStoreError::io(path, &err))?;
        dir.set_permissions(name, permissions(mode))
            .map_err(|err| FileStoreError::io(path, &err))
    }

    fn create_dir_all(&self, path: &Utf8Path, mode: u32) -> Result<(), FileStoreError> {
        if self.exists(path) {
            return Ok(());
        }
        Dir::create_ambient_dir_all(path, ambient_authority())
            .map_err(|err| FileStoreError::io(path, &err))?;
        let (dir, name) = Self::open_parent(path)?;
        dir.set_permissions(name, permissions(mode))
            .map_err(|err| FileStoreError::io(path, &err))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<Utf8PathBuf>, FileStoreError> {
        let (parent, component) = split_glob(pattern)?;
        let dir = Dir::open_ambient_dir(&parent, ambient_authority())
            .map_err(|err| FileStoreError::io(&parent, &err))?;
        let entries = dir
            .entries()
            .map_err(|err| FileStoreError::io(&parent, &err))?;

        let mut matches = Vec::new();
        for entry in entries {
            let name = entry
                .and_then(|entry| entry.file_name())
                .map_err(|err| FileStoreError::io(&parent, &err))?;
            if component_matches(component, &name) {
                matches.push(parent.join(name));
            }
        }
        matches.sort();
        Ok(matches)
    }
}

/// Splits `pattern` into its literal parent directory and the name prefix
/// that precedes the trailing `*`.
pub(crate) fn split_glob(pattern: &str) -> Result<(Utf8PathBuf, &str), FileStoreError> {
    let unsupported = || FileStoreError::UnsupportedPattern {
        pattern: pattern.to_owned(),
    };
    let (parent, component) = pattern
        .rsplit_once('/')
        .map_or((".", pattern), |(parent, component)| {
            (if parent.is_empty() { "/" } else { parent }, component)
        });
    let prefix = component.strip_suffix('*').ok_or_else(unsupported)?;
    if parent.contains(['*', '?']) || prefix.contains(['*', '?']) {
        return Err(unsupported());
    }
    Ok((Utf8PathBuf::from(parent), prefix))
}

/// Returns `true` when `name` starts with `prefix`.
///
/// Hidden names only match prefixes that start with a dot.
pub(crate) fn component_matches(prefix: &str, name: &str) -> bool {
    if name.starts_with('.') && !prefix.starts_with('.') {
        return false;
    }
    name.starts_with(prefix)
}
