//! Shared filesystem helpers built on `cap-std` and `camino`.
//!
//! Snapshot inputs, cache directories and SQLite artefacts are all addressed
//! through these helpers so that every crate resolves paths the same way.
#![forbid(unsafe_code)]

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;

/// Open a UTF-8 file path using ambient authority.
pub fn open_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Open the directory holding `path` and return it with the final path
/// component.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} has no final component")))?
        .to_owned();
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, name))
}

/// Ensure the parent directory for `path` exists.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Create `path` and any missing ancestors.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    let (base, relative) = base_dir_and_relative(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    base.create_dir_all(&relative)
}

/// Remove `path` and its contents; a missing directory is not an error.
pub fn remove_dir_if_exists(path: &Utf8Path) -> io::Result<()> {
    let removed = open_dir_and_file(path).and_then(|(dir, name)| dir.remove_dir_all(name));
    match removed {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Return whether a path exists and is a regular file.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = open_dir_and_file(path)?;
    Ok(dir.metadata(name)?.is_file())
}

/// Size in bytes of the file at `path`.
pub fn file_len(path: &Utf8Path) -> io::Result<u64> {
    let (dir, name) = open_dir_and_file(path)?;
    Ok(dir.metadata(name)?.len())
}

/// Split `path` into an ambient base directory (its root or prefix, else the
/// working directory) and the remainder relative to it.
pub fn base_dir_and_relative(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let mut base = Utf8PathBuf::new();
    let mut relative = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => base.push(component.as_str()),
            other => relative.push(other.as_str()),
        }
    }
    if base.as_str().is_empty() {
        base.push(".");
    }
    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    Ok((dir, relative))
}
