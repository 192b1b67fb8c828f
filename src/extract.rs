//! Unpacks a ZIP archive into a directory tree.
//!
//! Entries are written one at a time, in archive order.
//! The first failure stops everything and is returned as an [`ExtractError`]
//! naming the stage and the entry; whatever was already written stays put.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use log::*;

use crate::read::{FileMetadata, ZipArchive};
use crate::result::*;
use crate::sanitize::enclosed_path;

/// Mode for files whose archive didn't record one
const DEFAULT_FILE_MODE: u32 = 0o644;

/// What an extraction wrote
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    /// File entries written
    pub files: usize,
    /// Directory entries created (or found already there)
    pub directories: usize,
    /// Bytes written across all files
    pub bytes: u64,
}

/// Extracts the ZIP archive at `source` into `destination`.
///
/// `destination` and any missing ancestors are created first.
/// Every entry is resolved beneath it; an entry naming a path outside of it
/// fails the extraction with [`ExtractError::UnsafePath`].
/// Existing files are overwritten.
///
/// The archive is read into memory in full before anything is written.
///
/// ```no_run
/// let summary = zipgrab::extract("repo.zip", "unzipped")?;
/// println!("Wrote {} files", summary.files);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    destination: Q,
) -> ExtractResult<ExtractSummary> {
    let source = source.as_ref();
    info!("Reading {}", source.display());
    let bytes = fs::read(source).map_err(|e| ExtractError::Open {
        path: source.to_owned(),
        source: e,
    })?;

    let (archive, prepended) =
        ZipArchive::with_prepended_data(&bytes).map_err(|e| ExtractError::Archive {
            path: source.to_owned(),
            source: e,
        })?;
    if prepended != 0 {
        debug!("{} bytes precede the archive", prepended);
    }

    extract_archive(&archive, destination.as_ref())
}

/// Extracts every entry of an already-loaded archive into `destination`.
///
/// Same rules as [`extract()`].
pub fn extract_archive(archive: &ZipArchive, destination: &Path) -> ExtractResult<ExtractSummary> {
    info!(
        "Extracting {} entries to {}",
        archive.entries().len(),
        destination.display()
    );
    fs::create_dir_all(destination).map_err(|e| ExtractError::CreateDestination {
        path: destination.to_owned(),
        source: e,
    })?;

    let mut summary = ExtractSummary::default();
    for entry in archive.entries() {
        let target = resolve(destination, entry)?;
        if entry.is_dir() {
            create_dir(entry, &target)?;
            summary.directories += 1;
        } else {
            summary.bytes += extract_file(archive, entry, &target)?;
            summary.files += 1;
        }
    }

    info!(
        "Extracted {} files ({} bytes) and {} directories",
        summary.files, summary.bytes, summary.directories
    );
    Ok(summary)
}

/// Finds where an entry goes, refusing anything outside `destination`.
fn resolve(destination: &Path, entry: &FileMetadata) -> ExtractResult<PathBuf> {
    let relative = enclosed_path(&entry.path).ok_or_else(|| ExtractError::UnsafePath {
        entry: entry.path.clone().into_owned(),
    })?;

    // A file needs a name; only a directory can be the destination itself.
    if relative.as_str().is_empty() && entry.is_file() {
        return Err(ExtractError::UnsafePath {
            entry: entry.path.clone().into_owned(),
        });
    }
    refuse_symlinked_directories(destination, &relative, entry)?;
    Ok(destination.join(relative))
}

/// Fails if a directory already on the way to the entry is a symlink.
/// Writing through one could land anywhere.
///
/// A file's own target isn't checked here; [`create_file`] replaces it.
fn refuse_symlinked_directories(
    destination: &Path,
    relative: &Utf8Path,
    entry: &FileMetadata,
) -> ExtractResult<()> {
    let components: Vec<_> = relative.components().collect();
    let directories = if entry.is_dir() {
        &components[..]
    } else {
        &components[..components.len().saturating_sub(1)]
    };

    let mut current = destination.to_path_buf();
    for component in directories {
        current.push(component.as_str());
        let mkdir_error = |path: PathBuf, e: io::Error| ExtractError::CreateDir {
            entry: entry.path.clone().into_owned(),
            path,
            source: e,
        };
        match fs::symlink_metadata(&current) {
            Ok(found) if found.file_type().is_symlink() => {
                return Err(mkdir_error(
                    current,
                    io::Error::new(io::ErrorKind::Other, "Symlink in place of a directory"),
                ));
            }
            Ok(_) => {}
            // Nothing further down exists yet, so it'll all be real directories.
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(mkdir_error(current, e)),
        }
    }
    Ok(())
}

fn create_dir(entry: &FileMetadata, target: &Path) -> ExtractResult<()> {
    debug!("Creating directory {}", target.display());
    fs::create_dir_all(target).map_err(|e| ExtractError::CreateDir {
        entry: entry.path.clone().into_owned(),
        path: target.to_owned(),
        source: e,
    })
}

/// Writes one file entry to `target`, returning the number of bytes written.
///
/// The entry's reader and the new file are both dropped before this returns,
/// whether or not the copy succeeded.
fn extract_file(archive: &ZipArchive, entry: &FileMetadata, target: &Path) -> ExtractResult<u64> {
    if let Some(parent) = target.parent() {
        create_dir(entry, parent)?;
    }

    debug!("Writing {} to {}", entry.path, target.display());
    let mut sink = create_file(entry, target)?;

    let mut reader = archive.read(entry).map_err(|e| ExtractError::OpenEntry {
        entry: entry.path.clone().into_owned(),
        source: e,
    })?;

    io::copy(&mut reader, &mut sink).map_err(|e| ExtractError::Copy {
        entry: entry.path.clone().into_owned(),
        path: target.to_owned(),
        source: e,
    })
}

/// Creates (or replaces) the file for an entry with the entry's permissions.
fn create_file(entry: &FileMetadata, target: &Path) -> ExtractResult<File> {
    let create_error = |e: io::Error| ExtractError::CreateFile {
        entry: entry.path.clone().into_owned(),
        path: target.to_owned(),
        source: e,
    };

    // Replace whatever's there instead of writing through it:
    // a read-only file from a previous run can't be truncated,
    // and a symlink could point anywhere.
    match fs::symlink_metadata(target) {
        Ok(existing) if !existing.is_dir() => {
            trace!("Replacing {}", target.display());
            fs::remove_file(target).map_err(create_error)?;
        }
        // Directories fail below, as they should.
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(create_error(e)),
    }

    let mode = entry.permissions().unwrap_or(DEFAULT_FILE_MODE);
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    set_mode(&mut options, mode);
    let file = options.open(target).map_err(create_error)?;
    apply_permissions(&file, mode).map_err(create_error)?;
    Ok(file)
}

#[cfg(unix)]
fn set_mode(options: &mut OpenOptions, mode: u32) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(mode);
}

#[cfg(not(unix))]
fn set_mode(_options: &mut OpenOptions, _mode: u32) {}

/// Sets the mode again on the open file, since the umask filtered the one we opened with.
#[cfg(unix)]
fn apply_permissions(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn apply_permissions(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}
