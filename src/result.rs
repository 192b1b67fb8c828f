//! Error types and the related `Result<T>` aliases

use std::io;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors from decoding a ZIP archive.
#[derive(Debug, Error)]
pub enum ZipError {
    /// The ZIP archive contained invalid data per the ZIP format.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The ZIP archive is prepended some unknown bytes.
    /// (Use [`ZipArchive::with_prepended_data()`] if this is okay.)
    ///
    /// [`ZipArchive::with_prepended_data()`]: crate::read::ZipArchive::with_prepended_data
    #[error("Archive prepended with {0} unknown bytes")]
    PrependedWithUnknownBytes(usize),

    /// A 64-bit size or offset doesn't fit in a usize,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

/// Errors from extracting an archive into a directory tree.
///
/// Each variant is one stage of extraction.
/// Any of them leaves the destination partially written.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Couldn't read archive {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't load archive {}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ZipError,
    },

    #[error("Couldn't create destination {}", path.display())]
    CreateDestination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The entry's name is absolute or climbs out of the destination with `..`
    #[error("Entry {entry} would be written outside the destination")]
    UnsafePath { entry: Utf8PathBuf },

    #[error("Couldn't create directory {} for {entry}", path.display())]
    CreateDir {
        entry: Utf8PathBuf,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't create file {} for {entry}", path.display())]
    CreateFile {
        entry: Utf8PathBuf,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't open entry {entry}")]
    OpenEntry {
        entry: Utf8PathBuf,
        #[source]
        source: ZipError,
    },

    #[error("Couldn't copy entry {entry} to {}", path.display())]
    Copy {
        entry: Utf8PathBuf,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    /// A short name for the stage of extraction that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            ExtractError::Open { .. } => "open",
            ExtractError::Archive { .. } => "archive",
            ExtractError::UnsafePath { .. } => "path",
            ExtractError::CreateDestination { .. } | ExtractError::CreateDir { .. } => "mkdir",
            ExtractError::CreateFile { .. } => "create",
            ExtractError::OpenEntry { .. } => "open-entry",
            ExtractError::Copy { .. } => "copy",
        }
    }

    /// The archive entry being processed when extraction failed, if any.
    pub fn entry(&self) -> Option<&camino::Utf8Path> {
        match self {
            ExtractError::Open { .. }
            | ExtractError::Archive { .. }
            | ExtractError::CreateDestination { .. } => None,
            ExtractError::UnsafePath { entry }
            | ExtractError::CreateDir { entry, .. }
            | ExtractError::CreateFile { entry, .. }
            | ExtractError::OpenEntry { entry, .. }
            | ExtractError::Copy { entry, .. } => Some(entry),
        }
    }
}
