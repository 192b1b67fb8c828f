//! zipgrab unpacks a ZIP archive into a directory tree:
//!
//! ```no_run
//! let summary = zipgrab::extract("repo.zip", "unzipped")?;
//! println!("{} files, {} bytes", summary.files, summary.bytes);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! With the `fetch` feature (on by default), the `fetch` module
//! pulls the archive down first.
//!
//! Extraction is deliberately boring:
//! one entry at a time, in the order the central directory lists them,
//! creating parent directories as needed and overwriting whatever's there.
//! Entry names that would escape the destination (`../../etc/passwd`, `/etc/passwd`)
//! stop the extraction with [`ExtractError::UnsafePath`].
//! The first error of any kind stops the extraction,
//! and the destination is left as it was at that point.
//!
//! The archive is read into memory in full first.
//! Callers holding the bytes already can build a [`ZipArchive`] themselves,
//! look at its entries, and hand it to [`extract_archive()`].

pub mod extract;
#[cfg(feature = "fetch")]
pub mod fetch;
pub mod read;
pub mod result;
pub mod sanitize;

pub use extract::{extract, extract_archive, ExtractSummary};
pub use read::{CompressionMethod, FileMetadata, ZipArchive};
pub use result::{ExtractError, ExtractResult, ZipError, ZipResult};

mod crc_reader;
mod spec;
