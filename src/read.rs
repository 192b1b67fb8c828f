//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, create a [`ZipArchive`] from its bytes,
//! walk its [`entries()`](ZipArchive::entries),
//! and [`read()`](ZipArchive::read) the ones you want.

use std::borrow::Cow;
use std::io;

use camino::Utf8Path;
use chrono::NaiveDateTime;
use flate2::read::DeflateDecoder;
use log::*;

use crate::crc_reader::Crc32Reader;
use crate::result::*;
use crate::spec::{self, to_usize, LocalMetadata};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory
#[derive(Debug, PartialEq, Eq)]
pub struct FileMetadata<'a> {
    /// Uncompressed size of the file in bytes
    pub size: usize,

    /// Compressed size of the file in bytes
    pub compressed_size: usize,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// True if the file is encrypted (decryption is unsupported)
    pub encrypted: bool,

    /// The path of the file as stored in the archive.
    /// Nothing stops this from being absolute or full of `..`;
    /// see [`enclosed_path()`](crate::sanitize::enclosed_path).
    pub path: Cow<'a, Utf8Path>,

    /// When the file was last modified, or `None` if the archive
    /// recorded a nonsensical MS-DOS timestamp.
    pub last_modified: Option<NaiveDateTime>,

    /// Unix mode bits (type and permissions), if the file was archived on a Unix OS.
    ///
    /// DOS attributes aren't converted into roughly-equivalent Unix modes.
    pub unix_mode: Option<u32>,

    pub(crate) is_dir: bool,

    /// The CRC and sizes follow the data instead of sitting in its local header.
    pub(crate) has_data_descriptor: bool,

    /// The offset to the local file header in the archive
    pub(crate) header_offset: usize,
}

impl FileMetadata<'_> {
    /// Returns true if the given entry is a directory,
    /// either by a trailing `/` or by its Unix file type.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Permission bits recorded for the entry, if any.
    /// The file type, setuid, setgid, and sticky bits are masked off.
    pub fn permissions(&self) -> Option<u32> {
        self.unix_mode.map(|mode| mode & 0o777)
    }
}

/// A ZIP archive to be read
pub struct ZipArchive<'a> {
    /// The contents of the ZIP archive, as a byte slice.
    mapping: &'a [u8],
    /// A list of entries from the ZIP's central directory
    entries: Vec<FileMetadata<'a>>,
}

impl<'a> ZipArchive<'a> {
    /// Reads a ZIP archive from a byte slice.
    ///
    /// ```no_run
    /// # use std::fs;
    /// # use zipgrab::ZipArchive;
    /// let bytes = fs::read("foo.zip")?;
    /// let archive = ZipArchive::new(&bytes)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(mapping: &'a [u8]) -> ZipResult<Self> {
        let (new_archive, archive_offset) = Self::with_prepended_data(mapping)?;
        if archive_offset != 0 {
            return Err(ZipError::PrependedWithUnknownBytes(archive_offset));
        }
        Ok(new_archive)
    }

    /// Like `ZipArchive::new()`, but allows arbitrary data to prepend the archive.
    /// Returns the ZipArchive and the number of bytes prepended to the archive.
    ///
    /// Since a ZIP archive's metadata sits at the back of the file,
    /// many formats consist of ZIP archives prepended with some other data.
    /// For example, a self-extracting archive is one with an executable in the front.
    pub fn with_prepended_data(mapping: &'a [u8]) -> ZipResult<(Self, usize)> {
        let eocdr_posit = spec::find_eocdr(mapping)?;
        let eocdr = spec::EndOfCentralDirectory::parse(&mapping[eocdr_posit..])?;
        trace!("{:?}", eocdr);

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }

        let (archive_offset, central_directory_offset, entry_count) =
            match locate_zip64(mapping, eocdr_posit, eocdr.disk_number)? {
                Some(found) => found,
                None => {
                    // Zip files can be prepended by arbitrary junk,
                    // so the stored offset can be off by however much junk there is.
                    // The central directory sits right before the EOCDR.
                    let nominal_offset = to_usize(eocdr.central_directory_offset)?;
                    let archive_offset = eocdr_posit
                        .checked_sub(to_usize(eocdr.central_directory_size)?)
                        .and_then(|actual| actual.checked_sub(nominal_offset))
                        .ok_or(ZipError::InvalidArchive(
                            "Invalid central directory size or offset",
                        ))?;
                    (archive_offset, nominal_offset, eocdr.entries as u64)
                }
            };

        let mapping = &mapping[archive_offset..];
        trace!(
            "{} entries at nominal offset {}",
            entry_count,
            central_directory_offset
        );

        let mut central_directory =
            mapping
                .get(central_directory_offset..)
                .ok_or(ZipError::InvalidArchive(
                    "Central directory offset past the end of the archive",
                ))?;

        // Don't trust the count for preallocation; it's just a number in a file.
        let mut entries = Vec::with_capacity(to_usize(entry_count)?.min(central_directory.len()));

        for _ in 0..entry_count {
            let dir_entry = spec::CentralDirectoryEntry::parse_and_consume(&mut central_directory)?;
            trace!("{:?}", dir_entry);

            let file_metadata = FileMetadata::from_cde(&dir_entry)?;
            debug!("{:?}", file_metadata);
            entries.push(file_metadata);
        }

        Ok((ZipArchive { mapping, entries }, archive_offset))
    }

    /// Returns the entries found in the ZIP archive's central directory,
    /// in the order they're listed there.
    ///
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> &[FileMetadata<'a>] {
        &self.entries
    }

    /// Reads the given file from the ZIP archive.
    ///
    /// The returned reader decompresses the file and checks its CRC-32
    /// when it reaches the end, failing that final read on a mismatch.
    pub fn read(&self, metadata: &FileMetadata) -> ZipResult<Box<dyn io::Read + Send + 'a>> {
        if metadata.encrypted {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                metadata.path
            )));
        }

        let mut file_slice =
            self.mapping
                .get(metadata.header_offset..)
                .ok_or(ZipError::InvalidArchive(
                    "Local file header offset past the end of the archive",
                ))?;
        let local_header = spec::LocalFileHeader::parse_and_consume(&mut file_slice)?;
        trace!("{:?}", local_header);
        let local_metadata = local_header.metadata()?;
        debug!("Reading {:?}", local_metadata);
        if cfg!(feature = "check-local-metadata") && !local_matches(metadata, &local_metadata) {
            return Err(ZipError::InvalidArchive(
                "Central directory entry doesn't match local file header",
            ));
        }

        let data = file_slice
            .get(..metadata.compressed_size)
            .ok_or(ZipError::InvalidArchive(
                "File data runs past the end of the archive",
            ))?;
        make_reader(metadata.compression_method, metadata.crc32, data)
    }
}

/// Looks for Zip64 records in front of the EOCDR.
///
/// Returns the archive offset, the nominal central directory offset,
/// and the number of entries, or `None` if this isn't a Zip64 archive.
fn locate_zip64(
    mapping: &[u8],
    eocdr_posit: usize,
    disk_number: u16,
) -> ZipResult<Option<(usize, usize, u64)>> {
    let locator_posit =
        match eocdr_posit.checked_sub(spec::Zip64EndOfCentralDirectoryLocator::SIZE_IN_FILE) {
            Some(posit) => posit,
            None => return Ok(None),
        };
    let locator = match spec::Zip64EndOfCentralDirectoryLocator::parse(&mapping[locator_posit..]) {
        Some(locator) => locator,
        None => return Ok(None),
    };
    trace!("{:?}", locator);

    if disk_number as u32 != locator.disk_with_central_directory {
        return Err(ZipError::UnsupportedArchive(format!(
            "No support for multi-disk archives: disk ({}) != disk with zip64 central directory ({})",
            disk_number, locator.disk_with_central_directory
        )));
    }
    if locator.disks != 1 {
        return Err(ZipError::UnsupportedArchive(format!(
            "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
            locator.disks
        )));
    }

    // Search for the zip64 EOCDR from its nominal starting position
    // to the locator. Since we start at the stored offset,
    // wherever we find it is how far the archive has been pushed back.
    let search_start = to_usize(locator.zip64_eocdr_offset)?;
    let search_space = mapping
        .get(search_start..locator_posit)
        .ok_or(ZipError::InvalidArchive(
            "Invalid Zip64 End Of Central Directory Record offset",
        ))?;
    let archive_offset = spec::find_zip64_eocdr(search_space)?;
    let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(&search_space[archive_offset..])?;
    trace!("{:?}", zip64_eocdr);

    if zip64_eocdr.disk_number != zip64_eocdr.disk_with_central_directory {
        return Err(ZipError::UnsupportedArchive(format!(
            "No support for multi-disk archives: Zip64 disk ({}) != disk with central directory ({})",
            zip64_eocdr.disk_number, zip64_eocdr.disk_with_central_directory
        )));
    }
    if zip64_eocdr.entries != zip64_eocdr.entries_on_this_disk {
        return Err(ZipError::UnsupportedArchive(format!(
            "No support for multi-disk archives: Zip64 entries ({}) != entries this disk ({})",
            zip64_eocdr.entries, zip64_eocdr.entries_on_this_disk
        )));
    }

    Ok(Some((
        archive_offset,
        to_usize(zip64_eocdr.central_directory_offset)?,
        zip64_eocdr.entries,
    )))
}

/// Checks a local file header against its central directory entry.
///
/// Entries with a data descriptor leave the CRC and sizes blank up front,
/// so those are only compared when the local header actually has them.
fn local_matches(central: &FileMetadata, local: &LocalMetadata) -> bool {
    if central.path != local.path || central.compression_method != local.compression_method {
        return false;
    }
    central.has_data_descriptor
        || local.has_data_descriptor
        || (central.crc32 == local.crc32
            && central.size == local.size
            && central.compressed_size == local.compressed_size)
}

/// Returns a boxed read trait for a compressed file,
/// given its compression method and expected CRC.
fn make_reader<'a, R: io::Read + Send + 'a>(
    compression_method: CompressionMethod,
    crc32: u32,
    reader: R,
) -> ZipResult<Box<dyn io::Read + Send + 'a>> {
    match compression_method {
        CompressionMethod::None => Ok(Box::new(Crc32Reader::new(reader, crc32))),
        CompressionMethod::Deflate => {
            let deflate_reader = DeflateDecoder::new(reader);
            Ok(Box::new(Crc32Reader::new(deflate_reader, crc32)))
        }
        CompressionMethod::Unsupported(method) => Err(ZipError::UnsupportedArchive(format!(
            "Compression method {} not supported",
            method
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn garbage_isnt_an_archive() {
        match ZipArchive::new(b"PK\x05\x06 but not really") {
            Err(ZipError::InvalidArchive(_)) => {}
            Err(other) => panic!("Got incorrect error from garbage: {:?}", other),
            Ok(_) => panic!("Got an archive back from garbage"),
        }
    }

    #[test]
    fn empty_archive() {
        // An EOCDR with nothing in front of it
        let mut bytes = vec![b'P', b'K', 5, 6];
        bytes.extend_from_slice(&[0; 18]);
        let archive = ZipArchive::new(&bytes).unwrap();
        assert!(archive.entries().is_empty());

        let mut prefixed = b"junk".to_vec();
        prefixed.extend_from_slice(&bytes);
        match ZipArchive::new(&prefixed) {
            Err(ZipError::PrependedWithUnknownBytes(4)) => {}
            Err(other) => panic!("Got incorrect error from prefixed archive: {:?}", other),
            Ok(_) => panic!("Prefixed archive should need with_prepended_data()"),
        }
        let (archive, offset) = ZipArchive::with_prepended_data(&prefixed).unwrap();
        assert_eq!(offset, 4);
        assert!(archive.entries().is_empty());
    }

    #[test]
    fn lying_entry_count() {
        // Claims one entry, but the central directory is empty.
        let mut bytes = vec![b'P', b'K', 5, 6, 0, 0, 0, 0, 1, 0, 1, 0];
        bytes.extend_from_slice(&[0; 10]);
        assert!(matches!(
            ZipArchive::new(&bytes),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn multi_disk_archives_are_refused() {
        // One entry here, two in total
        let mut bytes = vec![b'P', b'K', 5, 6, 0, 0, 0, 0, 1, 0, 2, 0];
        bytes.extend_from_slice(&[0; 10]);
        assert!(matches!(
            ZipArchive::new(&bytes),
            Err(ZipError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn unsupported_compression() {
        let err = make_reader(CompressionMethod::Unsupported(12), 0, io::empty())
            .err()
            .unwrap();
        assert!(matches!(err, ZipError::UnsupportedArchive(_)));
    }
}
