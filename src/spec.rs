//! Code specific to the ZIP file format specification.
//!
//! Record layouts and field decoding live here,
//! and the higher-level archive reader lives in the [`read`] module.
//!
//! Layout comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! Unlike a reader that trusts the lengths it finds,
//! every record here is parsed through a bounds-checked cursor:
//! a truncated or lying archive is an `InvalidArchive` error, not a panic.
//!
//! [`read`]: crate::read
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;

use camino::Utf8Path;
use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;
use memchr::memmem;

use crate::read::{CompressionMethod, FileMetadata};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// Header ID of the Zip64 extended information extra field
const ZIP64_EXTRA_FIELD: u16 = 0x0001;

/// Unix file type bits (`S_IFMT`) and the directory type (`S_IFDIR`)
const UNIX_FILE_TYPE_MASK: u32 = 0o170000;
const UNIX_DIRECTORY: u32 = 0o040000;

/// A checked cast to usize.
pub(crate) fn to_usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    usize::try_from(i.into()).map_err(|_| ZipError::InsufficientAddressSpace)
}

/// Little-endian field reader over a record.
///
/// Each read shrinks the remaining input;
/// running out yields the record's "truncated" error.
struct Fields<'a> {
    input: &'a [u8],
    truncated: &'static str,
}

impl<'a> Fields<'a> {
    fn new(input: &'a [u8], truncated: &'static str) -> Self {
        Self { input, truncated }
    }

    fn take(&mut self, count: usize) -> ZipResult<&'a [u8]> {
        if self.input.len() < count {
            return Err(ZipError::InvalidArchive(self.truncated));
        }
        let (taken, rest) = self.input.split_at(count);
        self.input = rest;
        Ok(taken)
    }

    fn magic(&mut self, expected: [u8; 4], wrong: &'static str) -> ZipResult<()> {
        if self.take(4)? != expected {
            return Err(ZipError::InvalidArchive(wrong));
        }
        Ok(())
    }

    fn array<const N: usize>(&mut self) -> ZipResult<[u8; N]> {
        let mut bytes = [0; N];
        bytes.copy_from_slice(self.take(N)?);
        Ok(bytes)
    }

    fn u16(&mut self) -> ZipResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> ZipResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> ZipResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn remaining(&self) -> &'a [u8] {
        self.input
    }
}

impl CompressionMethod {
    fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

/// The OS a file in the archive was compressed with.
/// Tells us how to read the external file attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum System {
    Dos,
    Unix,
    Unknown,
}

impl System {
    fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information. [...]
        //
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX
        //  19 - OS X (Darwin)
        match source_version >> 8 {
            0 => System::Dos,
            3 | 19 => System::Unix,
            _ => System::Unknown,
        }
    }
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    pub fn parse(eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        let mut fields = Fields::new(eocdr, "Truncated End Of Central Directory Record");
        fields.magic(EOCDR_MAGIC, "Invalid End Of Central Directory Record")?;
        let disk_number = fields.u16()?;
        let disk_with_central_directory = fields.u16()?;
        let entries_on_this_disk = fields.u16()?;
        let entries = fields.u16()?;
        let central_directory_size = fields.u32()?;
        let central_directory_offset = fields.u32()?;
        // The comment isn't used, but it has to fit in the file.
        let comment_length = to_usize(fields.u16()?)?;
        fields.take(comment_length)?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }
}

/// Searches backward through `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
pub fn find_eocdr(mapping: &[u8]) -> ZipResult<usize> {
    memmem::rfind(mapping, &EOCDR_MAGIC).ok_or(ZipError::InvalidArchive(
        "Couldn't find End Of Central Directory Record",
    ))
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE_IN_FILE: usize = 20;

    /// Returns `None` if there's no locator here (i.e., it's not a Zip64 archive).
    pub fn parse(mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        let mut fields = Fields::new(mapping, "Truncated Zip64 End Of Central Directory Locator");
        fields
            .magic(ZIP64_EOCDR_LOCATOR_MAGIC, "Not a Zip64 locator")
            .ok()?;
        Some(Self {
            disk_with_central_directory: fields.u32().ok()?,
            zip64_eocdr_offset: fields.u64().ok()?,
            disks: fields.u32().ok()?,
        })
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Size of everything before the extensible data
    const FIXED_SIZE_IN_FILE: usize = 56;

    pub fn parse(eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        let mut fields = Fields::new(eocdr, "Truncated Zip64 End Of Central Directory Record");
        fields.magic(
            ZIP64_EOCDR_MAGIC,
            "Invalid Zip64 End Of Central Directory Record",
        )?;
        let eocdr_size = to_usize(fields.u64()?)?;
        fields.take(4)?; // versions
        let disk_number = fields.u32()?;
        let disk_with_central_directory = fields.u32()?;
        let entries_on_this_disk = fields.u64()?;
        let entries = fields.u64()?;
        fields.u64()?; // size of the central directory
        let central_directory_offset = fields.u64()?;

        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        let extensible_data_length = (eocdr_size + 12)
            .checked_sub(Self::FIXED_SIZE_IN_FILE)
            .ok_or(ZipError::InvalidArchive(
                "Invalid size in Zip64 End Of Central Directory Record",
            ))?;
        fields.take(extensible_data_length)?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_offset,
        })
    }
}

/// Finds the Zip64 end of central directory record in the given slice.
///
/// The slice should start at the Zip64 EOCDR's nominal location,
/// but we might have to do some searching since ZIP archives can have
/// arbitrary junk up front.
pub fn find_zip64_eocdr(mapping: &[u8]) -> ZipResult<usize> {
    memmem::find(mapping, &ZIP64_EOCDR_MAGIC).ok_or(ZipError::InvalidArchive(
        "Couldn't find Zip64 End Of Central Directory Record",
    ))
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub source_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let mut fields = Fields::new(entry, "Truncated central directory entry");
        fields.magic(CENTRAL_DIRECTORY_MAGIC, "Invalid central directory entry")?;
        let source_version = fields.u16()?;
        fields.u16()?; // version needed to extract
        let flags = fields.u16()?;
        let compression_method = fields.u16()?;
        let last_modified_time = fields.u16()?;
        let last_modified_date = fields.u16()?;
        let crc32 = fields.u32()?;
        let compressed_size = fields.u32()?;
        let uncompressed_size = fields.u32()?;
        let path_length = to_usize(fields.u16()?)?;
        let extra_field_length = to_usize(fields.u16()?)?;
        let file_comment_length = to_usize(fields.u16()?)?;
        let disk_number = fields.u16()?;
        fields.u16()?; // internal file attributes
        let external_file_attributes = fields.u32()?;
        let header_offset = fields.u32()?;
        let path = fields.take(path_length)?;
        let extra_field = fields.take(extra_field_length)?;
        fields.take(file_comment_length)?;
        *entry = fields.remaining();

        Ok(Self {
            source_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
        })
    }

    /// Unix mode bits from the external attributes,
    /// if the archive was made on a Unix-like system and recorded any.
    fn unix_mode(&self) -> Option<u32> {
        match System::from_source_version(self.source_version) {
            System::Unix => {
                let mode = self.external_file_attributes >> 16;
                if mode == 0 {
                    None
                } else {
                    Some(mode)
                }
            }
            System::Dos | System::Unknown => None,
        }
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8.
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Extracts the "CRC and sizes trail the data" bit from the 16-bit flags field.
fn has_data_descriptor(flags: u16) -> bool {
    // Bit 3: If this bit is set, the fields crc-32, compressed
    //        size and uncompressed size are set to zero in the
    //        local header. The correct values are put in the
    //        data descriptor immediately following the compressed data.
    flags & (1 << 3) != 0
}

/// Decodes a stored name as UTF-8 or CP437, per the flags.
fn decode_path(raw: &[u8], flags: u16) -> ZipResult<Cow<'_, Utf8Path>> {
    if is_utf8(flags) {
        let utf8 = std::str::from_utf8(raw)?;
        Ok(Cow::Borrowed(Utf8Path::new(utf8)))
    } else {
        match Cow::borrow_from_cp437(raw, &CP437_CONTROL) {
            Cow::Borrowed(s) => Ok(Cow::Borrowed(Utf8Path::new(s))),
            Cow::Owned(s) => Ok(Cow::Owned(s.into())),
        }
    }
}

/// Sizes and offset that a Zip64 extra field may widen
struct WideFields {
    size: usize,
    compressed_size: usize,
    header_offset: usize,
}

impl<'a> FileMetadata<'a> {
    /// Extracts `FileMetadata` from a central directory entry
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry<'a>) -> ZipResult<Self> {
        let path = decode_path(cde.path, cde.flags)?;

        if cde.disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                path, cde.disk_number,
            )));
        }

        // Don't bomb here if an entry is encrypted;
        // we only refuse once someone tries to read it.
        let wide = parse_extra_field(
            WideFields {
                size: to_usize(cde.uncompressed_size)?,
                compressed_size: to_usize(cde.compressed_size)?,
                header_offset: to_usize(cde.header_offset)?,
            },
            cde.extra_field,
        )?;

        let unix_mode = cde.unix_mode();
        let is_dir = path.as_str().ends_with('/')
            || unix_mode.is_some_and(|mode| mode & UNIX_FILE_TYPE_MASK == UNIX_DIRECTORY);

        Ok(Self {
            size: wide.size,
            compressed_size: wide.compressed_size,
            compression_method: CompressionMethod::from_u16(cde.compression_method),
            crc32: cde.crc32,
            encrypted: is_encrypted(cde.flags),
            path,
            last_modified: parse_msdos(cde.last_modified_time, cde.last_modified_date),
            unix_mode,
            is_dir,
            has_data_descriptor: has_data_descriptor(cde.flags),
            header_offset: wide.header_offset,
        })
    }
}

/// Converts an MS-DOS time and date into a timestamp,
/// or `None` if they don't name a real moment (e.g., both zeroed).
fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // Years since 1980
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// Parses the "extra fields" found in central directory entries
/// and local file headers.
///
/// We only care about Zip64 info (64-bit values for files > 2^32 in size).
/// Everything else is skipped.
fn parse_extra_field(mut wide: WideFields, extra_field: &[u8]) -> ZipResult<WideFields> {
    // 4.5.1 [...] the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let mut fields = Fields::new(extra_field, "Truncated extra field");
    while !fields.remaining().is_empty() {
        let kind = fields.u16()?;
        let field_len = to_usize(fields.u16()?)?;
        let data = fields.take(field_len)?;
        if kind != ZIP64_EXTRA_FIELD {
            continue;
        }

        // 4.5.3 [...] fields MUST only appear if the corresponding
        // Local or Central directory record field is set to 0xFFFF or 0xFFFFFFFF.
        let mut zip64 = Fields::new(data, "Truncated Zip64 extra field");
        let saturated = u32::MAX as usize;
        if wide.size == saturated {
            wide.size = to_usize(zip64.u64()?)?;
        }
        if wide.compressed_size == saturated {
            wide.compressed_size = to_usize(zip64.u64()?)?;
        }
        if wide.header_offset == saturated {
            wide.header_offset = to_usize(zip64.u64()?)?;
        }
        // A trailing disk number is fine; we already refuse multi-disk archives.
    }
    Ok(wide)
}

/// Data from a local file header
///
/// Each file's actual contents is preceded by this header.
/// We read entries through the central directory,
/// so this is mostly used to find the data and double-check the directory.
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

/// The parts of a local file header worth comparing against
/// the central directory.
#[derive(Debug)]
pub struct LocalMetadata<'a> {
    pub path: Cow<'a, Utf8Path>,
    pub compression_method: CompressionMethod,
    pub crc32: u32,
    pub size: usize,
    pub compressed_size: usize,
    pub has_data_descriptor: bool,
}

impl<'a> LocalFileHeader<'a> {
    pub fn parse_and_consume(header: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let mut fields = Fields::new(header, "Truncated local file header");
        fields.magic(LOCAL_FILE_HEADER_MAGIC, "Invalid local file header")?;
        fields.u16()?; // version needed to extract
        let flags = fields.u16()?;
        let compression_method = fields.u16()?;
        // The central directory's timestamp is the one we report.
        fields.take(4)?;
        let crc32 = fields.u32()?;
        let compressed_size = fields.u32()?;
        let uncompressed_size = fields.u32()?;
        let path_length = to_usize(fields.u16()?)?;
        let extra_field_length = to_usize(fields.u16()?)?;
        let path = fields.take(path_length)?;
        let extra_field = fields.take(extra_field_length)?;
        *header = fields.remaining();

        Ok(Self {
            flags,
            compression_method,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_field,
        })
    }

    pub fn metadata(&self) -> ZipResult<LocalMetadata<'a>> {
        let wide = parse_extra_field(
            WideFields {
                size: to_usize(self.uncompressed_size)?,
                compressed_size: to_usize(self.compressed_size)?,
                header_offset: 0,
            },
            self.extra_field,
        )?;
        Ok(LocalMetadata {
            path: decode_path(self.path, self.flags)?,
            compression_method: CompressionMethod::from_u16(self.compression_method),
            crc32: self.crc32,
            size: wide.size,
            compressed_size: wide.compressed_size,
            has_data_descriptor: has_data_descriptor(self.flags),
        })
    }
}
