//! Builds small ZIP archives in memory for the tests,
//! plus a few helpers for looking at what extraction left behind.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::Path;

use flate2::write::DeflateEncoder;
use flate2::Compression;

const UTF8_FLAG: u16 = 1 << 11;
const DATA_DESCRIPTOR_FLAG: u16 = 1 << 3;
const ENCRYPTED_FLAG: u16 = 1;

const MADE_BY_UNIX: u16 = (3 << 8) | 30;
const MADE_BY_DOS: u16 = 20;

// 1980-01-01, midnight
const DOS_DATE: u16 = (1 << 5) | 1;

const ZIP64_EXTRA_FIELD: u16 = 0x0001;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Pending<'a> {
    name: &'a str,
    content: &'a [u8],
    deflate: bool,
    mode: Option<u32>,
    flags: u16,
}

/// A finished archive and where each entry's (compressed) data sits in it
pub struct Built {
    pub bytes: Vec<u8>,
    pub data_ranges: Vec<Range<usize>>,
}

#[derive(Default)]
pub struct ZipBuilder {
    bytes: Vec<u8>,
    central_directory: Vec<u8>,
    data_ranges: Vec<Range<usize>>,
    zip64: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes Zip64 records: the EOCDR's counts and offsets are saturated,
    /// a Zip64 EOCDR and locator hold the real ones,
    /// and each central directory entry keeps its header offset in a Zip64 extra field.
    ///
    /// Call before adding entries.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    /// A directory entry; `name` should end in `/`.
    pub fn dir(self, name: &str) -> Self {
        self.add(Pending {
            name,
            content: b"",
            deflate: false,
            mode: Some(0o040755),
            flags: UTF8_FLAG,
        })
    }

    /// A stored (uncompressed) file with Unix permissions
    pub fn file(self, name: &str, content: &[u8], permissions: u32) -> Self {
        self.add(Pending {
            name,
            content,
            deflate: false,
            mode: Some(0o100000 | permissions),
            flags: UTF8_FLAG,
        })
    }

    /// A deflated file with Unix permissions
    pub fn deflated(self, name: &str, content: &[u8], permissions: u32) -> Self {
        self.add(Pending {
            name,
            content,
            deflate: true,
            mode: Some(0o100000 | permissions),
            flags: UTF8_FLAG,
        })
    }

    /// A file from an archiver that doesn't record Unix modes
    pub fn dos_file(self, name: &str, content: &[u8]) -> Self {
        self.add(Pending {
            name,
            content,
            deflate: false,
            mode: None,
            flags: UTF8_FLAG,
        })
    }

    /// A deflated file written the way streaming archivers do:
    /// a zeroed local header with a data descriptor after the data.
    pub fn streamed(self, name: &str, content: &[u8], permissions: u32) -> Self {
        self.add(Pending {
            name,
            content,
            deflate: true,
            mode: Some(0o100000 | permissions),
            flags: UTF8_FLAG | DATA_DESCRIPTOR_FLAG,
        })
    }

    /// A file flagged as encrypted (its "ciphertext" is just the content)
    pub fn encrypted(self, name: &str, content: &[u8]) -> Self {
        self.add(Pending {
            name,
            content,
            deflate: false,
            mode: Some(0o100644),
            flags: UTF8_FLAG | ENCRYPTED_FLAG,
        })
    }

    fn add(mut self, entry: Pending) -> Self {
        let crc = crc32fast::hash(entry.content);
        let data = if entry.deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(entry.content).unwrap();
            encoder.finish().unwrap()
        } else {
            entry.content.to_vec()
        };
        let method: u16 = if entry.deflate { 8 } else { 0 };
        let streamed = entry.flags & DATA_DESCRIPTOR_FLAG != 0;
        let header_offset = self.bytes.len() as u32;

        // Local file header
        let out = &mut self.bytes;
        out.extend_from_slice(b"PK\x03\x04");
        put16(out, 20);
        put16(out, entry.flags);
        put16(out, method);
        put16(out, 0);
        put16(out, DOS_DATE);
        if streamed {
            put32(out, 0);
            put32(out, 0);
            put32(out, 0);
        } else {
            put32(out, crc);
            put32(out, data.len() as u32);
            put32(out, entry.content.len() as u32);
        }
        put16(out, entry.name.len() as u16);
        put16(out, 0);
        out.extend_from_slice(entry.name.as_bytes());

        let start = out.len();
        out.extend_from_slice(&data);
        self.data_ranges.push(start..out.len());

        if streamed {
            out.extend_from_slice(b"PK\x07\x08");
            put32(out, crc);
            put32(out, data.len() as u32);
            put32(out, entry.content.len() as u32);
        }

        // Central directory entry
        let cd = &mut self.central_directory;
        cd.extend_from_slice(b"PK\x01\x02");
        put16(cd, if entry.mode.is_some() { MADE_BY_UNIX } else { MADE_BY_DOS });
        put16(cd, 20);
        put16(cd, entry.flags);
        put16(cd, method);
        put16(cd, 0);
        put16(cd, DOS_DATE);
        put32(cd, crc);
        put32(cd, data.len() as u32);
        put32(cd, entry.content.len() as u32);
        put16(cd, entry.name.len() as u16);
        put16(cd, if self.zip64 { 12 } else { 0 }); // extra field length
        put16(cd, 0); // comment length
        put16(cd, 0); // disk number
        put16(cd, 0); // internal attributes
        put32(cd, entry.mode.map(|m| m << 16).unwrap_or(0));
        put32(cd, if self.zip64 { u32::MAX } else { header_offset });
        cd.extend_from_slice(entry.name.as_bytes());
        if self.zip64 {
            put16(cd, ZIP64_EXTRA_FIELD);
            put16(cd, 8);
            put64(cd, header_offset as u64);
        }

        self
    }

    pub fn finish(mut self) -> Built {
        let count = self.data_ranges.len() as u16;
        let central_directory_offset = self.bytes.len() as u32;
        let central_directory_size = self.central_directory.len() as u32;
        self.bytes.append(&mut self.central_directory);

        let out = &mut self.bytes;
        if self.zip64 {
            let zip64_eocdr_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            put64(out, 44); // record size, less the leading 12 bytes
            put16(out, MADE_BY_UNIX);
            put16(out, 45);
            put32(out, 0);
            put32(out, 0);
            put64(out, count as u64);
            put64(out, count as u64);
            put64(out, central_directory_size as u64);
            put64(out, central_directory_offset as u64);

            out.extend_from_slice(b"PK\x06\x07");
            put32(out, 0);
            put64(out, zip64_eocdr_offset);
            put32(out, 1);
        }

        out.extend_from_slice(b"PK\x05\x06");
        put16(out, 0);
        put16(out, 0);
        if self.zip64 {
            put16(out, u16::MAX);
            put16(out, u16::MAX);
            put32(out, u32::MAX);
            put32(out, u32::MAX);
        } else {
            put16(out, count);
            put16(out, count);
            put32(out, central_directory_size);
            put32(out, central_directory_offset);
        }
        put16(out, 0);

        Built {
            bytes: self.bytes,
            data_ranges: self.data_ranges,
        }
    }

    /// Finishes the archive and writes it to `path`.
    pub fn write_to(self, path: &Path) {
        fs::write(path, self.finish().bytes).unwrap();
    }
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// What's at a path after extraction
#[derive(Debug, PartialEq, Eq)]
pub enum Node {
    Dir,
    File { content: Vec<u8>, mode: u32 },
}

/// Every file and directory under `root`, keyed by relative path
pub fn snapshot(root: &Path) -> BTreeMap<String, Node> {
    let mut nodes = BTreeMap::new();
    walk(root, root, &mut nodes);
    nodes
}

fn walk(root: &Path, dir: &Path, nodes: &mut BTreeMap<String, Node>) {
    for child in fs::read_dir(dir).unwrap() {
        let path = child.unwrap().path();
        let relative = path
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        let metadata = fs::symlink_metadata(&path).unwrap();
        if metadata.is_dir() {
            nodes.insert(relative, Node::Dir);
            walk(root, &path, nodes);
        } else {
            nodes.insert(
                relative,
                Node::File {
                    content: fs::read(&path).unwrap(),
                    mode: mode_of(&metadata),
                },
            );
        }
    }
}

#[cfg(unix)]
pub fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
pub fn mode_of(_metadata: &fs::Metadata) -> u32 {
    0
}
