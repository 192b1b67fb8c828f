//! A reader that checks an entry's CRC-32 once its data runs out

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Wraps an entry's (decompressed) data,
/// failing the final read if the checksum doesn't match the archive's.
///
/// A short or corrupted entry surfaces here as an `InvalidData` error
/// instead of silently producing a short file.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }

    fn mismatch(&self) -> Option<io::Error> {
        let actual = self.hasher.clone().finalize();
        if actual == self.expected {
            return None;
        }
        Some(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Invalid checksum: expected {:08x}, got {:08x}",
                self.expected, actual
            ),
        ))
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            if let Some(e) = self.mismatch() {
                return Err(e);
            }
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}
