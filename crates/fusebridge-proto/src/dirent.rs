//! Directory entry streams.
//!
//! A directory listing reply is a concatenation of [`FuseDirent`] records,
//! each followed by its name bytes and zero padding to the next 8-byte
//! boundary. Misaligning one record corrupts stream parsing for every entry
//! after it, so all serialization goes through [`DirentBuf`], which cannot
//! emit an unaligned record.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

use crate::abi::{FuseDirent, FuseDirentplus, FuseEntryOut};
use crate::codec::{bytes_of, decode};

/// Rounds `x` up to the next 8-byte boundary.
#[must_use]
pub const fn dirent_align(x: usize) -> usize {
    (x + 7) & !7
}

/// Total serialized size of a directory entry with an `namelen`-byte name,
/// padding included.
#[must_use]
pub const fn dirent_size(namelen: usize) -> usize {
    dirent_align(FuseDirent::NAME_OFFSET + namelen)
}

/// Total serialized size of a readdirplus entry, padding included.
#[must_use]
pub const fn direntplus_size(namelen: usize) -> usize {
    dirent_align(FuseDirentplus::NAME_OFFSET + namelen)
}

/// Bounded buffer of 8-byte aligned directory entries.
///
/// Entries are appended up to the size limit the kernel supplied in the
/// readdir request; a full buffer rejects further entries so the handler
/// can resume from the last accepted offset on the next request.
#[derive(Debug)]
pub struct DirentBuf {
    buf: Vec<u8>,
    max_size: usize,
}

impl DirentBuf {
    /// Creates a buffer that will hold at most `max_size` bytes.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_size.min(16 * 1024)),
            max_size,
        }
    }

    /// Appends one directory entry.
    ///
    /// Returns false (leaving the buffer untouched) if the padded entry
    /// would not fit; the caller should stop enumerating and reply with
    /// what fits.
    pub fn push(&mut self, ino: u64, off: u64, r#type: u32, name: &OsStr) -> bool {
        let name = name.as_bytes();
        let entry_size = dirent_size(name.len());
        if self.buf.len() + entry_size > self.max_size {
            return false;
        }

        let header = FuseDirent {
            ino,
            off,
            namelen: name.len() as u32,
            r#type,
        };
        self.buf.extend_from_slice(bytes_of(&header));
        self.buf.extend_from_slice(name);
        self.buf
            .resize(self.buf.len() + entry_size - FuseDirent::NAME_OFFSET - name.len(), 0);

        debug_assert_eq!(self.buf.len() % 8, 0);
        true
    }

    /// Appends one readdirplus entry. The dirent inode mirrors the
    /// attribute inode of `entry_out`.
    pub fn push_plus(&mut self, entry_out: &FuseEntryOut, off: u64, r#type: u32, name: &OsStr) -> bool {
        let name = name.as_bytes();
        let entry_size = direntplus_size(name.len());
        if self.buf.len() + entry_size > self.max_size {
            return false;
        }

        let header = FuseDirentplus {
            entry_out: *entry_out,
            dirent: FuseDirent {
                ino: entry_out.attr.ino,
                off,
                namelen: name.len() as u32,
                r#type,
            },
        };
        self.buf.extend_from_slice(bytes_of(&header));
        self.buf.extend_from_slice(name);
        self.buf
            .resize(self.buf.len() + entry_size - FuseDirentplus::NAME_OFFSET - name.len(), 0);

        debug_assert_eq!(self.buf.len() % 8, 0);
        true
    }

    /// Returns true if no entry has been accepted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Serialized length so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Borrows the serialized stream.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the buffer, yielding the serialized stream.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Iterator over a serialized dirent stream, yielding each header and its
/// name bytes.
///
/// Stops at the first truncated or out-of-bounds record.
#[derive(Debug)]
pub struct DirentIter<'a> {
    rest: &'a [u8],
}

impl<'a> DirentIter<'a> {
    /// Creates an iterator over `stream`.
    #[must_use]
    pub const fn new(stream: &'a [u8]) -> Self {
        Self { rest: stream }
    }
}

impl<'a> Iterator for DirentIter<'a> {
    type Item = (FuseDirent, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let header: FuseDirent = decode(self.rest)?;
        let padded = dirent_size(header.namelen as usize);
        if self.rest.len() < padded {
            return None;
        }
        let name = &self.rest[FuseDirent::NAME_OFFSET..FuseDirent::NAME_OFFSET + header.namelen as usize];
        self.rest = &self.rest[padded..];
        Some((header, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_law() {
        for namelen in 0..64 {
            let size = dirent_size(namelen);
            assert_eq!(size % 8, 0);
            assert!(size >= FuseDirent::NAME_OFFSET + namelen);
            assert!(size < FuseDirent::NAME_OFFSET + namelen + 8);
        }
    }

    #[test]
    fn test_every_record_ends_aligned() {
        let mut buf = DirentBuf::new(4096);
        assert!(buf.push(1, 1, libc::DT_DIR as u32, OsStr::new(".")));
        assert!(buf.push(1, 2, libc::DT_DIR as u32, OsStr::new("..")));
        assert!(buf.push(2, 3, libc::DT_REG as u32, OsStr::new("seven-ch")));
        assert!(buf.push(3, 4, libc::DT_REG as u32, OsStr::new("x")));

        let mut offset = 0;
        for (header, name) in DirentIter::new(buf.as_bytes()) {
            offset += dirent_size(name.len());
            assert_eq!(offset % 8, 0);
            assert_eq!(header.namelen as usize, name.len());
        }
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn test_size_round_trip() {
        let mut buf = DirentBuf::new(4096);
        assert!(buf.push(42, 1, libc::DT_REG as u32, OsStr::new("hello.txt")));

        let (header, name) = DirentIter::new(buf.as_bytes()).next().unwrap();
        assert_eq!(header.ino, 42);
        assert_eq!(name, b"hello.txt");
        // Round-trip law: recomputing the padded size from the parsed
        // record reproduces the serialized length.
        assert_eq!(dirent_size(header.namelen as usize), buf.len());
    }

    #[test]
    fn test_full_buffer_rejects_entry() {
        let mut buf = DirentBuf::new(dirent_size(5));
        assert!(buf.push(1, 1, libc::DT_REG as u32, OsStr::new("first")));
        assert!(!buf.push(2, 2, libc::DT_REG as u32, OsStr::new("second")));
        // The rejected entry must not have modified the stream.
        assert_eq!(buf.len(), dirent_size(5));
    }

    #[test]
    fn test_plus_entries_stay_aligned() {
        let entry = FuseEntryOut {
            nodeid: 9,
            generation: 1,
            ..FuseEntryOut::default()
        };
        let mut buf = DirentBuf::new(4096);
        assert!(buf.push_plus(&entry, 1, libc::DT_REG as u32, OsStr::new("plus")));
        assert_eq!(buf.len() % 8, 0);
        assert_eq!(buf.len(), direntplus_size(4));
    }

    #[test]
    fn test_iter_stops_on_truncation() {
        let mut buf = DirentBuf::new(4096);
        assert!(buf.push(1, 1, libc::DT_REG as u32, OsStr::new("complete")));
        let bytes = buf.as_bytes();
        let truncated = &bytes[..bytes.len() - 4];
        assert_eq!(DirentIter::new(truncated).count(), 0);
    }
}
