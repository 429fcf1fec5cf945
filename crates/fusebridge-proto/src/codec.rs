//! Decoding and encoding of fixed-layout records.
//!
//! Requests arrive as untrusted bytes from a privileged peer; every decode
//! is length-checked before touching memory, and unaligned buffers are
//! handled with `read_unaligned` rather than reference casts.

use std::mem::size_of;
use std::ptr;
use std::slice;

/// Marker for plain-old-data protocol records.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain only fixed-width integer
/// fields (directly or via nested `WireRecord` structs), and have no
/// implicit padding, so that any bit pattern is a valid value and the byte
/// view is fully initialized.
pub unsafe trait WireRecord: Copy {}

/// Decodes a record from the front of an untrusted byte slice.
///
/// Returns `None` if the slice is shorter than the record. Trailing bytes
/// are ignored; variable-tail opcodes validate them separately.
#[must_use]
pub fn decode<T: WireRecord>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < size_of::<T>() {
        return None;
    }
    // Length checked above; read_unaligned tolerates any buffer alignment.
    Some(unsafe { ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
}

/// Views a record as its wire bytes.
#[must_use]
pub fn bytes_of<T: WireRecord>(value: &T) -> &[u8] {
    // WireRecord guarantees no implicit padding, so every byte is
    // initialized.
    unsafe { slice::from_raw_parts(ptr::from_ref(value).cast::<u8>(), size_of::<T>()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{FuseInHeader, FuseOpcode};

    #[test]
    fn test_decode_round_trip() {
        let header = FuseInHeader {
            len: 48,
            opcode: FuseOpcode::Lookup as u32,
            unique: 0xdead_beef,
            nodeid: 1,
            uid: 1000,
            gid: 1000,
            pid: 4242,
            padding: 0,
        };
        let bytes = bytes_of(&header);
        assert_eq!(bytes.len(), FuseInHeader::SIZE);

        let parsed: FuseInHeader = decode(bytes).unwrap();
        assert_eq!(parsed.unique, 0xdead_beef);
        assert_eq!(parsed.opcode, FuseOpcode::Lookup as u32);
        assert_eq!(parsed.pid, 4242);
    }

    #[test]
    fn test_decode_short_buffer() {
        let bytes = [0u8; FuseInHeader::SIZE - 1];
        assert!(decode::<FuseInHeader>(&bytes).is_none());
    }

    #[test]
    fn test_decode_unaligned() {
        let header = FuseInHeader {
            len: 40,
            opcode: 3,
            unique: 7,
            ..FuseInHeader::default()
        };
        let mut shifted = vec![0u8; 1];
        shifted.extend_from_slice(bytes_of(&header));

        let parsed: FuseInHeader = decode(&shifted[1..]).unwrap();
        assert_eq!(parsed.unique, 7);
    }
}
