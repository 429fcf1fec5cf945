//! Message framing: request validation and reply serialization.
//!
//! One kernel read yields exactly one request; [`parse_request`] checks the
//! framing invariants before anything downstream trusts the bytes. Replies
//! are built back-to-front-agnostic: payload first, then a header whose
//! `len` covers the whole message, so a reply is always written in one
//! piece.

use bytes::Bytes;

use fusebridge_proto::{decode, FuseInHeader, FuseOpcode, FuseOutHeader, WireRecord};

use crate::error::ProtocolError;
use crate::ops::Errno;

/// A validated request: header plus the raw per-opcode payload.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    /// Request header.
    pub header: FuseInHeader,
    /// Bytes following the header, owned by the receive buffer.
    pub payload: &'a [u8],
}

impl Request<'_> {
    /// Resolves the numeric opcode, rejecting values outside the protocol.
    pub fn opcode(&self) -> Result<FuseOpcode, ProtocolError> {
        FuseOpcode::from_u32(self.header.opcode)
            .ok_or(ProtocolError::UnknownOpcode(self.header.opcode))
    }
}

/// Validates one received message.
///
/// The header's `len` field must equal the number of bytes the read
/// returned; a disagreement means the channel framing is broken and the
/// message cannot be attributed to a request, so no error reply is
/// possible.
pub fn parse_request(buf: &[u8]) -> Result<Request<'_>, ProtocolError> {
    let header: FuseInHeader =
        decode(buf).ok_or(ProtocolError::ShortRead { got: buf.len() })?;
    if header.len as usize != buf.len() {
        return Err(ProtocolError::LengthMismatch {
            declared: header.len,
            actual: buf.len(),
        });
    }
    Ok(Request {
        header,
        payload: &buf[FuseInHeader::SIZE..],
    })
}

/// Serializes one reply message.
///
/// Each `write_*` call replaces the builder's contents; [`finish`](Self::finish)
/// yields the bytes to hand to the channel.
#[derive(Debug, Default)]
pub struct ReplyBuilder {
    buffer: Vec<u8>,
}

impl ReplyBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, unique: u64, payload_len: usize) {
        self.buffer.clear();
        let header = FuseOutHeader::success(unique, (FuseOutHeader::SIZE + payload_len) as u32);
        self.buffer.extend_from_slice(fusebridge_proto::bytes_of(&header));
    }

    /// Writes an error reply. The errno travels negated in the header and
    /// the message has no payload.
    pub fn write_error(&mut self, unique: u64, errno: Errno) {
        self.buffer.clear();
        let header = FuseOutHeader::error(unique, errno.raw());
        self.buffer.extend_from_slice(fusebridge_proto::bytes_of(&header));
    }

    /// Writes a success reply with no payload.
    pub fn write_empty(&mut self, unique: u64) {
        self.reset(unique, 0);
    }

    /// Writes a success reply carrying one fixed-layout record.
    pub fn write_record<T: WireRecord>(&mut self, unique: u64, record: &T) {
        let bytes = fusebridge_proto::bytes_of(record);
        self.reset(unique, bytes.len());
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a success reply carrying at most `cap` bytes of a record.
    ///
    /// Used for records a peer on an older protocol minor accepts only a
    /// prefix of.
    pub fn write_record_capped<T: WireRecord>(&mut self, unique: u64, record: &T, cap: usize) {
        let bytes = fusebridge_proto::bytes_of(record);
        let take = bytes.len().min(cap);
        self.reset(unique, take);
        self.buffer.extend_from_slice(&bytes[..take]);
    }

    /// Writes a create reply: the (possibly capped) entry record followed by
    /// the open record.
    pub fn write_record_pair<A: WireRecord, B: WireRecord>(
        &mut self,
        unique: u64,
        first: &A,
        first_cap: usize,
        second: &B,
    ) {
        let first_bytes = fusebridge_proto::bytes_of(first);
        let first_take = first_bytes.len().min(first_cap);
        let second_bytes = fusebridge_proto::bytes_of(second);
        self.reset(unique, first_take + second_bytes.len());
        self.buffer.extend_from_slice(&first_bytes[..first_take]);
        self.buffer.extend_from_slice(second_bytes);
    }

    /// Writes a success reply carrying raw payload bytes.
    pub fn write_bytes(&mut self, unique: u64, data: &[u8]) {
        self.reset(unique, data.len());
        self.buffer.extend_from_slice(data);
    }

    /// Consumes the builder, yielding the serialized reply.
    #[must_use]
    pub fn finish(self) -> Bytes {
        Bytes::from(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusebridge_proto::{bytes_of, FuseAttrOut, FuseOpenOut};

    fn make_message(opcode: u32, unique: u64, payload: &[u8]) -> Vec<u8> {
        let header = FuseInHeader {
            len: (FuseInHeader::SIZE + payload.len()) as u32,
            opcode,
            unique,
            nodeid: 1,
            uid: 1000,
            gid: 1000,
            pid: 99,
            padding: 0,
        };
        let mut buf = bytes_of(&header).to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_parse_valid_request() {
        let msg = make_message(FuseOpcode::Lookup as u32, 7, b"name\0");
        let req = parse_request(&msg).expect("parse");
        assert_eq!(req.header.unique, 7);
        assert_eq!(req.payload, b"name\0");
        assert_eq!(req.opcode().expect("opcode"), FuseOpcode::Lookup);
    }

    #[test]
    fn test_parse_rejects_short_read() {
        let msg = make_message(FuseOpcode::Lookup as u32, 7, b"");
        let err = parse_request(&msg[..FuseInHeader::SIZE - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::ShortRead { got } if got == FuseInHeader::SIZE - 1));
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let mut msg = make_message(FuseOpcode::Lookup as u32, 7, b"name\0");
        msg.push(0); // one byte beyond what the header declares
        let err = parse_request(&msg).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { .. }));
    }

    #[test]
    fn test_parse_flags_unknown_opcode() {
        let msg = make_message(9999, 7, b"");
        let req = parse_request(&msg).expect("framing is still valid");
        assert!(matches!(
            req.opcode(),
            Err(ProtocolError::UnknownOpcode(9999))
        ));
    }

    #[test]
    fn test_error_reply_negates_errno() {
        let mut reply = ReplyBuilder::new();
        reply.write_error(42, Errno::ENOENT);
        let bytes = reply.finish();

        let header: FuseOutHeader = decode(&bytes).expect("header");
        assert_eq!(header.len as usize, FuseOutHeader::SIZE);
        assert_eq!(header.error, -libc::ENOENT);
        assert_eq!(header.unique, 42);
    }

    #[test]
    fn test_record_reply_length_covers_payload() {
        let mut reply = ReplyBuilder::new();
        reply.write_record(5, &FuseAttrOut::default());
        let bytes = reply.finish();

        let header: FuseOutHeader = decode(&bytes).expect("header");
        assert_eq!(header.error, 0);
        assert_eq!(
            header.len as usize,
            FuseOutHeader::SIZE + std::mem::size_of::<FuseAttrOut>()
        );
        assert_eq!(header.len as usize, bytes.len());
    }

    #[test]
    fn test_capped_record_is_a_prefix() {
        let attr = FuseAttrOut {
            attr_valid: 11,
            ..FuseAttrOut::default()
        };
        let mut full = ReplyBuilder::new();
        full.write_record(5, &attr);
        let full = full.finish();

        let mut capped = ReplyBuilder::new();
        capped.write_record_capped(5, &attr, 96);
        let capped = capped.finish();

        assert_eq!(capped.len(), FuseOutHeader::SIZE + 96);
        assert_eq!(&full[FuseOutHeader::SIZE..FuseOutHeader::SIZE + 96], &capped[FuseOutHeader::SIZE..]);
    }

    #[test]
    fn test_record_pair_concatenates() {
        let entry = fusebridge_proto::FuseEntryOut::default();
        let open = FuseOpenOut {
            fh: 3,
            ..FuseOpenOut::default()
        };
        let mut reply = ReplyBuilder::new();
        reply.write_record_pair(1, &entry, 120, &open);
        let bytes = reply.finish();
        assert_eq!(
            bytes.len(),
            FuseOutHeader::SIZE + 120 + std::mem::size_of::<FuseOpenOut>()
        );
    }
}
