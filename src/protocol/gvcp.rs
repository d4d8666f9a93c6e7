//! GVCP control-channel framing: header, status codes, command payloads,
//! ACK/NACK builders.
//!
//! Wire format (all big-endian):
//! ```text
//! +-------------+-------+-----------+------------+------+
//! | packet_kind | flags | command   | size_words | id   |
//! |     u8      |  u8   |   u16     |    u16     | u16  |
//! +-------------+-------+-----------+------------+------+
//! ```
//! `size_words` counts 32-bit payload words after the 8-byte header, so a
//! well-formed command datagram satisfies `len == 8 + 4 * size_words`.

use crate::codec;
use crate::error::{RegisterError, Result, WireError};

/// GVCP control port as defined by the GigE Vision specification.
pub const GVCP_PORT: u16 = 3956;

/// Header length in bytes for both commands and acknowledgements.
pub const HEADER_SIZE: usize = 8;

// Packet kinds (first header byte).
pub const PACKET_KIND_CMD: u8 = 0x42;
pub const PACKET_KIND_ACK: u8 = 0x00;
pub const PACKET_KIND_ERROR: u8 = 0x80;

/// Flag bit: the client expects an acknowledgement.
pub const FLAG_ACK_REQUIRED: u8 = 0x01;

// Command codes (host order). The matching ack code is `command | 0x0001`.
pub const CMD_DISCOVERY: u16 = 0x0002;
pub const CMD_PACKETRESEND: u16 = 0x0040;
pub const CMD_READREG: u16 = 0x0080;
pub const CMD_WRITEREG: u16 = 0x0082;
pub const CMD_READ_MEMORY: u16 = 0x0084;
pub const CMD_WRITE_MEMORY: u16 = 0x0086;

pub const ACK_DISCOVERY: u16 = CMD_DISCOVERY | 0x0001;

/// GVCP status codes carried in NACK payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success = 0x0000,
    NotImplemented = 0x8001,
    InvalidParameter = 0x8002,
    InvalidAddress = 0x8003,
    WriteProtect = 0x8004,
    BadAlignment = 0x8005,
    AccessDenied = 0x8006,
    Busy = 0x8007,
    MsgTimeout = 0x800B,
    InvalidHeader = 0x800E,
    WrongConfig = 0x800F,
}

impl Status {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Map a register-map failure onto its wire status.
    pub fn from_register_error(err: &RegisterError) -> Self {
        match err {
            RegisterError::InvalidAddress { .. } => Status::InvalidAddress,
            RegisterError::WriteProtected { .. } => Status::WriteProtect,
            RegisterError::BadAlignment { .. } => Status::BadAlignment,
            RegisterError::BadValue { .. } => Status::InvalidParameter,
            RegisterError::AccessDenied { .. } => Status::AccessDenied,
            RegisterError::Busy => Status::Busy,
        }
    }
}

/// Eight-byte control header shared by commands and acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GvcpHeader {
    pub packet_kind: u8,
    pub flags: u8,
    pub command: u16,
    pub size_words: u16,
    pub id: u16,
}

impl GvcpHeader {
    /// Parse the first eight bytes of a datagram.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(WireError::HeaderTooShort { len: data.len() });
        }
        Ok(Self {
            packet_kind: data[0],
            flags: data[1],
            command: codec::read_u16(data, 2)?,
            size_words: codec::read_u16(data, 4)?,
            id: codec::read_u16(data, 6)?,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.packet_kind);
        buf.push(self.flags);
        codec::write_u16(buf, self.command);
        codec::write_u16(buf, self.size_words);
        codec::write_u16(buf, self.id);
    }

    /// Declared payload length in bytes.
    pub fn payload_len(&self) -> usize {
        usize::from(self.size_words) * 4
    }

    /// Check command framing against the actual datagram length.
    ///
    /// A non-command kind is indistinguishable from noise and must be
    /// dropped; a parsed command header whose size disagrees with the
    /// datagram gets a NACK `INVALID_HEADER` (the caller decides, based on
    /// the error variant).
    pub fn validate_command(&self, datagram_len: usize) -> Result<()> {
        if self.packet_kind != PACKET_KIND_CMD {
            return Err(WireError::NotACommand {
                got: self.packet_kind,
            });
        }
        if datagram_len != HEADER_SIZE + self.payload_len() {
            return Err(WireError::SizeMismatch {
                declared: self.payload_len(),
                got: datagram_len - HEADER_SIZE,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Command payloads
// ---------------------------------------------------------------------------

/// READ_MEMORY payload: `{address, length}`. Type 0x0084.
#[derive(Debug, Clone, Copy)]
pub struct ReadMem {
    pub address: u32,
    pub length: u32,
}

impl ReadMem {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            address: codec::read_u32(payload, 0)?,
            length: codec::read_u32(payload, 4)?,
        })
    }
}

/// WRITE_MEMORY payload: `{address, data...}`. Type 0x0086.
#[derive(Debug, Clone)]
pub struct WriteMem {
    pub address: u32,
    pub data: Vec<u8>,
}

impl WriteMem {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let address = codec::read_u32(payload, 0)?;
        Ok(Self {
            address,
            data: payload[4..].to_vec(),
        })
    }
}

/// READREG payload: one register address. Type 0x0080.
#[derive(Debug, Clone, Copy)]
pub struct ReadReg {
    pub address: u32,
}

impl ReadReg {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            address: codec::read_u32(payload, 0)?,
        })
    }
}

/// WRITEREG payload: `{address, value}`. Type 0x0082.
#[derive(Debug, Clone, Copy)]
pub struct WriteReg {
    pub address: u32,
    pub value: u32,
}

impl WriteReg {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            address: codec::read_u32(payload, 0)?,
            value: codec::read_u32(payload, 4)?,
        })
    }
}

/// PACKETRESEND payload: `{stream_index, block_id}`. Type 0x0040.
#[derive(Debug, Clone, Copy)]
pub struct PacketResend {
    pub stream_index: u32,
    pub block_id: u32,
}

impl PacketResend {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            stream_index: codec::read_u32(payload, 0)?,
            block_id: codec::read_u32(payload, 4)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Response builders
// ---------------------------------------------------------------------------

/// Build an ACK for `cmd`: ack code = command | 1, id echoed, payload padded
/// to a whole number of 32-bit words.
pub fn ack(cmd: &GvcpHeader, payload: &[u8]) -> Vec<u8> {
    let size_words = payload.len().div_ceil(4);
    let mut buf = Vec::with_capacity(HEADER_SIZE + size_words * 4);
    GvcpHeader {
        packet_kind: PACKET_KIND_ACK,
        flags: 0,
        command: cmd.command | 0x0001,
        size_words: size_words as u16,
        id: cmd.id,
    }
    .encode(&mut buf);
    buf.extend_from_slice(payload);
    buf.resize(HEADER_SIZE + size_words * 4, 0);
    buf
}

/// Build a NACK for `cmd`: kind ERROR, the *command* code echoed, one
/// payload word holding the 16-bit status zero-padded.
pub fn nack(cmd: &GvcpHeader, status: Status) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + 4);
    GvcpHeader {
        packet_kind: PACKET_KIND_ERROR,
        flags: 0,
        command: cmd.command,
        size_words: 1,
        id: cmd.id,
    }
    .encode(&mut buf);
    codec::write_u16(&mut buf, status.code());
    codec::write_u16(&mut buf, 0);
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let hdr = GvcpHeader {
            packet_kind: PACKET_KIND_CMD,
            flags: FLAG_ACK_REQUIRED,
            command: CMD_READREG,
            size_words: 1,
            id: 0xBEEF,
        };
        let mut buf = Vec::new();
        hdr.encode(&mut buf);
        assert_eq!(GvcpHeader::decode(&buf).unwrap(), hdr);
    }

    #[test]
    fn discovery_request_bytes() {
        // 42 01 00 02 00 00 12 34: ack-required DISCOVERY, size 0, id 0x1234
        let wire = [0x42, 0x01, 0x00, 0x02, 0x00, 0x00, 0x12, 0x34];
        let hdr = GvcpHeader::decode(&wire).unwrap();
        assert_eq!(hdr.packet_kind, PACKET_KIND_CMD);
        assert_eq!(hdr.command, CMD_DISCOVERY);
        assert_eq!(hdr.size_words, 0);
        assert_eq!(hdr.id, 0x1234);
        hdr.validate_command(wire.len()).unwrap();
    }

    #[test]
    fn discovery_ack_header_bytes() {
        let cmd = GvcpHeader::decode(&[0x42, 0x01, 0x00, 0x02, 0x00, 0x00, 0x12, 0x34]).unwrap();
        let reply = ack(&cmd, &[0u8; 248]);
        // 00 00 00 03 00 3E 12 34: ACK kind, ACK_DISCOVERY, 62 words, id echoed
        assert_eq!(&reply[..8], &[0x00, 0x00, 0x00, 0x03, 0x00, 0x3E, 0x12, 0x34]);
        assert_eq!(reply.len(), 8 + 248);
    }

    #[test]
    fn ack_pads_payload_to_word_boundary() {
        let cmd = GvcpHeader {
            packet_kind: PACKET_KIND_CMD,
            flags: 0,
            command: CMD_READ_MEMORY,
            size_words: 2,
            id: 1,
        };
        let reply = ack(&cmd, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        assert_eq!(reply.len(), 8 + 8);
        assert_eq!(&reply[8..], &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x00, 0x00, 0x00]);
        assert_eq!(reply[4..6], [0x00, 0x02]);
    }

    #[test]
    fn nack_carries_status_word() {
        let cmd = GvcpHeader {
            packet_kind: PACKET_KIND_CMD,
            flags: FLAG_ACK_REQUIRED,
            command: CMD_READREG,
            size_words: 1,
            id: 0x0002,
        };
        let reply = nack(&cmd, Status::BadAlignment);
        assert_eq!(reply[0], PACKET_KIND_ERROR);
        // command echoed (not the ack code), id echoed
        assert_eq!(&reply[2..4], &[0x00, 0x80]);
        assert_eq!(&reply[6..8], &[0x00, 0x02]);
        assert_eq!(&reply[8..12], &[0x80, 0x05, 0x00, 0x00]);
    }

    #[test]
    fn validate_rejects_size_mismatch() {
        let mut wire = vec![0x42, 0x01, 0x00, 0x80, 0x00, 0x02, 0x00, 0x01];
        wire.extend_from_slice(&[0u8; 4]); // header says 2 words, carries 1
        let hdr = GvcpHeader::decode(&wire).unwrap();
        assert!(matches!(
            hdr.validate_command(wire.len()),
            Err(WireError::SizeMismatch { declared: 8, got: 4 })
        ));
    }

    #[test]
    fn validate_rejects_non_command_kind() {
        let wire = [0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01];
        let hdr = GvcpHeader::decode(&wire).unwrap();
        assert!(matches!(
            hdr.validate_command(wire.len()),
            Err(WireError::NotACommand { got: 0x00 })
        ));
    }

    #[test]
    fn payload_decodes() {
        let mut buf = Vec::new();
        crate::codec::write_u32(&mut buf, 0x0001_0000);
        crate::codec::write_u32(&mut buf, 512);
        let rm = ReadMem::decode(&buf).unwrap();
        assert_eq!(rm.address, 0x0001_0000);
        assert_eq!(rm.length, 512);

        let wr = WriteReg::decode(&buf).unwrap();
        assert_eq!(wr.address, 0x0001_0000);
        assert_eq!(wr.value, 512);

        let pr = PacketResend::decode(&buf).unwrap();
        assert_eq!(pr.stream_index, 0x0001_0000);
        assert_eq!(pr.block_id, 512);

        assert!(ReadMem::decode(&buf[..6]).is_err());
    }

    #[test]
    fn write_mem_splits_address_and_data() {
        let mut buf = Vec::new();
        crate::codec::write_u32(&mut buf, 0x0000_00E8);
        buf.extend_from_slice(b"cam1");
        let wm = WriteMem::decode(&buf).unwrap();
        assert_eq!(wm.address, 0xE8);
        assert_eq!(wm.data, b"cam1");
    }

    #[test]
    fn register_error_status_mapping() {
        use crate::error::RegisterError as E;
        assert_eq!(
            Status::from_register_error(&E::InvalidAddress { address: 0 }),
            Status::InvalidAddress
        );
        assert_eq!(
            Status::from_register_error(&E::BadAlignment { address: 1 }),
            Status::BadAlignment
        );
        assert_eq!(
            Status::from_register_error(&E::BadValue { address: 0, value: 9 }),
            Status::InvalidParameter
        );
        assert_eq!(Status::from_register_error(&E::Busy), Status::Busy);
    }
}
