//! Wire message types and decode dispatch.
//!
//! - [`gvcp`] — control channel: header, status codes, per-operation payload
//!   structs, ACK/NACK builders.
//! - [`gvsp`] — stream channel: packet header, leader/trailer payloads,
//!   pixel-format codes.
//! - [`Command`] — a decoded control command, produced from a validated
//!   datagram and consumed by the control service's dispatch.

pub mod gvcp;
pub mod gvsp;

use crate::error::Result;
use gvcp::{GvcpHeader, PacketResend, ReadMem, ReadReg, WriteMem, WriteReg};

/// A control command the endpoint recognizes.
///
/// `Unknown` keeps the raw command code so dispatch can NACK
/// `NOT_IMPLEMENTED` while still echoing the request id.
#[derive(Debug, Clone)]
pub enum Command {
    Discovery,
    ReadMem(ReadMem),
    WriteMem(WriteMem),
    ReadReg(ReadReg),
    WriteReg(WriteReg),
    PacketResend(PacketResend),
    Unknown { command: u16 },
}

impl Command {
    /// Decode the payload of a framing-validated command datagram.
    ///
    /// Truncated payloads surface as [`crate::error::WireError`]; the caller
    /// maps those to an `INVALID_HEADER` NACK.
    pub fn decode(header: &GvcpHeader, payload: &[u8]) -> Result<Self> {
        Ok(match header.command {
            gvcp::CMD_DISCOVERY => Command::Discovery,
            gvcp::CMD_READ_MEMORY => Command::ReadMem(ReadMem::decode(payload)?),
            gvcp::CMD_WRITE_MEMORY => Command::WriteMem(WriteMem::decode(payload)?),
            gvcp::CMD_READREG => Command::ReadReg(ReadReg::decode(payload)?),
            gvcp::CMD_WRITEREG => Command::WriteReg(WriteReg::decode(payload)?),
            gvcp::CMD_PACKETRESEND => Command::PacketResend(PacketResend::decode(payload)?),
            command => Command::Unknown { command },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    fn cmd_header(command: u16, size_words: u16) -> GvcpHeader {
        GvcpHeader {
            packet_kind: gvcp::PACKET_KIND_CMD,
            flags: gvcp::FLAG_ACK_REQUIRED,
            command,
            size_words,
            id: 7,
        }
    }

    #[test]
    fn decodes_each_operation() {
        let mut two_words = Vec::new();
        codec::write_u32(&mut two_words, 0x1000);
        codec::write_u32(&mut two_words, 1);

        assert!(matches!(
            Command::decode(&cmd_header(gvcp::CMD_DISCOVERY, 0), &[]).unwrap(),
            Command::Discovery
        ));
        assert!(matches!(
            Command::decode(&cmd_header(gvcp::CMD_READREG, 1), &two_words[..4]).unwrap(),
            Command::ReadReg(ReadReg { address: 0x1000 })
        ));
        assert!(matches!(
            Command::decode(&cmd_header(gvcp::CMD_WRITEREG, 2), &two_words).unwrap(),
            Command::WriteReg(WriteReg {
                address: 0x1000,
                value: 1
            })
        ));
        assert!(matches!(
            Command::decode(&cmd_header(gvcp::CMD_READ_MEMORY, 2), &two_words).unwrap(),
            Command::ReadMem(ReadMem {
                address: 0x1000,
                length: 1
            })
        ));
        assert!(matches!(
            Command::decode(&cmd_header(gvcp::CMD_PACKETRESEND, 2), &two_words).unwrap(),
            Command::PacketResend(PacketResend {
                stream_index: 0x1000,
                block_id: 1
            })
        ));
    }

    #[test]
    fn unknown_command_is_kept() {
        let cmd = Command::decode(&cmd_header(0x00FE, 0), &[]).unwrap();
        assert!(matches!(cmd, Command::Unknown { command: 0x00FE }));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        assert!(Command::decode(&cmd_header(gvcp::CMD_READREG, 1), &[0x00, 0x00]).is_err());
    }
}
