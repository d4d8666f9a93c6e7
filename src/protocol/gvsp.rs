//! GVSP stream-channel packets: header, leader and trailer payloads, pixel
//! format codes.
//!
//! Every packet of one frame carries the same block id in `data[0]`; data
//! packets additionally carry the byte offset of their chunk in `data[1]`.
//! Wire sequence per frame: one leader, one or more data packets, one
//! trailer.

use crate::codec;
use crate::error::Result;

/// Default stream port; the client may move it via the SCP-host-port
/// register.
pub const GVSP_PORT: u16 = 50010;

pub const HEADER_SIZE: usize = 12;

// Packet kinds (first header byte).
pub const PACKET_KIND_LEADER: u8 = 0x01;
pub const PACKET_KIND_TRAILER: u8 = 0x02;
pub const PACKET_KIND_DATA: u8 = 0x03;

// Payload types carried by leader and trailer.
pub const PAYLOAD_TYPE_IMAGE: u16 = 0x0001;
pub const PAYLOAD_TYPE_CHUNK_DATA: u16 = 0x4000;

// Pixel format codes (GenICam PFNC).
pub const PIXEL_FORMAT_MONO8: u32 = 0x0108_0001;
pub const PIXEL_FORMAT_YUV422: u32 = 0x0210_0004;
pub const PIXEL_FORMAT_RGB565: u32 = 0x0210_0005;
pub const PIXEL_FORMAT_RGB8: u32 = 0x0218_0014;
pub const PIXEL_FORMAT_JPEG: u32 = 0x8000_0001;

/// Formats the endpoint accepts in the pixel-format register.
pub const SUPPORTED_PIXEL_FORMATS: [u32; 5] = [
    PIXEL_FORMAT_MONO8,
    PIXEL_FORMAT_YUV422,
    PIXEL_FORMAT_RGB565,
    PIXEL_FORMAT_RGB8,
    PIXEL_FORMAT_JPEG,
];

/// Bits per pixel from the PFNC size field, or `None` for compressed
/// formats whose frame length is not a function of the geometry.
pub fn bits_per_pixel(pixel_format: u32) -> Option<u32> {
    if pixel_format == PIXEL_FORMAT_JPEG {
        return None;
    }
    match (pixel_format >> 16) & 0xFF {
        0 => None,
        bpp => Some(bpp),
    }
}

/// Stream packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GvspHeader {
    pub packet_kind: u8,
    pub flags: u8,
    pub packet_id: u16,
    /// `data[0]` is the block id; `data[1]` is the byte offset for data
    /// packets and zero otherwise.
    pub data: [u32; 2],
}

impl GvspHeader {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(crate::error::WireError::HeaderTooShort { len: buf.len() });
        }
        Ok(Self {
            packet_kind: buf[0],
            flags: buf[1],
            packet_id: codec::read_u16(buf, 2)?,
            data: [codec::read_u32(buf, 4)?, codec::read_u32(buf, 8)?],
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.packet_kind);
        buf.push(self.flags);
        codec::write_u16(buf, self.packet_id);
        codec::write_u32(buf, self.data[0]);
        codec::write_u32(buf, self.data[1]);
    }
}

/// Leader payload: frame geometry and capture timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leader {
    /// Zero for plain image frames; multipart component index otherwise.
    pub flags: u16,
    pub payload_type: u16,
    /// Platform microsecond clock at capture, hi word first on the wire.
    pub timestamp: u64,
    pub pixel_format: u32,
    pub size_x: u32,
    pub size_y: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub padding_x: u16,
    pub padding_y: u16,
}

impl Leader {
    pub const SIZE: usize = 36;

    pub fn encode(&self, buf: &mut Vec<u8>) {
        codec::write_u16(buf, self.flags);
        codec::write_u16(buf, self.payload_type);
        codec::write_u64(buf, self.timestamp);
        codec::write_u32(buf, self.pixel_format);
        codec::write_u32(buf, self.size_x);
        codec::write_u32(buf, self.size_y);
        codec::write_u32(buf, self.offset_x);
        codec::write_u32(buf, self.offset_y);
        codec::write_u16(buf, self.padding_x);
        codec::write_u16(buf, self.padding_y);
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            flags: codec::read_u16(payload, 0)?,
            payload_type: codec::read_u16(payload, 2)?,
            timestamp: codec::read_u64(payload, 4)?,
            pixel_format: codec::read_u32(payload, 12)?,
            size_x: codec::read_u32(payload, 16)?,
            size_y: codec::read_u32(payload, 20)?,
            offset_x: codec::read_u32(payload, 24)?,
            offset_y: codec::read_u32(payload, 28)?,
            padding_x: codec::read_u16(payload, 32)?,
            padding_y: codec::read_u16(payload, 34)?,
        })
    }
}

/// Trailer payload: closes a block, repeating the effective height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Zero for plain image frames; multipart component index otherwise.
    pub reserved: u16,
    pub payload_type: u16,
    pub size_y: u32,
}

impl Trailer {
    pub const SIZE: usize = 8;

    pub fn encode(&self, buf: &mut Vec<u8>) {
        codec::write_u16(buf, self.reserved);
        codec::write_u16(buf, self.payload_type);
        codec::write_u32(buf, self.size_y);
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            reserved: codec::read_u16(payload, 0)?,
            payload_type: codec::read_u16(payload, 2)?,
            size_y: codec::read_u32(payload, 4)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let hdr = GvspHeader {
            packet_kind: PACKET_KIND_DATA,
            flags: 0,
            packet_id: 17,
            data: [42, 1400],
        };
        let mut buf = Vec::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(GvspHeader::decode(&buf).unwrap(), hdr);
    }

    #[test]
    fn leader_round_trip() {
        let leader = Leader {
            flags: 0,
            payload_type: PAYLOAD_TYPE_IMAGE,
            timestamp: 0x0000_0012_3456_789A,
            pixel_format: PIXEL_FORMAT_MONO8,
            size_x: 320,
            size_y: 240,
            offset_x: 0,
            offset_y: 0,
            padding_x: 0,
            padding_y: 0,
        };
        let mut buf = Vec::new();
        leader.encode(&mut buf);
        assert_eq!(buf.len(), Leader::SIZE);
        assert_eq!(Leader::decode(&buf).unwrap(), leader);
        // timestamp hi word precedes lo word
        assert_eq!(&buf[4..8], &[0x00, 0x00, 0x00, 0x12]);
        assert_eq!(&buf[8..12], &[0x34, 0x56, 0x78, 0x9A]);
    }

    #[test]
    fn trailer_round_trip() {
        let trailer = Trailer {
            reserved: 0,
            payload_type: PAYLOAD_TYPE_IMAGE,
            size_y: 240,
        };
        let mut buf = Vec::new();
        trailer.encode(&mut buf);
        assert_eq!(buf.len(), Trailer::SIZE);
        assert_eq!(Trailer::decode(&buf).unwrap(), trailer);
    }

    #[test]
    fn bits_per_pixel_from_pfnc() {
        assert_eq!(bits_per_pixel(PIXEL_FORMAT_MONO8), Some(8));
        assert_eq!(bits_per_pixel(PIXEL_FORMAT_RGB565), Some(16));
        assert_eq!(bits_per_pixel(PIXEL_FORMAT_YUV422), Some(16));
        assert_eq!(bits_per_pixel(PIXEL_FORMAT_RGB8), Some(24));
        assert_eq!(bits_per_pixel(PIXEL_FORMAT_JPEG), None);
    }
}
