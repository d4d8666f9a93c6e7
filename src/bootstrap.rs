//! Bootstrap register memory: the well-known low-address region carrying
//! device identity and network state.
//!
//! The buffer is populated once at boot, after link-up (it needs the MAC and
//! IP), and re-populated on link changes. Discovery replies carry its first
//! [`DISCOVERY_DATA_SIZE`] bytes verbatim; the register map serves the rest
//! and enforces which windows are writable.

use std::net::Ipv4Addr;

use crate::codec;
use crate::discovery::derive_uuid;
use crate::registers::XML_BASE_ADDRESS;

/// Total size of bootstrap memory.
pub const BOOTSTRAP_SIZE: usize = 0x940;

/// Bytes of bootstrap memory carried in a discovery acknowledgement.
pub const DISCOVERY_DATA_SIZE: usize = 248;

/// Register offsets within bootstrap memory. All cells are big-endian
/// 32-bit words unless a width is noted.
pub mod offsets {
    pub const VERSION: usize = 0x000;
    pub const DEVICE_MODE: usize = 0x004;
    pub const MAC_HIGH: usize = 0x008;
    pub const MAC_LOW: usize = 0x00C;
    pub const NET_CAPABILITY: usize = 0x010;
    pub const SUBNET_MASK: usize = 0x014;
    pub const DEFAULT_GATEWAY: usize = 0x018;
    pub const IP_CONFIG_CURRENT: usize = 0x01C;
    pub const IP_CONFIG_SUPPORTED: usize = 0x020;
    pub const CURRENT_IP: usize = 0x024;
    pub const LINK_SPEED: usize = 0x02C;
    /// 32-byte string.
    pub const MANUFACTURER_NAME: usize = 0x048;
    /// 32-byte string.
    pub const MODEL_NAME: usize = 0x068;
    /// 32-byte string.
    pub const DEVICE_VERSION: usize = 0x088;
    /// 16-byte string.
    pub const SERIAL_NUMBER: usize = 0x0D8;
    /// 16-byte string, client-writable.
    pub const USER_DEFINED_NAME: usize = 0x0E8;
    /// 16 bytes, directly after the user-defined name window.
    pub const DEVICE_UUID: usize = 0x0F8;
    /// Control-channel privilege, client-writable.
    pub const CCP: usize = 0x200;
    /// Privilege key, client-writable.
    pub const PRIVILEGE_KEY: usize = 0x204;
    /// XML-URL string.
    pub const XML_URL: usize = 0x220;
    pub const HEARTBEAT_TIMEOUT: usize = 0x934;
}

pub const NAME_FIELD_32: usize = 32;
pub const NAME_FIELD_16: usize = 16;
pub const XML_URL_FIELD: usize = 256;

// Device mode bits.
const DEVICE_MODE_BIG_ENDIAN: u32 = 1 << 31;
const DEVICE_MODE_CHARSET_UTF8: u32 = 0x0000_0001;

// IP configuration method bits, shared by the current and supported cells.
const IP_CONFIG_PERSISTENT: u32 = 1 << 0;
const IP_CONFIG_DHCP: u32 = 1 << 1;
const IP_CONFIG_LLA: u32 = 1 << 2;

const LINK_SPEED_MBPS: u32 = 100;
const HEARTBEAT_TIMEOUT_MS: u32 = 3000;

/// Network parameters captured at link-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl Default for LinkInfo {
    fn default() -> Self {
        Self {
            mac: [0x02, 0x00, 0x00, 0xC0, 0xFF, 0xEE],
            ip: Ipv4Addr::new(192, 168, 1, 100),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
        }
    }
}

/// Static device identity reported through bootstrap memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub version: String,
    pub serial: String,
    pub user_name: String,
    /// Silicon identity bytes folded into the device UUID.
    pub chip_id: [u8; 8],
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "gevcam".into(),
            model: "gevcam-one".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            serial: "GC000000".into(),
            user_name: String::new(),
            chip_id: [0; 8],
        }
    }
}

/// The bootstrap register buffer.
#[derive(Debug)]
pub struct BootstrapMemory {
    buf: Vec<u8>,
}

impl BootstrapMemory {
    /// Build and populate bootstrap memory. `xml_len` sizes the XML-URL
    /// pointer string.
    pub fn init(link: &LinkInfo, identity: &DeviceIdentity, xml_len: usize) -> Self {
        let mut mem = Self {
            buf: vec![0; BOOTSTRAP_SIZE],
        };

        codec::put_u32(&mut mem.buf, offsets::VERSION, 1 << 16); // major 1, minor 0
        codec::put_u32(
            &mut mem.buf,
            offsets::DEVICE_MODE,
            DEVICE_MODE_BIG_ENDIAN | DEVICE_MODE_CHARSET_UTF8,
        );
        codec::put_u32(
            &mut mem.buf,
            offsets::IP_CONFIG_SUPPORTED,
            IP_CONFIG_PERSISTENT | IP_CONFIG_DHCP | IP_CONFIG_LLA,
        );
        codec::put_u32(
            &mut mem.buf,
            offsets::NET_CAPABILITY,
            IP_CONFIG_PERSISTENT | IP_CONFIG_DHCP | IP_CONFIG_LLA,
        );

        mem.write_str(offsets::MANUFACTURER_NAME, NAME_FIELD_32, &identity.manufacturer);
        mem.write_str(offsets::MODEL_NAME, NAME_FIELD_32, &identity.model);
        mem.write_str(offsets::DEVICE_VERSION, NAME_FIELD_32, &identity.version);
        mem.write_str(offsets::SERIAL_NUMBER, NAME_FIELD_16, &identity.serial);
        mem.write_str(offsets::USER_DEFINED_NAME, NAME_FIELD_16, &identity.user_name);

        let uuid = derive_uuid(&link.mac, &identity.model, &identity.version, &identity.chip_id);
        mem.buf[offsets::DEVICE_UUID..offsets::DEVICE_UUID + 16].copy_from_slice(&uuid);

        let url = format!("Local:gevcam.xml;{XML_BASE_ADDRESS:X};{xml_len:X}");
        mem.write_str(offsets::XML_URL, XML_URL_FIELD, &url);

        codec::put_u32(&mut mem.buf, offsets::HEARTBEAT_TIMEOUT, HEARTBEAT_TIMEOUT_MS);

        mem.refresh_link(link);
        mem
    }

    /// Rewrite only the network cells. Identity, UUID, privilege and
    /// user-name state survive a link change.
    pub fn refresh_link(&mut self, link: &LinkInfo) {
        let mac_high = u32::from(link.mac[0]) << 8 | u32::from(link.mac[1]);
        let mac_low = u32::from_be_bytes([link.mac[2], link.mac[3], link.mac[4], link.mac[5]]);
        codec::put_u32(&mut self.buf, offsets::MAC_HIGH, mac_high);
        codec::put_u32(&mut self.buf, offsets::MAC_LOW, mac_low);
        codec::put_u32(&mut self.buf, offsets::SUBNET_MASK, link.netmask.to_bits());
        codec::put_u32(&mut self.buf, offsets::DEFAULT_GATEWAY, link.gateway.to_bits());
        codec::put_u32(&mut self.buf, offsets::IP_CONFIG_CURRENT, IP_CONFIG_DHCP);
        codec::put_u32(&mut self.buf, offsets::CURRENT_IP, link.ip.to_bits());
        codec::put_u32(&mut self.buf, offsets::LINK_SPEED, LINK_SPEED_MBPS);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow `len` bytes at `offset`. `None` when the range leaves the
    /// buffer.
    pub fn read(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.buf.get(offset..offset.checked_add(len)?)
    }

    /// The slice a discovery acknowledgement carries.
    pub fn discovery_slice(&self) -> &[u8] {
        &self.buf[..DISCOVERY_DATA_SIZE]
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        self.read(offset, 4).map(|b| codec::get_u32(b, 0))
    }

    /// Raw write. Policy (which windows a client may touch) is enforced by
    /// the register map, not here.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> bool {
        match self.buf.get_mut(offset..offset + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    pub fn write_u32(&mut self, offset: usize, val: u32) -> bool {
        self.write(offset, &val.to_be_bytes())
    }

    /// True when the whole `[offset, offset+len)` range lies in a
    /// client-writable window (user-defined name, CCP, privilege key).
    pub fn client_writable(offset: usize, len: usize) -> bool {
        const WINDOWS: [(usize, usize); 3] = [
            (offsets::USER_DEFINED_NAME, NAME_FIELD_16),
            (offsets::CCP, 4),
            (offsets::PRIVILEGE_KEY, 4),
        ];
        len > 0
            && WINDOWS
                .iter()
                .any(|&(start, width)| offset >= start && offset + len <= start + width)
    }

    /// Clamp a string into a fixed window, always leaving a terminating NUL.
    fn write_str(&mut self, offset: usize, width: usize, s: &str) {
        let window = &mut self.buf[offset..offset + width];
        window.fill(0);
        let n = s.len().min(width - 1);
        window[..n].copy_from_slice(&s.as_bytes()[..n]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn boot() -> BootstrapMemory {
        BootstrapMemory::init(&LinkInfo::default(), &DeviceIdentity::default(), 0x200)
    }

    #[test]
    fn version_and_mode() {
        let mem = boot();
        assert_eq!(mem.read_u32(offsets::VERSION).unwrap(), 0x0001_0000);
        let mode = mem.read_u32(offsets::DEVICE_MODE).unwrap();
        assert_ne!(mode & DEVICE_MODE_CHARSET_UTF8, 0);
    }

    #[test]
    fn mac_split_high_low() {
        let mem = boot();
        assert_eq!(mem.read_u32(offsets::MAC_HIGH).unwrap(), 0x0000_0200);
        assert_eq!(mem.read_u32(offsets::MAC_LOW).unwrap(), 0x00C0_FFEE);
    }

    #[test]
    fn network_cells_follow_link_info() {
        let mem = boot();
        assert_eq!(
            mem.read_u32(offsets::CURRENT_IP).unwrap(),
            u32::from(Ipv4Addr::new(192, 168, 1, 100))
        );
        assert_eq!(
            mem.read_u32(offsets::SUBNET_MASK).unwrap(),
            u32::from(Ipv4Addr::new(255, 255, 255, 0))
        );
    }

    #[test]
    fn strings_are_clamped_and_terminated() {
        let identity = DeviceIdentity {
            model: "x".repeat(64),
            ..Default::default()
        };
        let mem = BootstrapMemory::init(&LinkInfo::default(), &identity, 0);
        let field = mem.read(offsets::MODEL_NAME, NAME_FIELD_32).unwrap();
        assert_eq!(&field[..31], "x".repeat(31).as_bytes());
        assert_eq!(field[31], 0);
    }

    #[test]
    fn refresh_link_preserves_identity() {
        let mut mem = boot();
        assert!(mem.write(offsets::USER_DEFINED_NAME, b"bench-rig\0"));
        let uuid_before = mem.read(offsets::DEVICE_UUID, 16).unwrap().to_vec();
        let new_link = LinkInfo {
            ip: Ipv4Addr::new(10, 0, 0, 7),
            ..Default::default()
        };
        mem.refresh_link(&new_link);
        assert_eq!(
            mem.read_u32(offsets::CURRENT_IP).unwrap(),
            u32::from(Ipv4Addr::new(10, 0, 0, 7))
        );
        assert_eq!(mem.read(offsets::DEVICE_UUID, 16).unwrap(), &uuid_before[..]);
        assert_eq!(&mem.read(offsets::USER_DEFINED_NAME, 10).unwrap()[..9], b"bench-rig");
    }

    #[test]
    fn read_round_trips_written_bytes() {
        // Any in-bounds range reads back exactly what init put there.
        let mem = boot();
        let whole = mem.read(0, BOOTSTRAP_SIZE).unwrap().to_vec();
        for (offset, len) in [(0usize, 8usize), (0x48, 32), (0xE8, 16), (0x200, 8), (0x934, 4)] {
            assert_eq!(mem.read(offset, len).unwrap(), &whole[offset..offset + len]);
        }
        assert!(mem.read(BOOTSTRAP_SIZE - 2, 4).is_none());
    }

    #[test]
    fn discovery_slice_is_248_bytes() {
        assert_eq!(boot().discovery_slice().len(), DISCOVERY_DATA_SIZE);
    }

    #[test]
    fn writable_windows() {
        assert!(BootstrapMemory::client_writable(offsets::USER_DEFINED_NAME, 16));
        assert!(BootstrapMemory::client_writable(offsets::USER_DEFINED_NAME + 4, 4));
        assert!(BootstrapMemory::client_writable(offsets::CCP, 4));
        assert!(BootstrapMemory::client_writable(offsets::PRIVILEGE_KEY, 4));
        assert!(!BootstrapMemory::client_writable(offsets::CCP, 8));
        assert!(!BootstrapMemory::client_writable(offsets::SERIAL_NUMBER, 4));
        assert!(!BootstrapMemory::client_writable(offsets::USER_DEFINED_NAME, 0));
        assert!(!BootstrapMemory::client_writable(offsets::USER_DEFINED_NAME + 12, 8));
    }

    #[test]
    fn xml_url_points_at_the_mapped_blob() {
        let mem = BootstrapMemory::init(&LinkInfo::default(), &DeviceIdentity::default(), 0x1234);
        let url = mem.read(offsets::XML_URL, XML_URL_FIELD).unwrap();
        let nul = url.iter().position(|&b| b == 0).unwrap();
        let url = std::str::from_utf8(&url[..nul]).unwrap();
        assert_eq!(url, "Local:gevcam.xml;10000;1234");
    }
}
