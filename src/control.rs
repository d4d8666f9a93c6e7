//! GVCP control service: the request/response UDP server on port 3956.
//!
//! One datagram in, exactly one ACK or NACK out; a datagram whose header
//! is unparseable is dropped as noise. The receive timeout doubles as the
//! periodic tick that drives discovery broadcasts and feeds the watchdog.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::bootstrap::BootstrapMemory;
use crate::codec;
use crate::discovery::{DiscoveryBroadcaster, DiscoveryControl};
use crate::error::WireError;
use crate::protocol::Command;
use crate::protocol::gvcp::{self, GvcpHeader, Status};
use crate::registers::RegisterMap;
use crate::ring::RingError;
use crate::stats::{self, STATUS_GVCP_SOCKET_UP, Stats};
use crate::streaming::{GvspSender, StreamShared};

const RECV_TIMEOUT: Duration = Duration::from_millis(500);
const POST_DISPATCH_YIELD: Duration = Duration::from_millis(1);
const RECV_BUFFER: usize = 2048;

/// Send-failure threshold and rate limit for socket recreation.
const REBUILD_FAILURE_THRESHOLD: u32 = 3;
const REBUILD_COOLDOWN: Duration = Duration::from_secs(15);

pub struct ControlService {
    socket: UdpSocket,
    port: u16,
    bootstrap: Arc<Mutex<BootstrapMemory>>,
    registers: Arc<RegisterMap>,
    shared: Arc<StreamShared>,
    gvsp: GvspSender,
    discovery: Arc<DiscoveryControl>,
    broadcaster: DiscoveryBroadcaster,
    stats: Arc<Stats>,
    /// Fed on every tick; the host wires this to its watchdog reset.
    watchdog: Option<Box<dyn Fn() + Send>>,
    send_failures: u32,
    last_rebuild: Instant,
    running: Arc<AtomicBool>,
}

impl ControlService {
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        port: u16,
        bootstrap: Arc<Mutex<BootstrapMemory>>,
        registers: Arc<RegisterMap>,
        shared: Arc<StreamShared>,
        gvsp: GvspSender,
        discovery: Arc<DiscoveryControl>,
        broadcaster: DiscoveryBroadcaster,
        stats: Arc<Stats>,
    ) -> io::Result<Self> {
        let socket = Self::open_socket(port)?;
        let port = socket.local_addr()?.port();
        stats.set_status(STATUS_GVCP_SOCKET_UP);
        info!("gvcp socket bound on port {port}");
        Ok(Self {
            socket,
            port,
            bootstrap,
            registers,
            shared,
            gvsp,
            discovery,
            broadcaster,
            stats,
            watchdog: None,
            send_failures: 0,
            last_rebuild: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    fn open_socket(port: u16) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
        Ok(socket.into())
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Install the watchdog feed called from the periodic tick.
    pub fn set_watchdog(&mut self, feed: impl Fn() + Send + 'static) {
        self.watchdog = Some(Box::new(feed));
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn run(&mut self) {
        info!("control service up");
        let mut buf = [0u8; RECV_BUFFER];
        while self.running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, peer)) => {
                    self.handle_datagram(&buf[..n], peer);
                    std::thread::sleep(POST_DISPATCH_YIELD);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    self.tick();
                }
                Err(e) => {
                    warn!("gvcp recv failed: {e}");
                    self.tick();
                }
            }
        }
        info!("control service down");
    }

    /// Periodic work between datagrams: discovery emission and watchdog.
    pub fn tick(&mut self) {
        let payload = match self.bootstrap.lock() {
            Ok(mem) => mem.discovery_slice().to_vec(),
            Err(poisoned) => poisoned.into_inner().discovery_slice().to_vec(),
        };
        self.broadcaster
            .tick(&self.discovery, &self.socket, &payload, &self.stats);
        if let Some(feed) = &self.watchdog {
            feed();
        }
    }

    /// Process one datagram and emit at most one response.
    pub fn handle_datagram(&mut self, data: &[u8], peer: SocketAddr) {
        let header = match GvcpHeader::decode(data) {
            Ok(header) => header,
            Err(_) => return, // not even a header; drop as noise
        };
        if let Err(e) = header.validate_command(data.len()) {
            match e {
                WireError::NotACommand { .. } => (),
                _ => {
                    debug!("bad framing from {peer}: {e}");
                    self.respond_nack(&header, Status::InvalidHeader, peer);
                }
            }
            return;
        }

        stats::bump(&self.stats.gvcp_commands);
        if let IpAddr::V4(ip) = peer.ip() {
            self.shared.touch_activity(ip);
        }

        let command = match Command::decode(&header, &data[gvcp::HEADER_SIZE..]) {
            Ok(command) => command,
            Err(e) => {
                debug!("undecodable {:#06X} payload from {peer}: {e}", header.command);
                self.respond_nack(&header, Status::InvalidHeader, peer);
                return;
            }
        };

        match command {
            Command::Discovery => self.on_discovery(&header, peer),
            Command::ReadMem(cmd) => self.on_read_mem(&header, cmd, peer),
            Command::WriteMem(cmd) => self.on_write_mem(&header, cmd, peer),
            Command::ReadReg(cmd) => self.on_read_reg(&header, cmd, peer),
            Command::WriteReg(cmd) => self.on_write_reg(&header, cmd, peer),
            Command::PacketResend(cmd) => self.on_packet_resend(&header, cmd, peer),
            Command::Unknown { command } => {
                debug!("unimplemented command {command:#06X} from {peer}");
                self.respond_nack(&header, Status::NotImplemented, peer);
            }
        }
    }

    // -- per-operation handlers ---------------------------------------------

    fn on_discovery(&mut self, header: &GvcpHeader, peer: SocketAddr) {
        let payload = match self.bootstrap.lock() {
            Ok(mem) => mem.discovery_slice().to_vec(),
            Err(poisoned) => poisoned.into_inner().discovery_slice().to_vec(),
        };
        if let IpAddr::V4(ip) = peer.ip() {
            self.shared.bind_client(ip);
        }
        debug!("discovery from {peer}");
        self.respond(gvcp::ack(header, &payload), peer);
    }

    fn on_read_mem(&mut self, header: &GvcpHeader, cmd: gvcp::ReadMem, peer: SocketAddr) {
        match self.registers.read_bytes(cmd.address, cmd.length as usize) {
            Ok(data) => {
                let mut payload = Vec::with_capacity(4 + data.len());
                codec::write_u32(&mut payload, cmd.address);
                payload.extend_from_slice(&data);
                self.respond(gvcp::ack(header, &payload), peer);
            }
            Err(e) => self.respond_nack(header, Status::from_register_error(&e), peer),
        }
    }

    fn on_write_mem(&mut self, header: &GvcpHeader, cmd: gvcp::WriteMem, peer: SocketAddr) {
        match self.registers.write_bytes(cmd.address, &cmd.data) {
            Ok(()) => {
                let mut payload = Vec::with_capacity(4);
                codec::write_u32(&mut payload, cmd.address);
                self.respond(gvcp::ack(header, &payload), peer);
            }
            Err(e) => self.respond_nack(header, Status::from_register_error(&e), peer),
        }
    }

    fn on_read_reg(&mut self, header: &GvcpHeader, cmd: gvcp::ReadReg, peer: SocketAddr) {
        match self.registers.read_word(cmd.address) {
            Ok(value) => {
                let mut payload = Vec::with_capacity(4);
                codec::write_u32(&mut payload, value);
                self.respond(gvcp::ack(header, &payload), peer);
            }
            Err(e) => self.respond_nack(header, Status::from_register_error(&e), peer),
        }
    }

    fn on_write_reg(&mut self, header: &GvcpHeader, cmd: gvcp::WriteReg, peer: SocketAddr) {
        match self.registers.write_word(cmd.address, cmd.value) {
            Ok(()) => self.respond(gvcp::ack(header, &[]), peer),
            Err(e) => self.respond_nack(header, Status::from_register_error(&e), peer),
        }
    }

    fn on_packet_resend(&mut self, header: &GvcpHeader, cmd: gvcp::PacketResend, peer: SocketAddr) {
        if cmd.stream_index != 0 {
            self.respond_nack(header, Status::InvalidParameter, peer);
            return;
        }
        if !self.shared.streaming_active() {
            self.respond_nack(header, Status::WrongConfig, peer);
            return;
        }
        match self.gvsp.resend(cmd.block_id) {
            Ok(()) => {
                let mut payload = Vec::with_capacity(8);
                codec::write_u32(&mut payload, cmd.stream_index);
                codec::write_u32(&mut payload, cmd.block_id);
                self.respond(gvcp::ack(header, &payload), peer);
            }
            Err(RingError::NotFound { .. }) => {
                self.respond_nack(header, Status::InvalidParameter, peer)
            }
            Err(RingError::LockTimeout(_)) => self.respond_nack(header, Status::Busy, peer),
        }
    }

    // -- transmission -------------------------------------------------------

    fn respond_nack(&mut self, header: &GvcpHeader, status: Status, peer: SocketAddr) {
        stats::bump(&self.stats.gvcp_errors);
        self.respond(gvcp::nack(header, status), peer);
    }

    fn respond(&mut self, packet: Vec<u8>, peer: SocketAddr) {
        match self.socket.send_to(&packet, peer) {
            Ok(_) => self.send_failures = 0,
            Err(e) => {
                warn!("gvcp send to {peer} failed: {e}");
                self.send_failures += 1;
                stats::bump(&self.stats.send_failures);
                self.maybe_rebuild_socket();
            }
        }
    }

    /// Recreate the socket after repeated send failures, at most once per
    /// cooldown window.
    fn maybe_rebuild_socket(&mut self) {
        if self.send_failures < REBUILD_FAILURE_THRESHOLD
            || self.last_rebuild.elapsed() < REBUILD_COOLDOWN
        {
            return;
        }
        match Self::open_socket(self.port) {
            Ok(socket) => {
                info!("gvcp socket recreated after {} send failures", self.send_failures);
                self.socket = socket;
                self.send_failures = 0;
                self.last_rebuild = Instant::now();
            }
            Err(e) => warn!("gvcp socket recreation failed: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{DISCOVERY_DATA_SIZE, DeviceIdentity, LinkInfo};
    use crate::camera::{Camera, TestPatternCamera};
    use crate::registers::{RegisterBackends, XML_BASE_ADDRESS, regs};
    use crate::ring::FrameRing;
    use crate::settings::MemoryStore;
    use crate::streaming::{StreamTimings, StreamingService};

    struct Harness {
        service: ControlService,
        shared: Arc<StreamShared>,
        streaming: StreamingService,
        client: UdpSocket,
        client_addr: SocketAddr,
    }

    fn harness() -> Harness {
        let xml: &[u8] = b"<RegisterDescription name=\"gevcam\"/>";
        let stats = Arc::new(Stats::new());
        let shared = Arc::new(StreamShared::new(Arc::clone(&stats)));
        let ring = Arc::new(FrameRing::new());
        let camera: Arc<Mutex<Box<dyn Camera>>> =
            Arc::new(Mutex::new(Box::new(TestPatternCamera::new(320, 240))));
        let discovery = Arc::new(DiscoveryControl::new());
        let link = LinkInfo::default();
        let bootstrap = Arc::new(Mutex::new(BootstrapMemory::init(
            &link,
            &DeviceIdentity::default(),
            xml.len(),
        )));
        let registers = Arc::new(RegisterMap::new(
            Arc::clone(&bootstrap),
            Arc::from(xml),
            RegisterBackends {
                camera: Arc::clone(&camera),
                stream: Arc::clone(&shared),
                ring: Arc::clone(&ring),
                discovery: Arc::clone(&discovery),
                settings: Arc::new(MemoryStore::new()),
                stats: Arc::clone(&stats),
            },
        ));
        let streaming = StreamingService::bind(
            0,
            Arc::clone(&shared),
            Arc::clone(&ring),
            Arc::clone(&stats),
            camera,
            StreamTimings::default(),
        )
        .unwrap();
        let service = ControlService::bind(
            0,
            bootstrap,
            registers,
            Arc::clone(&shared),
            streaming.sender(),
            Arc::clone(&discovery),
            DiscoveryBroadcaster::new(&link),
            stats,
        )
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let client_addr = client.local_addr().unwrap();
        Harness {
            service,
            shared,
            streaming,
            client,
            client_addr,
        }
    }

    fn recv(client: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 16 * 1024];
        let (n, _) = client.recv_from(&mut buf).expect("control response");
        buf[..n].to_vec()
    }

    fn readreg(address: u32, id: u16) -> Vec<u8> {
        let mut wire = vec![0x42, 0x01, 0x00, 0x80, 0x00, 0x01];
        codec::write_u16(&mut wire, id);
        codec::write_u32(&mut wire, address);
        wire
    }

    fn writereg(address: u32, value: u32, id: u16) -> Vec<u8> {
        let mut wire = vec![0x42, 0x01, 0x00, 0x82, 0x00, 0x02];
        codec::write_u16(&mut wire, id);
        codec::write_u32(&mut wire, address);
        codec::write_u32(&mut wire, value);
        wire
    }

    #[test]
    fn discovery_echo_scenario() {
        let mut h = harness();
        let wire = [0x42, 0x01, 0x00, 0x02, 0x00, 0x00, 0x12, 0x34];
        h.service.handle_datagram(&wire, h.client_addr);

        let reply = recv(&h.client);
        assert_eq!(&reply[..8], &[0x00, 0x00, 0x00, 0x03, 0x00, 0x3E, 0x12, 0x34]);
        assert_eq!(reply.len(), 8 + DISCOVERY_DATA_SIZE);
        // Discovery bound us as the stream client.
        assert!(h.shared.is_client(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn readreg_pixel_format_mono8() {
        let mut h = harness();
        h.service
            .handle_datagram(&readreg(regs::PIXEL_FORMAT, 0x0001), h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(reply[0], 0x00);
        assert_eq!(&reply[2..4], &[0x00, 0x81]); // READREG ack
        assert_eq!(&reply[6..8], &[0x00, 0x01]);
        assert_eq!(&reply[8..12], &[0x01, 0x08, 0x00, 0x01]);
    }

    #[test]
    fn readreg_unaligned_nacks_bad_alignment() {
        let mut h = harness();
        h.service.handle_datagram(&readreg(0x1001, 0x0002), h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(reply[0], 0x80);
        assert_eq!(&reply[6..8], &[0x00, 0x02]);
        assert_eq!(&reply[8..10], &[0x80, 0x05]);
    }

    #[test]
    fn write_xml_region_nacks_write_protect() {
        let mut h = harness();
        let mut wire = vec![0x42, 0x01, 0x00, 0x86, 0x00, 0x02, 0x00, 0x09];
        codec::write_u32(&mut wire, XML_BASE_ADDRESS);
        codec::write_u32(&mut wire, 0);
        h.service.handle_datagram(&wire, h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(reply[0], 0x80);
        assert_eq!(&reply[8..10], &[0x80, 0x04]);
    }

    #[test]
    fn read_mem_returns_address_then_bytes() {
        let mut h = harness();
        let mut wire = vec![0x42, 0x01, 0x00, 0x84, 0x00, 0x02, 0x00, 0x0A];
        codec::write_u32(&mut wire, 0x0048); // manufacturer name
        codec::write_u32(&mut wire, 16);
        h.service.handle_datagram(&wire, h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(reply[0], 0x00);
        assert_eq!(&reply[8..12], &[0x00, 0x00, 0x00, 0x48]);
        assert_eq!(&reply[12..18], b"gevcam");
    }

    #[test]
    fn writereg_round_trip_via_wire() {
        let mut h = harness();
        h.service
            .handle_datagram(&writereg(regs::PACKET_SIZE, 1000, 5), h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(reply[0], 0x00);
        assert_eq!(reply.len(), 8); // empty ACK

        h.service
            .handle_datagram(&readreg(regs::PACKET_SIZE, 6), h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(&reply[8..12], &1000u32.to_be_bytes());
    }

    #[test]
    fn out_of_range_writereg_nacks_invalid_parameter() {
        let mut h = harness();
        h.service
            .handle_datagram(&writereg(regs::FRAME_RATE_FPS, 99, 7), h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(reply[0], 0x80);
        assert_eq!(&reply[8..10], &[0x80, 0x02]);
    }

    #[test]
    fn size_mismatch_nacks_invalid_header() {
        let mut h = harness();
        // Header says one word, datagram carries none.
        let wire = [0x42, 0x01, 0x00, 0x80, 0x00, 0x01, 0x00, 0x0B];
        h.service.handle_datagram(&wire, h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(reply[0], 0x80);
        assert_eq!(&reply[6..8], &[0x00, 0x0B]);
        assert_eq!(&reply[8..10], &[0x80, 0x0E]);
    }

    #[test]
    fn short_datagram_is_dropped_silently() {
        let mut h = harness();
        h.service.handle_datagram(&[0x42, 0x01, 0x00], h.client_addr);
        let mut buf = [0u8; 64];
        h.client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        assert!(h.client.recv_from(&mut buf).is_err());
    }

    #[test]
    fn unknown_command_nacks_not_implemented() {
        let mut h = harness();
        let wire = [0x42, 0x01, 0x00, 0xFE, 0x00, 0x00, 0x00, 0x0C];
        h.service.handle_datagram(&wire, h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(reply[0], 0x80);
        assert_eq!(&reply[8..10], &[0x80, 0x01]);
    }

    #[test]
    fn every_response_echoes_the_request_id() {
        let mut h = harness();
        for (id, wire) in [
            (0x1111, readreg(regs::PIXEL_FORMAT, 0x1111)),
            (0x2222, readreg(0x1001, 0x2222)),
            (0x3333, writereg(regs::FRAME_RATE_FPS, 99, 0x3333)),
            (0x4444, vec![0x42, 0x01, 0x00, 0x02, 0x00, 0x00, 0x44, 0x44]),
        ] {
            h.service.handle_datagram(&wire, h.client_addr);
            let reply = recv(&h.client);
            assert_eq!(
                u16::from_be_bytes([reply[6], reply[7]]),
                id,
                "wire {wire:02X?}"
            );
        }
    }

    #[test]
    fn packet_resend_contract() {
        let mut h = harness();

        let resend = |stream_index: u32, block_id: u32, id: u16| {
            let mut wire = vec![0x42, 0x01, 0x00, 0x40, 0x00, 0x02];
            codec::write_u16(&mut wire, id);
            codec::write_u32(&mut wire, stream_index);
            codec::write_u32(&mut wire, block_id);
            wire
        };

        // Streaming inactive: WRONG_CONFIG.
        h.service.handle_datagram(&resend(0, 1, 1), h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(&reply[8..10], &[0x80, 0x0F]);

        // Bind ourselves and start; stream one frame so block 1 is retained.
        assert!(h.shared.set_scp_host_port(u32::from(h.client_addr.port())));
        h.shared.bind_client(Ipv4Addr::LOCALHOST);
        assert!(h.shared.set_frame_rate_fps(30));
        assert!(h.shared.set_packet_delay_us(100));
        h.shared.request_start();
        h.streaming.poll();
        for _ in 0..57 {
            recv(&h.client); // drain the burst
        }

        // Non-zero stream index: INVALID_PARAMETER.
        h.service.handle_datagram(&resend(1, 1, 2), h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(&reply[8..10], &[0x80, 0x02]);

        // Unknown block while streaming: INVALID_PARAMETER.
        h.service
            .handle_datagram(&resend(0, 999_999, 3), h.client_addr);
        let reply = recv(&h.client);
        assert_eq!(&reply[8..10], &[0x80, 0x02]);

        // Retained block: full burst re-emitted, then the echoed pair.
        h.service.handle_datagram(&resend(0, 1, 4), h.client_addr);
        let mut packets = Vec::new();
        for _ in 0..58 {
            packets.push(recv(&h.client));
        }
        // 57 stream packets plus one control ACK, in some interleaving;
        // find the ACK by its GVCP kind and command.
        let ack = packets
            .iter()
            .find(|p| p[0] == 0x00 && p[2..4] == [0x00, 0x41])
            .expect("resend ack");
        assert_eq!(&ack[6..8], &[0x00, 0x04]);
        assert_eq!(&ack[8..12], &0u32.to_be_bytes());
        assert_eq!(&ack[12..16], &1u32.to_be_bytes());
    }
}
