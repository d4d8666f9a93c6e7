//! GVSP streaming service: fragments captured frames into
//! leader/data/trailer bursts, paces packets, retains frames for resend,
//! and watches client liveness.
//!
//! The service runs a cooperative loop on its own thread. All mutable
//! stream state sits behind [`StreamShared`], which the register map and
//! control service also hold; nothing here imports control internals.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::camera::Camera;
use crate::protocol::gvsp::{
    self, GvspHeader, Leader, PACKET_KIND_DATA, PACKET_KIND_LEADER, PACKET_KIND_TRAILER,
    PAYLOAD_TYPE_IMAGE, Trailer,
};
use crate::ring::{FrameRing, RingError};
use crate::stats::{
    self, STATUS_CLIENT_CONNECTED, STATUS_CLIENT_TIMEOUT, STATUS_GVSP_SOCKET_UP,
    STATUS_STREAMING_ACTIVE, Stats,
};

// Pacing parameter bounds (register-writable).
pub const PACKET_SIZE_MIN: u32 = 512;
pub const PACKET_SIZE_MAX: u32 = 1400;
pub const PACKET_SIZE_DEFAULT: u32 = 1400;
pub const PACKET_DELAY_US_MIN: u32 = 100;
pub const PACKET_DELAY_US_MAX: u32 = 100_000;
pub const PACKET_DELAY_US_DEFAULT: u32 = 1000;
pub const FRAME_RATE_FPS_MIN: u32 = 1;
pub const FRAME_RATE_FPS_MAX: u32 = 30;
pub const FRAME_RATE_FPS_DEFAULT: u32 = 1;

const SEND_BUFFER_BYTES: usize = 8 * 1024;
const RECV_BUFFER_BYTES: usize = 4 * 1024;
const IDLE_SLEEP: Duration = Duration::from_millis(100);
const STATE_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);
const LOCK_POLL: Duration = Duration::from_millis(1);

// Stream-status register bits.
pub const STREAM_STATUS_ACTIVE: u32 = 1 << 0;
pub const STREAM_STATUS_CLIENT_BOUND: u32 = 1 << 1;
pub const STREAM_STATUS_ERROR: u32 = 1 << 2;
pub const STREAM_STATUS_RECOVERY: u32 = 1 << 3;

/// Liveness policy knobs, compressed in tests.
#[derive(Debug, Clone, Copy)]
pub struct StreamTimings {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub recovery_timeout: Duration,
    pub max_connection_failures: u32,
}

impl Default for StreamTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
            recovery_timeout: Duration::from_secs(60),
            max_connection_failures: 3,
        }
    }
}

/// Platform microsecond clock used for leader timestamps.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
struct StreamState {
    /// Client asked for acquisition; streaming is effective only while a
    /// client is also bound.
    acquisition: bool,
    client: Option<Ipv4Addr>,
    client_port: u16,
    next_block_id: u32,
    connection_failures: u32,
    recovery_until: Option<Instant>,
    last_activity: Instant,
}

impl StreamState {
    fn new() -> Self {
        Self {
            acquisition: false,
            client: None,
            client_port: gvsp::GVSP_PORT,
            next_block_id: 1,
            connection_failures: 0,
            recovery_until: None,
            last_activity: Instant::now(),
        }
    }

    fn streaming(&self) -> bool {
        self.acquisition && self.client.is_some()
    }
}

/// Stream state shared between the streaming loop, the register map, and
/// the control service. Pacing knobs are atomics so register reads never
/// contend with the send path.
#[derive(Debug)]
pub struct StreamShared {
    state: Mutex<StreamState>,
    packet_delay_us: AtomicU32,
    frame_rate_fps: AtomicU32,
    packet_size: AtomicU32,
    scp_host_port: AtomicU32,
    status: AtomicU32,
    stats: Arc<Stats>,
}

impl StreamShared {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            state: Mutex::new(StreamState::new()),
            packet_delay_us: AtomicU32::new(PACKET_DELAY_US_DEFAULT),
            frame_rate_fps: AtomicU32::new(FRAME_RATE_FPS_DEFAULT),
            packet_size: AtomicU32::new(PACKET_SIZE_DEFAULT),
            scp_host_port: AtomicU32::new(0),
            status: AtomicU32::new(0),
            stats,
        }
    }

    // -- pacing knobs -------------------------------------------------------

    pub fn packet_delay_us(&self) -> u32 {
        self.packet_delay_us.load(Ordering::Relaxed)
    }

    pub fn set_packet_delay_us(&self, us: u32) -> bool {
        (PACKET_DELAY_US_MIN..=PACKET_DELAY_US_MAX).contains(&us) && {
            self.packet_delay_us.store(us, Ordering::Relaxed);
            true
        }
    }

    pub fn frame_rate_fps(&self) -> u32 {
        self.frame_rate_fps.load(Ordering::Relaxed)
    }

    pub fn set_frame_rate_fps(&self, fps: u32) -> bool {
        (FRAME_RATE_FPS_MIN..=FRAME_RATE_FPS_MAX).contains(&fps) && {
            self.frame_rate_fps.store(fps, Ordering::Relaxed);
            true
        }
    }

    pub fn packet_size(&self) -> u32 {
        self.packet_size.load(Ordering::Relaxed)
    }

    pub fn set_packet_size(&self, bytes: u32) -> bool {
        (PACKET_SIZE_MIN..=PACKET_SIZE_MAX).contains(&bytes) && {
            self.packet_size.store(bytes, Ordering::Relaxed);
            true
        }
    }

    pub fn scp_host_port(&self) -> u32 {
        self.scp_host_port.load(Ordering::Relaxed)
    }

    /// Clients usually write this after discovery has already bound them,
    /// so an existing binding is re-pointed at the new port.
    pub fn set_scp_host_port(&self, port: u32) -> bool {
        if port > u32::from(u16::MAX) {
            return false;
        }
        self.scp_host_port.store(port, Ordering::Relaxed);
        if let Ok(mut state) = self.lock_state()
            && state.client.is_some()
        {
            state.client_port = match port {
                0 => gvsp::GVSP_PORT,
                p => p as u16,
            };
        }
        true
    }

    // -- status register ----------------------------------------------------

    pub fn stream_status(&self) -> u32 {
        self.status.load(Ordering::Relaxed)
    }

    fn set_status_bits(&self, bits: u32) {
        self.status.fetch_or(bits, Ordering::Relaxed);
    }

    fn clear_status_bits(&self, bits: u32) {
        self.status.fetch_and(!bits, Ordering::Relaxed);
    }

    // -- acquisition & binding ---------------------------------------------

    /// Acquisition-Start: arm streaming and restart block numbering.
    pub fn request_start(&self) {
        if let Ok(mut state) = self.lock_state() {
            state.acquisition = true;
            state.next_block_id = 1;
            state.last_activity = Instant::now();
            if state.streaming() {
                self.set_status_bits(STREAM_STATUS_ACTIVE);
                self.stats.set_status(STATUS_STREAMING_ACTIVE);
            }
            info!("acquisition start (client {:?})", state.client);
        }
    }

    /// Acquisition-Stop: disarm streaming; the loop idles after the packet
    /// in flight.
    pub fn request_stop(&self) {
        if let Ok(mut state) = self.lock_state() {
            state.acquisition = false;
            self.clear_status_bits(STREAM_STATUS_ACTIVE);
            self.stats.clear_status(STATUS_STREAMING_ACTIVE);
            info!("acquisition stop");
        }
    }

    /// Bind `addr` as the stream destination. The port is the SCP-host-port
    /// register when non-zero, the default stream port otherwise.
    pub fn bind_client(&self, addr: Ipv4Addr) {
        let port = match self.scp_host_port() {
            0 => gvsp::GVSP_PORT,
            p => p as u16,
        };
        if let Ok(mut state) = self.lock_state() {
            if state.client != Some(addr) {
                info!("stream client bound: {addr}:{port}");
            }
            state.client = Some(addr);
            state.client_port = port;
            state.last_activity = Instant::now();
            state.connection_failures = 0;
            self.set_status_bits(STREAM_STATUS_CLIENT_BOUND);
            self.stats.set_status(STATUS_CLIENT_CONNECTED);
            if state.streaming() {
                self.set_status_bits(STREAM_STATUS_ACTIVE);
                self.stats.set_status(STATUS_STREAMING_ACTIVE);
            }
        }
    }

    /// Release the client binding and stop streaming. Zeroes the stream
    /// status except the recovery bit, which the heartbeat owns.
    pub fn clear_client(&self) {
        if let Ok(mut state) = self.lock_state() {
            if state.client.is_some() {
                info!("stream client unbound");
            }
            state.client = None;
            state.acquisition = false;
            state.connection_failures = 0;
        }
        self.clear_status_bits(
            STREAM_STATUS_ACTIVE | STREAM_STATUS_CLIENT_BOUND | STREAM_STATUS_ERROR,
        );
        self.stats
            .clear_status(STATUS_STREAMING_ACTIVE | STATUS_CLIENT_CONNECTED);
    }

    /// Any traffic from the bound client refreshes the liveness clock.
    pub fn touch_activity(&self, from: Ipv4Addr) {
        if let Ok(mut state) = self.lock_state()
            && state.client == Some(from)
        {
            state.last_activity = Instant::now();
        }
    }

    pub fn is_client(&self, addr: Ipv4Addr) -> bool {
        self.lock_state()
            .map(|state| state.client == Some(addr))
            .unwrap_or(false)
    }

    pub fn streaming_active(&self) -> bool {
        self.lock_state().map(|s| s.streaming()).unwrap_or(false)
    }

    pub fn in_recovery(&self) -> bool {
        self.lock_state()
            .map(|s| s.recovery_until.is_some())
            .unwrap_or(false)
    }

    /// Destination address while streaming is effective.
    fn streaming_dest(&self) -> Option<SocketAddrV4> {
        let state = self.lock_state().ok()?;
        if !state.streaming() || state.recovery_until.is_some() {
            return None;
        }
        state
            .client
            .map(|ip| SocketAddrV4::new(ip, state.client_port))
    }

    /// Claim the next block id. Strictly monotonic between start and stop.
    fn take_block_id(&self) -> Option<u32> {
        let mut state = self.lock_state().ok()?;
        let id = state.next_block_id;
        state.next_block_id = state.next_block_id.wrapping_add(1);
        Some(id)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, StreamState>, ()> {
        let deadline = Instant::now() + STATE_LOCK_TIMEOUT;
        loop {
            match self.state.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(());
                    }
                    std::thread::sleep(LOCK_POLL);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame sequence tracking
// ---------------------------------------------------------------------------

/// Advisory classification of emitted block ids. In a single-producer
/// endpoint the ids are monotonic by construction, so the non-normal
/// counters stay at zero unless something upstream misbehaves; they exist
/// for the diagnostics registers and logs only.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    expected_next: u32,
    last_received: u32,
    pub out_of_order: u32,
    pub lost: u32,
    pub duplicate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqOutcome {
    InOrder,
    Duplicate,
    Lost(u32),
    OutOfOrder,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self {
            expected_next: 1,
            ..Default::default()
        }
    }

    pub fn record(&mut self, received: u32) -> SeqOutcome {
        if received == self.expected_next {
            self.last_received = received;
            self.expected_next = received.wrapping_add(1);
            SeqOutcome::InOrder
        } else if received <= self.last_received {
            self.duplicate += 1;
            SeqOutcome::Duplicate
        } else if received > self.expected_next {
            let missed = received - self.expected_next;
            self.lost += missed;
            self.last_received = received;
            self.expected_next = received.wrapping_add(1);
            SeqOutcome::Lost(missed)
        } else {
            self.out_of_order += 1;
            SeqOutcome::OutOfOrder
        }
    }

    /// Re-baseline at acquisition start.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

// ---------------------------------------------------------------------------
// Packet emission
// ---------------------------------------------------------------------------

/// Shareable GVSP emitter. The control thread clones one to serve
/// PACKETRESEND without reaching into the streaming loop.
#[derive(Clone)]
pub struct GvspSender {
    socket: Arc<UdpSocket>,
    shared: Arc<StreamShared>,
    ring: Arc<FrameRing>,
    stats: Arc<Stats>,
}

impl GvspSender {
    pub fn new(
        socket: Arc<UdpSocket>,
        shared: Arc<StreamShared>,
        ring: Arc<FrameRing>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            socket,
            shared,
            ring,
            stats,
        }
    }

    /// Emit one complete block: leader, paced data chunks, trailer.
    /// Returns the number of packets sent.
    pub fn send_block(
        &self,
        dest: SocketAddrV4,
        block_id: u32,
        timestamp_us: u64,
        width: u32,
        height: u32,
        pixel_format: u32,
        payload: &[u8],
    ) -> io::Result<u32> {
        let packet_size = self.shared.packet_size() as usize;
        let delay = Duration::from_micros(u64::from(self.shared.packet_delay_us()));
        let mut packet_id: u16 = 0;
        let mut scratch = Vec::with_capacity(gvsp::HEADER_SIZE + packet_size);

        // Leader.
        scratch.clear();
        GvspHeader {
            packet_kind: PACKET_KIND_LEADER,
            flags: 0,
            packet_id,
            data: [block_id, 0],
        }
        .encode(&mut scratch);
        Leader {
            flags: 0,
            payload_type: PAYLOAD_TYPE_IMAGE,
            timestamp: timestamp_us,
            pixel_format,
            size_x: width,
            size_y: height,
            offset_x: 0,
            offset_y: 0,
            padding_x: 0,
            padding_y: 0,
        }
        .encode(&mut scratch);
        self.socket.send_to(&scratch, dest)?;
        stats::bump(&self.stats.packets_sent);

        // Data packets, one chunk of at most `packet_size` bytes each,
        // paced by the configured inter-packet delay.
        let mut offset = 0usize;
        while offset < payload.len() {
            let end = (offset + packet_size).min(payload.len());
            packet_id = packet_id.wrapping_add(1);
            scratch.clear();
            GvspHeader {
                packet_kind: PACKET_KIND_DATA,
                flags: 0,
                packet_id,
                data: [block_id, offset as u32],
            }
            .encode(&mut scratch);
            scratch.extend_from_slice(&payload[offset..end]);
            self.socket.send_to(&scratch, dest)?;
            stats::bump(&self.stats.packets_sent);
            offset = end;
            std::thread::sleep(delay);
        }

        // Trailer.
        packet_id = packet_id.wrapping_add(1);
        scratch.clear();
        GvspHeader {
            packet_kind: PACKET_KIND_TRAILER,
            flags: 0,
            packet_id,
            data: [block_id, 0],
        }
        .encode(&mut scratch);
        Trailer {
            reserved: 0,
            payload_type: PAYLOAD_TYPE_IMAGE,
            size_y: height,
        }
        .encode(&mut scratch);
        self.socket.send_to(&scratch, dest)?;
        stats::bump(&self.stats.packets_sent);

        let chunks = payload.len().div_ceil(packet_size).max(1) as u32;
        Ok(chunks + 2)
    }

    /// Re-emit a retained block with its original id and timestamp.
    pub fn resend(&self, block_id: u32) -> Result<(), RingError> {
        let entry = self.ring.lookup(block_id)?;
        let Some(dest) = self.shared.streaming_dest() else {
            // Raced with an unbind; the block is gone for this client.
            return Err(RingError::NotFound { block_id });
        };
        match self.send_block(
            dest,
            entry.block_id,
            entry.captured_at,
            entry.width,
            entry.height,
            entry.pixel_format,
            &entry.bytes,
        ) {
            Ok(packets) => {
                debug!("resent block {block_id} ({packets} packets)");
                stats::bump(&self.stats.resend_requests);
                if let Ok(mut state) = self.shared.lock_state() {
                    state.last_activity = Instant::now();
                }
                Ok(())
            }
            Err(e) => {
                warn!("resend of block {block_id} failed: {e}");
                stats::bump(&self.stats.send_failures);
                self.shared.set_status_bits(STREAM_STATUS_ERROR);
                // Transport errors are never surfaced to clients.
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Service loop
// ---------------------------------------------------------------------------

pub struct StreamingService {
    sender: GvspSender,
    camera: Arc<Mutex<Box<dyn Camera>>>,
    shared: Arc<StreamShared>,
    ring: Arc<FrameRing>,
    stats: Arc<Stats>,
    timings: StreamTimings,
    tracker: SequenceTracker,
    last_heartbeat: Instant,
    running: Arc<AtomicBool>,
}

impl StreamingService {
    /// Bind the stream socket and assemble the service.
    pub fn bind(
        port: u16,
        shared: Arc<StreamShared>,
        ring: Arc<FrameRing>,
        stats: Arc<Stats>,
        camera: Arc<Mutex<Box<dyn Camera>>>,
        timings: StreamTimings,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_send_buffer_size(SEND_BUFFER_BYTES)?;
        socket.set_recv_buffer_size(RECV_BUFFER_BYTES)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
        let socket: UdpSocket = socket.into();
        stats.set_status(STATUS_GVSP_SOCKET_UP);
        info!("gvsp socket bound on port {}", socket.local_addr()?.port());

        let sender = GvspSender {
            socket: Arc::new(socket),
            shared: Arc::clone(&shared),
            ring: Arc::clone(&ring),
            stats: Arc::clone(&stats),
        };
        Ok(Self {
            sender,
            camera,
            shared,
            ring,
            stats,
            timings,
            tracker: SequenceTracker::new(),
            last_heartbeat: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Clone of the emitter for the control service's resend path.
    pub fn sender(&self) -> GvspSender {
        self.sender.clone()
    }

    /// Flag that stops [`run`](Self::run) after the current iteration.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn run(&mut self) {
        info!("streaming service up");
        while self.running.load(Ordering::Relaxed) {
            self.poll();
        }
        info!("streaming service down");
    }

    /// One loop iteration: heartbeat, then either a frame transmission or
    /// an idle sleep.
    pub fn poll(&mut self) {
        self.heartbeat_if_due();

        if self.shared.in_recovery() {
            std::thread::sleep(IDLE_SLEEP);
            return;
        }

        let Some(dest) = self.shared.streaming_dest() else {
            std::thread::sleep(IDLE_SLEEP);
            return;
        };

        let frame_started = Instant::now();
        let frame = match self.camera.lock() {
            Ok(mut cam) => cam.capture_frame(),
            Err(poisoned) => poisoned.into_inner().capture_frame(),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("capture failed: {e}");
                self.shared.set_status_bits(STREAM_STATUS_ERROR);
                std::thread::sleep(IDLE_SLEEP);
                return;
            }
        };
        stats::bump(&self.stats.frames_captured);

        let Some(block_id) = self.shared.take_block_id() else {
            return;
        };
        match self.tracker.record(block_id) {
            SeqOutcome::InOrder => {}
            outcome => debug!("block {block_id} sequence anomaly: {outcome:?}"),
        }

        let timestamp = now_micros();
        if let Err(e) = self.ring.store(&frame, block_id, timestamp) {
            // Not fatal: the frame just won't be resendable.
            warn!("frame ring store failed: {e}");
        }

        match self.sender.send_block(
            dest,
            block_id,
            timestamp,
            frame.width,
            frame.height,
            frame.pixel_format,
            &frame.bytes,
        ) {
            Ok(_) => {
                stats::bump(&self.stats.frames_sent);
                self.shared.clear_status_bits(STREAM_STATUS_ERROR);
            }
            Err(e) => {
                // Abandon this frame; the next capture drives the next try.
                warn!("block {block_id} send failed: {e}");
                stats::bump(&self.stats.send_failures);
                self.shared.set_status_bits(STREAM_STATUS_ERROR);
            }
        }

        let period = Duration::from_secs(1) / self.shared.frame_rate_fps().max(1);
        std::thread::sleep(period.saturating_sub(frame_started.elapsed()));
    }

    /// Liveness supervision, at most once per heartbeat interval.
    fn heartbeat_if_due(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_heartbeat) < self.timings.heartbeat_interval {
            return;
        }
        self.last_heartbeat = now;

        let Ok(mut state) = self.shared.lock_state() else {
            // Escape hatch: the state lock is wedged, clean what the
            // atomics reach and report.
            warn!("heartbeat could not take stream state lock; forcing status cleanup");
            self.shared.clear_status_bits(STREAM_STATUS_ACTIVE);
            self.stats.clear_status(STATUS_STREAMING_ACTIVE);
            return;
        };

        // Recovery exit.
        if let Some(until) = state.recovery_until
            && now >= until
        {
            info!("leaving recovery mode");
            state.recovery_until = None;
            state.connection_failures = 0;
            self.shared.clear_status_bits(STREAM_STATUS_RECOVERY);
            self.stats.clear_status(STATUS_CLIENT_TIMEOUT);
        }

        // Client silence.
        if state.client.is_some()
            && state.recovery_until.is_none()
            && now.duration_since(state.last_activity) > self.timings.client_timeout
        {
            state.connection_failures += 1;
            warn!(
                "client silent for {:?} (failure {}/{})",
                now.duration_since(state.last_activity),
                state.connection_failures,
                self.timings.max_connection_failures
            );
            state.last_activity = now;
            if state.connection_failures >= self.timings.max_connection_failures {
                info!(
                    "entering recovery mode for {:?}",
                    self.timings.recovery_timeout
                );
                state.acquisition = false;
                state.client = None;
                state.recovery_until = Some(now + self.timings.recovery_timeout);
                drop(state);
                self.tracker.reset();
                let _ = self.ring.clear();
                self.shared.clear_status_bits(
                    STREAM_STATUS_ACTIVE | STREAM_STATUS_CLIENT_BOUND | STREAM_STATUS_ERROR,
                );
                self.shared.set_status_bits(STREAM_STATUS_RECOVERY);
                self.stats
                    .clear_status(STATUS_STREAMING_ACTIVE | STATUS_CLIENT_CONNECTED);
                self.stats.set_status(STATUS_CLIENT_TIMEOUT);
                return;
            }
        }

        // Consistency: streaming requires a binding; failures require a
        // binding or an active recovery window.
        if state.acquisition && state.client.is_none() && state.recovery_until.is_none() {
            warn!("inconsistent stream state (armed without client); cleaning up");
            state.acquisition = false;
            state.connection_failures = 0;
            self.shared
                .clear_status_bits(STREAM_STATUS_ACTIVE | STREAM_STATUS_CLIENT_BOUND);
            self.stats
                .clear_status(STATUS_STREAMING_ACTIVE | STATUS_CLIENT_CONNECTED);
        } else if state.connection_failures > 0
            && state.client.is_none()
            && state.recovery_until.is_none()
        {
            state.connection_failures = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
