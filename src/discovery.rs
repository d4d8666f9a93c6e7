//! Unsolicited discovery broadcasts and device-UUID derivation.
//!
//! Two on-wire forms exist and both are kept: solicited replies use the
//! structured [`crate::protocol::gvcp`] ACK with the request id echoed;
//! unsolicited broadcasts use a raw eight-byte framed form with the 'B','E'
//! magic in front. Some deployed clients key on the magic, so the split is
//! preserved as-is.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::bootstrap::LinkInfo;
use crate::codec;
use crate::protocol::gvcp;
use crate::stats::{self, Stats};

/// Broadcast interval bounds (register-writable).
pub const INTERVAL_MS_MIN: u32 = 1000;
pub const INTERVAL_MS_MAX: u32 = 30_000;
pub const INTERVAL_MS_DEFAULT: u32 = 5000;

/// Per-destination send retries within one cycle.
pub const SEND_RETRIES: u32 = 3;
const RETRY_SPACING: Duration = Duration::from_millis(50);

/// Raw broadcast magic, offsets 0..2 of the raw form.
pub const MAGIC: [u8; 2] = [0x42, 0x45];

/// Register-visible broadcast knobs, shared between the register map and
/// the broadcaster.
#[derive(Debug)]
pub struct DiscoveryControl {
    enabled: AtomicBool,
    interval_ms: AtomicU32,
}

impl DiscoveryControl {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            interval_ms: AtomicU32::new(INTERVAL_MS_DEFAULT),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    /// Returns false when the interval is outside [1000, 30000].
    pub fn set_interval_ms(&self, ms: u32) -> bool {
        if !(INTERVAL_MS_MIN..=INTERVAL_MS_MAX).contains(&ms) {
            return false;
        }
        self.interval_ms.store(ms, Ordering::Relaxed);
        true
    }
}

impl Default for DiscoveryControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits the raw broadcast form on a timer driven by the control service's
/// receive-timeout tick.
#[derive(Debug)]
pub struct DiscoveryBroadcaster {
    destinations: [Ipv4Addr; 4],
    last_cycle: Option<Instant>,
    sequence: u16,
    retries: u32,
}

impl DiscoveryBroadcaster {
    pub fn new(link: &LinkInfo) -> Self {
        Self {
            destinations: destinations(link),
            last_cycle: None,
            sequence: 0,
            retries: SEND_RETRIES,
        }
    }

    /// True when the configured interval has elapsed since the last cycle.
    pub fn is_due(&self, control: &DiscoveryControl, now: Instant) -> bool {
        if !control.enabled() {
            return false;
        }
        match self.last_cycle {
            None => true,
            Some(prev) => now.duration_since(prev) >= Duration::from_millis(u64::from(control.interval_ms())),
        }
    }

    /// Run one broadcast cycle if due. `payload` is the 248-byte bootstrap
    /// slice. The cycle succeeds if any destination succeeded.
    pub fn tick(
        &mut self,
        control: &DiscoveryControl,
        socket: &UdpSocket,
        payload: &[u8],
        stats: &Stats,
    ) {
        let now = Instant::now();
        if !self.is_due(control, now) {
            return;
        }
        self.last_cycle = Some(now);

        let mut any_ok = false;
        for dest in self.destinations {
            let packet = build_broadcast(self.sequence, payload);
            self.sequence = self.sequence.wrapping_add(1);
            let addr = SocketAddrV4::new(dest, gvcp::GVCP_PORT);

            let mut sent = false;
            for attempt in 0..=self.retries {
                match socket.send_to(&packet, addr) {
                    Ok(_) => {
                        sent = true;
                        break;
                    }
                    Err(e) if attempt < self.retries => {
                        debug!("discovery send to {addr} failed (attempt {attempt}): {e}");
                        std::thread::sleep(RETRY_SPACING);
                    }
                    Err(e) => warn!("discovery send to {addr} gave up: {e}"),
                }
            }
            any_ok |= sent;
        }

        if any_ok {
            stats::bump(&stats.discovery_broadcasts);
        }
    }
}

/// The four broadcast destinations, in emission order: all-hosts multicast,
/// limited broadcast, the directed subnet broadcast, and the /24 broadcast
/// containing the address.
pub fn destinations(link: &LinkInfo) -> [Ipv4Addr; 4] {
    let ip = link.ip.to_bits();
    let mask = link.netmask.to_bits();
    let subnet = Ipv4Addr::from_bits(ip | !mask);
    let octets = link.ip.octets();
    let slash24 = Ipv4Addr::new(octets[0], octets[1], octets[2], 255);
    [
        Ipv4Addr::new(224, 0, 0, 1),
        Ipv4Addr::BROADCAST,
        subnet,
        slash24,
    ]
}

/// Raw broadcast form: magic, ACK kind, discovery-ack code byte, payload
/// word count, per-packet sequence id, then the bootstrap slice.
pub fn build_broadcast(sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.push(gvcp::PACKET_KIND_ACK);
    buf.push(gvcp::ACK_DISCOVERY as u8);
    codec::write_u16(&mut buf, (payload.len() / 4) as u16);
    codec::write_u16(&mut buf, sequence);
    buf.extend_from_slice(payload);
    buf
}

// ---------------------------------------------------------------------------
// Device UUID
// ---------------------------------------------------------------------------

// Distinct seeds, one per UUID word.
const UUID_SEEDS: [u32; 4] = [0x811C_9DC5, 0x0335_2983, 0x6B43_A9B5, 0x1B87_3593];

/// Derive the 128-bit device identifier from the stable identity inputs.
/// Deterministic: the same device yields the same UUID across reboots.
pub fn derive_uuid(mac: &[u8; 6], model: &str, version: &str, chip_id: &[u8; 8]) -> [u8; 16] {
    let mut identity = Vec::with_capacity(6 + model.len() + version.len() + 8);
    identity.extend_from_slice(mac);
    identity.extend_from_slice(model.as_bytes());
    identity.extend_from_slice(version.as_bytes());
    identity.extend_from_slice(chip_id);

    let mut uuid = [0u8; 16];
    for (i, seed) in UUID_SEEDS.iter().enumerate() {
        let word = fnv1a(*seed, &identity);
        uuid[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    uuid
}

fn fnv1a(seed: u32, data: &[u8]) -> u32 {
    let mut hash = seed;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
