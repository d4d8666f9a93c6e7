//! The register map: byte-addressable logical memory binding the control
//! service to bootstrap memory, the XML blob, and the feature registers.
//!
//! Dispatch order is fixed: bootstrap region, XML region, feature table,
//! then `InvalidAddress`. Feature registers are a table of cells, each a
//! reader plus an optional validating writer closing over its collaborator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::bootstrap::{BOOTSTRAP_SIZE, BootstrapMemory};
use crate::camera::{
    ADJUST_MAX, ADJUST_MIN, Camera, EXPOSURE_US_MAX, EXPOSURE_US_MIN, GAIN_DB_MAX, GAIN_DB_MIN,
    JPEG_QUALITY_MAX, TriggerMode, WhiteBalanceMode,
};
use crate::discovery::DiscoveryControl;
use crate::error::RegisterError;
use crate::protocol::gvsp;
use crate::ring::FrameRing;
use crate::settings::{ParamSnapshot, SettingsStore};
use crate::stats::{self, Stats};
use crate::streaming::StreamShared;

/// Base address of the mapped feature-description XML blob.
pub const XML_BASE_ADDRESS: u32 = 0x10000;

/// Feature register window.
pub const FEATURE_BASE: u32 = 0x1000;
pub const FEATURE_END: u32 = 0x1100;

/// Largest READ_MEMORY outside the XML window.
pub const MAX_READ_BYTES: usize = 512;
/// Largest READ_MEMORY inside the XML window.
pub const MAX_XML_READ_BYTES: usize = 8 * 1024;

/// Feature register addresses.
pub mod regs {
    pub const ACQUISITION_START: u32 = 0x1000;
    pub const ACQUISITION_STOP: u32 = 0x1004;
    pub const ACQUISITION_MODE: u32 = 0x1008;
    pub const PIXEL_FORMAT: u32 = 0x100C;
    pub const JPEG_QUALITY: u32 = 0x1010;
    pub const PACKET_DELAY_US: u32 = 0x1014;
    pub const FRAME_RATE_FPS: u32 = 0x1018;
    pub const PACKET_SIZE: u32 = 0x101C;
    pub const PAYLOAD_SIZE: u32 = 0x1020;
    pub const STREAM_STATUS: u32 = 0x1024;
    pub const SCP_HOST_PORT: u32 = 0x1028;
    pub const EXPOSURE_US: u32 = 0x1030;
    pub const GAIN_DB: u32 = 0x1034;
    pub const BRIGHTNESS: u32 = 0x1038;
    pub const CONTRAST: u32 = 0x103C;
    pub const SATURATION: u32 = 0x1040;
    pub const WHITE_BALANCE: u32 = 0x1044;
    pub const TRIGGER_MODE: u32 = 0x1048;
    pub const SENSOR_WIDTH: u32 = 0x104C;
    pub const SENSOR_HEIGHT: u32 = 0x1050;
    pub const STAT_GVCP_COMMANDS: u32 = 0x1060;
    pub const STAT_GVCP_ERRORS: u32 = 0x1064;
    pub const STAT_FRAMES_CAPTURED: u32 = 0x1068;
    pub const STAT_FRAMES_SENT: u32 = 0x106C;
    pub const STAT_PACKETS_SENT: u32 = 0x1070;
    pub const STAT_RESENDS: u32 = 0x1074;
    pub const STAT_CONNECTION_STATUS: u32 = 0x1078;
    pub const STAT_DISCOVERY_SENT: u32 = 0x107C;
    pub const DISCOVERY_ENABLE: u32 = 0x1080;
    pub const DISCOVERY_INTERVAL_MS: u32 = 0x1084;
}

type Result<T> = std::result::Result<T, RegisterError>;

type ReadFn = Box<dyn Fn() -> u32 + Send + Sync>;
type WriteFn = Box<dyn Fn(u32) -> Result<()> + Send + Sync>;

/// One feature register: a reader and, when writable, a validating writer.
struct RegCell {
    name: &'static str,
    read: ReadFn,
    write: Option<WriteFn>,
}

/// Collaborators the feature cells close over.
pub struct RegisterBackends {
    pub camera: Arc<Mutex<Box<dyn Camera>>>,
    pub stream: Arc<StreamShared>,
    pub ring: Arc<FrameRing>,
    pub discovery: Arc<DiscoveryControl>,
    pub settings: Arc<dyn SettingsStore>,
    pub stats: Arc<Stats>,
}

pub struct RegisterMap {
    bootstrap: Arc<Mutex<BootstrapMemory>>,
    xml: Arc<[u8]>,
    cells: BTreeMap<u32, RegCell>,
}

impl RegisterMap {
    pub fn new(
        bootstrap: Arc<Mutex<BootstrapMemory>>,
        xml: Arc<[u8]>,
        backends: RegisterBackends,
    ) -> Self {
        Self {
            bootstrap,
            xml,
            cells: build_cells(backends),
        }
    }

    pub fn xml_len(&self) -> usize {
        self.xml.len()
    }

    // -- public operations --------------------------------------------------

    pub fn read_word(&self, address: u32) -> Result<u32> {
        if (address as usize) < BOOTSTRAP_SIZE {
            return self
                .with_bootstrap(|mem| mem.read_u32(address as usize))
                .ok_or(RegisterError::InvalidAddress { address });
        }
        if self.in_xml(address) {
            let mut word = [0u8; 4];
            self.copy_xml(address, &mut word);
            return Ok(u32::from_be_bytes(word));
        }
        let cell = self.feature_cell(address)?;
        Ok((cell.read)())
    }

    pub fn write_word(&self, address: u32, value: u32) -> Result<()> {
        if (address as usize) < BOOTSTRAP_SIZE {
            return self.write_bootstrap(address, &value.to_be_bytes());
        }
        if self.in_xml(address) {
            return Err(RegisterError::WriteProtected { address });
        }
        let cell = self.feature_cell(address)?;
        match &cell.write {
            Some(write) => {
                let result = write(value);
                if let Err(e) = &result {
                    debug!("{} write rejected: {e}", cell.name);
                }
                result
            }
            None => Err(RegisterError::WriteProtected { address }),
        }
    }

    pub fn read_bytes(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        if (address as usize) < BOOTSTRAP_SIZE {
            if len > MAX_READ_BYTES {
                return Err(RegisterError::AccessDenied { address, len });
            }
            return self
                .with_bootstrap(|mem| mem.read(address as usize, len).map(<[u8]>::to_vec))
                .ok_or(RegisterError::InvalidAddress { address });
        }
        if self.in_xml(address) {
            if len > MAX_XML_READ_BYTES {
                return Err(RegisterError::AccessDenied { address, len });
            }
            // Clamp to the blob and zero-pad the tail.
            let mut out = vec![0u8; len];
            self.copy_xml(address, &mut out);
            return Ok(out);
        }
        if self.in_feature_range(address) {
            if len > MAX_READ_BYTES {
                return Err(RegisterError::AccessDenied { address, len });
            }
            if address % 4 != 0 || len % 4 != 0 {
                return Err(RegisterError::BadAlignment { address });
            }
            let mut out = Vec::with_capacity(len);
            for word_addr in (address..address + len as u32).step_by(4) {
                out.extend_from_slice(&self.read_word(word_addr)?.to_be_bytes());
            }
            return Ok(out);
        }
        Err(RegisterError::InvalidAddress { address })
    }

    pub fn write_bytes(&self, address: u32, data: &[u8]) -> Result<()> {
        if (address as usize) < BOOTSTRAP_SIZE {
            return self.write_bootstrap(address, data);
        }
        if self.in_xml(address) {
            return Err(RegisterError::WriteProtected { address });
        }
        if self.in_feature_range(address) {
            if address % 4 != 0 || data.len() % 4 != 0 {
                return Err(RegisterError::BadAlignment { address });
            }
            for (i, word) in data.chunks_exact(4).enumerate() {
                let value = u32::from_be_bytes(word.try_into().unwrap());
                self.write_word(address + (i as u32) * 4, value)?;
            }
            return Ok(());
        }
        Err(RegisterError::InvalidAddress { address })
    }

    // -- internals ----------------------------------------------------------

    fn in_xml(&self, address: u32) -> bool {
        address >= XML_BASE_ADDRESS && ((address - XML_BASE_ADDRESS) as usize) < self.xml.len()
    }

    fn in_feature_range(&self, address: u32) -> bool {
        (FEATURE_BASE..FEATURE_END).contains(&address)
    }

    fn feature_cell(&self, address: u32) -> Result<&RegCell> {
        if !self.in_feature_range(address) {
            return Err(RegisterError::InvalidAddress { address });
        }
        if address % 4 != 0 {
            return Err(RegisterError::BadAlignment { address });
        }
        self.cells
            .get(&address)
            .ok_or(RegisterError::InvalidAddress { address })
    }

    /// Fill `out` from the XML blob starting at `address`, zero-padding
    /// past the end of the blob.
    fn copy_xml(&self, address: u32, out: &mut [u8]) {
        let offset = (address - XML_BASE_ADDRESS) as usize;
        let available = self.xml.len().saturating_sub(offset).min(out.len());
        out[..available].copy_from_slice(&self.xml[offset..offset + available]);
        out[available..].fill(0);
    }

    fn with_bootstrap<T>(&self, f: impl FnOnce(&BootstrapMemory) -> T) -> T {
        match self.bootstrap.lock() {
            Ok(mem) => f(&mem),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write_bootstrap(&self, address: u32, data: &[u8]) -> Result<()> {
        let offset = address as usize;
        if offset + data.len() > BOOTSTRAP_SIZE {
            return Err(RegisterError::InvalidAddress { address });
        }
        if !BootstrapMemory::client_writable(offset, data.len()) {
            return Err(RegisterError::WriteProtected { address });
        }
        let ok = match self.bootstrap.lock() {
            Ok(mut mem) => mem.write(offset, data),
            Err(poisoned) => poisoned.into_inner().write(offset, data),
        };
        if ok {
            Ok(())
        } else {
            Err(RegisterError::InvalidAddress { address })
        }
    }
}

// ---------------------------------------------------------------------------
// Cell table
// ---------------------------------------------------------------------------

fn lock_camera(camera: &Mutex<Box<dyn Camera>>) -> std::sync::MutexGuard<'_, Box<dyn Camera>> {
    match camera.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Current sensor parameters as a persistable snapshot.
fn snapshot_of(camera: &dyn Camera) -> ParamSnapshot {
    ParamSnapshot {
        exposure_us: camera.exposure_us(),
        gain_db: camera.gain_db() as i32,
        brightness: camera.brightness(),
        contrast: camera.contrast(),
        saturation: camera.saturation(),
        wb_mode: camera.white_balance().as_raw() as i32,
        trigger_mode: camera.trigger_mode().as_raw() as i32,
        jpeg_quality: camera.jpeg_quality() as i32,
        pixel_format: camera.pixel_format() as i32,
    }
}

fn build_cells(backends: RegisterBackends) -> BTreeMap<u32, RegCell> {
    let RegisterBackends {
        camera,
        stream,
        ring,
        discovery,
        settings,
        stats,
    } = backends;
    let mut cells = BTreeMap::new();
    let mut add = |addr: u32, cell: RegCell| {
        cells.insert(addr, cell);
    };

    // -- acquisition --------------------------------------------------------

    {
        let stream = Arc::clone(&stream);
        let s2 = Arc::clone(&stream);
        add(
            regs::ACQUISITION_START,
            RegCell {
                name: "AcquisitionStart",
                read: Box::new(move || u32::from(stream.streaming_active())),
                write: Some(Box::new(move |value| {
                    if value != 0 {
                        s2.request_start();
                    }
                    Ok(())
                })),
            },
        );
    }
    {
        let stream = Arc::clone(&stream);
        let s2 = Arc::clone(&stream);
        let ring = Arc::clone(&ring);
        add(
            regs::ACQUISITION_STOP,
            RegCell {
                name: "AcquisitionStop",
                read: Box::new(move || u32::from(!stream.streaming_active())),
                write: Some(Box::new(move |value| {
                    if value != 0 {
                        s2.request_stop();
                        if let Err(e) = ring.clear() {
                            warn!("frame ring clear on stop failed: {e}");
                        }
                    }
                    Ok(())
                })),
            },
        );
    }
    {
        let mode = Arc::new(AtomicU32::new(2)); // continuous
        let m2 = Arc::clone(&mode);
        add(
            regs::ACQUISITION_MODE,
            RegCell {
                name: "AcquisitionMode",
                read: Box::new(move || mode.load(Ordering::Relaxed)),
                write: Some(Box::new(move |value| {
                    if value > 2 {
                        return Err(RegisterError::BadValue {
                            address: regs::ACQUISITION_MODE,
                            value,
                        });
                    }
                    m2.store(value, Ordering::Relaxed);
                    Ok(())
                })),
            },
        );
    }

    // -- pixel format & JPEG quality ---------------------------------------

    {
        let camera_r = Arc::clone(&camera);
        let camera_w = Arc::clone(&camera);
        add(
            regs::PIXEL_FORMAT,
            RegCell {
                name: "PixelFormat",
                read: Box::new(move || lock_camera(&camera_r).pixel_format()),
                write: Some(Box::new(move |value| {
                    if !gvsp::SUPPORTED_PIXEL_FORMATS.contains(&value) {
                        return Err(RegisterError::BadValue {
                            address: regs::PIXEL_FORMAT,
                            value,
                        });
                    }
                    lock_camera(&camera_w)
                        .set_pixel_format(value)
                        .map_err(|_| RegisterError::Busy)
                })),
            },
        );
    }
    {
        let camera_r = Arc::clone(&camera);
        let camera_w = Arc::clone(&camera);
        add(
            regs::JPEG_QUALITY,
            RegCell {
                name: "JpegQuality",
                read: Box::new(move || lock_camera(&camera_r).jpeg_quality()),
                write: Some(Box::new(move |value| {
                    if value > JPEG_QUALITY_MAX {
                        return Err(RegisterError::BadValue {
                            address: regs::JPEG_QUALITY,
                            value,
                        });
                    }
                    lock_camera(&camera_w)
                        .set_jpeg_quality(value)
                        .map_err(|_| RegisterError::Busy)
                })),
            },
        );
    }

    // -- stream pacing ------------------------------------------------------

    macro_rules! pacing_cell {
        ($addr:expr, $name:literal, $get:ident, $set:ident) => {{
            let stream_r = Arc::clone(&stream);
            let stream_w = Arc::clone(&stream);
            add(
                $addr,
                RegCell {
                    name: $name,
                    read: Box::new(move || stream_r.$get()),
                    write: Some(Box::new(move |value| {
                        if stream_w.$set(value) {
                            Ok(())
                        } else {
                            Err(RegisterError::BadValue {
                                address: $addr,
                                value,
                            })
                        }
                    })),
                },
            );
        }};
    }
    pacing_cell!(
        regs::PACKET_DELAY_US,
        "PacketDelayUs",
        packet_delay_us,
        set_packet_delay_us
    );
    pacing_cell!(
        regs::FRAME_RATE_FPS,
        "FrameRateFps",
        frame_rate_fps,
        set_frame_rate_fps
    );
    pacing_cell!(regs::PACKET_SIZE, "PacketSize", packet_size, set_packet_size);
    pacing_cell!(
        regs::SCP_HOST_PORT,
        "ScpHostPort",
        scp_host_port,
        set_scp_host_port
    );
    {
        let camera = Arc::clone(&camera);
        add(
            regs::PAYLOAD_SIZE,
            RegCell {
                name: "PayloadSize",
                read: Box::new(move || {
                    let cam = lock_camera(&camera);
                    let pixels = cam.width() * cam.height();
                    match gvsp::bits_per_pixel(cam.pixel_format()) {
                        Some(bpp) => pixels * bpp / 8,
                        None => pixels / 8,
                    }
                }),
                write: None,
            },
        );
    }
    {
        let stream = Arc::clone(&stream);
        add(
            regs::STREAM_STATUS,
            RegCell {
                name: "StreamStatus",
                read: Box::new(move || stream.stream_status()),
                write: None,
            },
        );
    }

    // -- sensor parameters --------------------------------------------------

    {
        let camera_r = Arc::clone(&camera);
        let camera_w = Arc::clone(&camera);
        let settings = Arc::clone(&settings);
        add(
            regs::EXPOSURE_US,
            RegCell {
                name: "ExposureTimeUs",
                read: Box::new(move || lock_camera(&camera_r).exposure_us()),
                write: Some(Box::new(move |value| {
                    if !(EXPOSURE_US_MIN..=EXPOSURE_US_MAX).contains(&value) {
                        return Err(RegisterError::BadValue {
                            address: regs::EXPOSURE_US,
                            value,
                        });
                    }
                    let mut cam = lock_camera(&camera_w);
                    cam.set_exposure_us(value).map_err(|_| RegisterError::Busy)?;
                    if let Err(e) = settings.save(&snapshot_of(&**cam)) {
                        warn!("settings auto-save after exposure write failed: {e}");
                    }
                    Ok(())
                })),
            },
        );
    }
    {
        let camera_r = Arc::clone(&camera);
        let camera_w = Arc::clone(&camera);
        let settings = Arc::clone(&settings);
        add(
            regs::GAIN_DB,
            RegCell {
                name: "GainDb",
                read: Box::new(move || lock_camera(&camera_r).gain_db()),
                write: Some(Box::new(move |value| {
                    if !(GAIN_DB_MIN..=GAIN_DB_MAX).contains(&value) {
                        return Err(RegisterError::BadValue {
                            address: regs::GAIN_DB,
                            value,
                        });
                    }
                    let mut cam = lock_camera(&camera_w);
                    cam.set_gain_db(value).map_err(|_| RegisterError::Busy)?;
                    if let Err(e) = settings.save(&snapshot_of(&**cam)) {
                        warn!("settings auto-save after gain write failed: {e}");
                    }
                    Ok(())
                })),
            },
        );
    }

    macro_rules! adjust_cell {
        ($addr:expr, $name:literal, $get:ident, $set:ident) => {{
            let camera_r = Arc::clone(&camera);
            let camera_w = Arc::clone(&camera);
            add(
                $addr,
                RegCell {
                    name: $name,
                    read: Box::new(move || lock_camera(&camera_r).$get() as u32),
                    write: Some(Box::new(move |value| {
                        let signed = value as i32;
                        if !(ADJUST_MIN..=ADJUST_MAX).contains(&signed) {
                            return Err(RegisterError::BadValue {
                                address: $addr,
                                value,
                            });
                        }
                        lock_camera(&camera_w)
                            .$set(signed)
                            .map_err(|_| RegisterError::Busy)
                    })),
                },
            );
        }};
    }
    adjust_cell!(regs::BRIGHTNESS, "Brightness", brightness, set_brightness);
    adjust_cell!(regs::CONTRAST, "Contrast", contrast, set_contrast);
    adjust_cell!(regs::SATURATION, "Saturation", saturation, set_saturation);

    {
        let camera_r = Arc::clone(&camera);
        let camera_w = Arc::clone(&camera);
        add(
            regs::WHITE_BALANCE,
            RegCell {
                name: "WhiteBalanceMode",
                read: Box::new(move || lock_camera(&camera_r).white_balance().as_raw()),
                write: Some(Box::new(move |value| {
                    let mode = WhiteBalanceMode::from_raw(value).ok_or(
                        RegisterError::BadValue {
                            address: regs::WHITE_BALANCE,
                            value,
                        },
                    )?;
                    lock_camera(&camera_w)
                        .set_white_balance(mode)
                        .map_err(|_| RegisterError::Busy)
                })),
            },
        );
    }
    {
        let camera_r = Arc::clone(&camera);
        let camera_w = Arc::clone(&camera);
        add(
            regs::TRIGGER_MODE,
            RegCell {
                name: "TriggerMode",
                read: Box::new(move || lock_camera(&camera_r).trigger_mode().as_raw()),
                write: Some(Box::new(move |value| {
                    let mode = TriggerMode::from_raw(value).ok_or(RegisterError::BadValue {
                        address: regs::TRIGGER_MODE,
                        value,
                    })?;
                    lock_camera(&camera_w)
                        .set_trigger_mode(mode)
                        .map_err(|_| RegisterError::Busy)
                })),
            },
        );
    }
    {
        let camera = Arc::clone(&camera);
        add(
            regs::SENSOR_WIDTH,
            RegCell {
                name: "SensorWidth",
                read: Box::new(move || lock_camera(&camera).width()),
                write: None,
            },
        );
    }
    {
        let camera = Arc::clone(&camera);
        add(
            regs::SENSOR_HEIGHT,
            RegCell {
                name: "SensorHeight",
                read: Box::new(move || lock_camera(&camera).height()),
                write: None,
            },
        );
    }

    // -- statistics (counters only; writes are accepted and ignored) --------

    macro_rules! counter_cell {
        ($addr:expr, $name:literal, $field:ident) => {{
            let stats = Arc::clone(&stats);
            add(
                $addr,
                RegCell {
                    name: $name,
                    read: Box::new(move || stats::count(&stats.$field)),
                    write: Some(Box::new(|_| Ok(()))),
                },
            );
        }};
    }
    counter_cell!(regs::STAT_GVCP_COMMANDS, "StatGvcpCommands", gvcp_commands);
    counter_cell!(regs::STAT_GVCP_ERRORS, "StatGvcpErrors", gvcp_errors);
    counter_cell!(
        regs::STAT_FRAMES_CAPTURED,
        "StatFramesCaptured",
        frames_captured
    );
    counter_cell!(regs::STAT_FRAMES_SENT, "StatFramesSent", frames_sent);
    counter_cell!(regs::STAT_PACKETS_SENT, "StatPacketsSent", packets_sent);
    counter_cell!(regs::STAT_RESENDS, "StatResendRequests", resend_requests);
    counter_cell!(
        regs::STAT_DISCOVERY_SENT,
        "StatDiscoveryBroadcasts",
        discovery_broadcasts
    );
    {
        let stats = Arc::clone(&stats);
        add(
            regs::STAT_CONNECTION_STATUS,
            RegCell {
                name: "StatConnectionStatus",
                read: Box::new(move || stats.status()),
                write: Some(Box::new(|_| Ok(()))),
            },
        );
    }

    // -- discovery broadcast control ----------------------------------------

    {
        let discovery_r = Arc::clone(&discovery);
        let discovery_w = Arc::clone(&discovery);
        add(
            regs::DISCOVERY_ENABLE,
            RegCell {
                name: "DiscoveryEnable",
                read: Box::new(move || u32::from(discovery_r.enabled())),
                write: Some(Box::new(move |value| {
                    if value > 1 {
                        return Err(RegisterError::BadValue {
                            address: regs::DISCOVERY_ENABLE,
                            value,
                        });
                    }
                    discovery_w.set_enabled(value == 1);
                    Ok(())
                })),
            },
        );
    }
    {
        let discovery_r = Arc::clone(&discovery);
        let discovery_w = Arc::clone(&discovery);
        add(
            regs::DISCOVERY_INTERVAL_MS,
            RegCell {
                name: "DiscoveryIntervalMs",
                read: Box::new(move || discovery_r.interval_ms()),
                write: Some(Box::new(move |value| {
                    if discovery_w.set_interval_ms(value) {
                        Ok(())
                    } else {
                        Err(RegisterError::BadValue {
                            address: regs::DISCOVERY_INTERVAL_MS,
                            value,
                        })
                    }
                })),
            },
        );
    }

    cells
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
