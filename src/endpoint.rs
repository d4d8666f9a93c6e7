//! Endpoint assembly: one holder value owning bootstrap memory, the
//! register map, statistics, and both services. There are no free statics;
//! a host builds an [`Endpoint`] from its collaborators and runs it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::bootstrap::{BootstrapMemory, DeviceIdentity, LinkInfo};
use crate::camera::{Camera, TriggerMode, WhiteBalanceMode};
use crate::control::ControlService;
use crate::discovery::{DiscoveryBroadcaster, DiscoveryControl};
use crate::protocol::{gvcp, gvsp};
use crate::registers::{RegisterBackends, RegisterMap};
use crate::ring::FrameRing;
use crate::settings::{ParamSnapshot, SettingsStore};
use crate::stats::Stats;
use crate::streaming::{StreamShared, StreamTimings, StreamingService};

/// Built-in feature description served from the XML region when the host
/// does not supply its own. The core treats the blob as opaque bytes.
pub const DEFAULT_FEATURE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<RegisterDescription ModelName="gevcam-one" VendorName="gevcam"
    StandardNameSpace="GEV" SchemaMajorVersion="1" SchemaMinorVersion="1">
  <IntReg Name="AcquisitionStart"><Address>0x1000</Address><Length>4</Length><AccessMode>WO</AccessMode></IntReg>
  <IntReg Name="AcquisitionStop"><Address>0x1004</Address><Length>4</Length><AccessMode>WO</AccessMode></IntReg>
  <IntReg Name="PixelFormat"><Address>0x100C</Address><Length>4</Length><AccessMode>RW</AccessMode></IntReg>
  <IntReg Name="ExposureTime"><Address>0x1030</Address><Length>4</Length><AccessMode>RW</AccessMode></IntReg>
  <IntReg Name="Gain"><Address>0x1034</Address><Length>4</Length><AccessMode>RW</AccessMode></IntReg>
  <IntReg Name="Width"><Address>0x104C</Address><Length>4</Length><AccessMode>RO</AccessMode></IntReg>
  <IntReg Name="Height"><Address>0x1050</Address><Length>4</Length><AccessMode>RO</AccessMode></IntReg>
</RegisterDescription>
"#;

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub link: LinkInfo,
    pub identity: DeviceIdentity,
    pub control_port: u16,
    pub stream_port: u16,
    pub xml: Vec<u8>,
    pub timings: StreamTimings,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            link: LinkInfo::default(),
            identity: DeviceIdentity::default(),
            control_port: gvcp::GVCP_PORT,
            stream_port: gvsp::GVSP_PORT,
            xml: DEFAULT_FEATURE_XML.as_bytes().to_vec(),
            timings: StreamTimings::default(),
        }
    }
}

/// Cooperative stop handle for both service loops.
#[derive(Clone)]
pub struct EndpointStop {
    control: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
}

impl EndpointStop {
    pub fn stop(&self) {
        self.control.store(false, Ordering::Relaxed);
        self.streaming.store(false, Ordering::Relaxed);
    }
}

pub struct Endpoint {
    control: ControlService,
    streaming: StreamingService,
}

impl Endpoint {
    /// Wire the endpoint: restore persisted parameters into the camera,
    /// initialize bootstrap memory, build the register map, and bind both
    /// sockets.
    pub fn new(
        config: EndpointConfig,
        mut camera: Box<dyn Camera>,
        settings: Box<dyn SettingsStore>,
    ) -> io::Result<Self> {
        let settings: Arc<dyn SettingsStore> = Arc::from(settings);
        apply_snapshot(camera.as_mut(), &settings.load());
        let camera = Arc::new(Mutex::new(camera));

        let stats = Arc::new(Stats::new());
        let shared = Arc::new(StreamShared::new(Arc::clone(&stats)));
        let ring = Arc::new(FrameRing::new());
        let discovery = Arc::new(DiscoveryControl::new());
        let bootstrap = Arc::new(Mutex::new(BootstrapMemory::init(
            &config.link,
            &config.identity,
            config.xml.len(),
        )));
        let registers = Arc::new(RegisterMap::new(
            Arc::clone(&bootstrap),
            Arc::from(config.xml.as_slice()),
            RegisterBackends {
                camera: Arc::clone(&camera),
                stream: Arc::clone(&shared),
                ring: Arc::clone(&ring),
                discovery: Arc::clone(&discovery),
                settings,
                stats: Arc::clone(&stats),
            },
        ));

        let streaming = StreamingService::bind(
            config.stream_port,
            Arc::clone(&shared),
            ring,
            Arc::clone(&stats),
            camera,
            config.timings,
        )?;
        let control = ControlService::bind(
            config.control_port,
            bootstrap,
            registers,
            shared,
            streaming.sender(),
            discovery,
            DiscoveryBroadcaster::new(&config.link),
            stats,
        )?;

        Ok(Self { control, streaming })
    }

    pub fn control_port(&self) -> u16 {
        self.control.local_port()
    }

    pub fn stop_handle(&self) -> EndpointStop {
        EndpointStop {
            control: self.control.stop_flag(),
            streaming: self.streaming.stop_flag(),
        }
    }

    /// Wire the host watchdog into the control tick.
    pub fn set_watchdog(&mut self, feed: impl Fn() + Send + 'static) {
        self.control.set_watchdog(feed);
    }

    /// Run both services until stopped. The streaming loop gets its own
    /// thread; control runs on the caller's.
    pub fn run(self) {
        let Self {
            mut control,
            mut streaming,
        } = self;
        let stream_thread = std::thread::Builder::new()
            .name("gvsp-stream".into())
            .spawn(move || streaming.run())
            .expect("spawn streaming thread");
        control.run();
        if stream_thread.join().is_err() {
            warn!("streaming thread panicked");
        }
    }
}

/// Push a sanitized snapshot into the sensor. Individual failures are
/// logged and skipped so one bad parameter cannot block boot.
fn apply_snapshot(camera: &mut dyn Camera, snap: &ParamSnapshot) {
    let results = [
        ("exposure", camera.set_exposure_us(snap.exposure_us)),
        ("gain", camera.set_gain_db(snap.gain_db as u32)),
        ("brightness", camera.set_brightness(snap.brightness)),
        ("contrast", camera.set_contrast(snap.contrast)),
        ("saturation", camera.set_saturation(snap.saturation)),
        (
            "white balance",
            camera.set_white_balance(
                WhiteBalanceMode::from_raw(snap.wb_mode as u32).unwrap_or_default(),
            ),
        ),
        (
            "trigger",
            camera.set_trigger_mode(
                TriggerMode::from_raw(snap.trigger_mode as u32).unwrap_or_default(),
            ),
        ),
        ("jpeg quality", camera.set_jpeg_quality(snap.jpeg_quality as u32)),
        ("pixel format", camera.set_pixel_format(snap.pixel_format as u32)),
    ];
    for (name, result) in results {
        if let Err(e) = result {
            warn!("restoring {name} failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::TestPatternCamera;
    use crate::registers::regs;
    use crate::settings::MemoryStore;
    use std::net::UdpSocket;
    use std::time::Duration;

    fn test_config() -> EndpointConfig {
        EndpointConfig {
            control_port: 0,
            stream_port: 0,
            ..Default::default()
        }
    }

    #[test]
    fn end_to_end_discovery_and_readreg() {
        let endpoint = Endpoint::new(
            test_config(),
            Box::new(TestPatternCamera::new(320, 240)),
            Box::new(MemoryStore::new()),
        )
        .unwrap();
        let port = endpoint.control_port();
        let stop = endpoint.stop_handle();
        let worker = std::thread::spawn(move || endpoint.run());

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let device = ("127.0.0.1", port);

        // Discovery.
        client
            .send_to(&[0x42, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01], device)
            .unwrap();
        let mut buf = [0u8; 1024];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(n, 8 + 248);
        assert_eq!(buf[0], 0x00);

        // READREG SensorWidth.
        let mut wire = vec![0x42, 0x01, 0x00, 0x80, 0x00, 0x01, 0x00, 0x02];
        wire.extend_from_slice(&regs::SENSOR_WIDTH.to_be_bytes());
        client.send_to(&wire, device).unwrap();
        let (n, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(n, 12);
        assert_eq!(&buf[8..12], &320u32.to_be_bytes());

        stop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn persisted_settings_are_restored_into_the_camera() {
        let store = MemoryStore::new();
        store
            .save(&ParamSnapshot {
                exposure_us: 123_456,
                gain_db: 7,
                ..Default::default()
            })
            .unwrap();

        let mut camera = TestPatternCamera::default();
        apply_snapshot(&mut camera, &store.load());
        assert_eq!(camera.exposure_us(), 123_456);
        assert_eq!(camera.gain_db(), 7);
    }
}
