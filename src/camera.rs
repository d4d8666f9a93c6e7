//! Camera collaborator interface.
//!
//! The endpoint core never talks to sensor hardware directly; it consumes
//! this trait. Real sensor drivers live outside the crate. The bundled
//! [`TestPatternCamera`] renders a deterministic ramp and backs the daemon
//! default and the tests.

use thiserror::Error;

use crate::protocol::gvsp;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("sensor not ready")]
    NotReady,

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("{param} value {value} out of range")]
    OutOfRange { param: &'static str, value: i64 },
}

pub type Result<T> = std::result::Result<T, CameraError>;

// Parameter ranges, shared with the register-map writers.
pub const EXPOSURE_US_MIN: u32 = 1;
pub const EXPOSURE_US_MAX: u32 = 1_000_000;
pub const GAIN_DB_MIN: u32 = 0;
pub const GAIN_DB_MAX: u32 = 30;
pub const ADJUST_MIN: i32 = -2;
pub const ADJUST_MAX: i32 = 2;
pub const JPEG_QUALITY_MIN: u32 = 0;
pub const JPEG_QUALITY_MAX: u32 = 63;

/// White-balance operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum WhiteBalanceMode {
    Off = 0,
    #[default]
    Auto = 1,
}

impl WhiteBalanceMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Off),
            1 => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Frame trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum TriggerMode {
    #[default]
    Off = 0,
    On = 1,
    Software = 2,
}

impl TriggerMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Off),
            1 => Some(Self::On),
            2 => Some(Self::Software),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// One captured image.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
}

/// The sensor interface the endpoint consumes.
///
/// Setters report hardware faults; range checking happens in the register
/// map before a setter is reached, so an in-range value that still fails
/// indicates a sensor problem, not a protocol one.
pub trait Camera: Send {
    fn capture_frame(&mut self) -> Result<Frame>;

    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn exposure_us(&self) -> u32;
    fn set_exposure_us(&mut self, us: u32) -> Result<()>;

    fn gain_db(&self) -> u32;
    fn set_gain_db(&mut self, db: u32) -> Result<()>;

    fn brightness(&self) -> i32;
    fn set_brightness(&mut self, v: i32) -> Result<()>;

    fn contrast(&self) -> i32;
    fn set_contrast(&mut self, v: i32) -> Result<()>;

    fn saturation(&self) -> i32;
    fn set_saturation(&mut self, v: i32) -> Result<()>;

    fn white_balance(&self) -> WhiteBalanceMode;
    fn set_white_balance(&mut self, mode: WhiteBalanceMode) -> Result<()>;

    fn trigger_mode(&self) -> TriggerMode;
    fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<()>;

    fn pixel_format(&self) -> u32;
    fn set_pixel_format(&mut self, pfnc: u32) -> Result<()>;

    fn jpeg_quality(&self) -> u32;
    fn set_jpeg_quality(&mut self, q: u32) -> Result<()>;
}

/// Deterministic ramp-pattern source. Every capture shifts the ramp by the
/// frame counter so successive frames differ.
#[derive(Debug)]
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    pixel_format: u32,
    exposure_us: u32,
    gain_db: u32,
    brightness: i32,
    contrast: i32,
    saturation: i32,
    white_balance: WhiteBalanceMode,
    trigger_mode: TriggerMode,
    jpeg_quality: u32,
    frame_counter: u32,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: gvsp::PIXEL_FORMAT_MONO8,
            exposure_us: 10_000,
            gain_db: 0,
            brightness: 0,
            contrast: 0,
            saturation: 0,
            white_balance: WhiteBalanceMode::Auto,
            trigger_mode: TriggerMode::Off,
            jpeg_quality: 40,
            frame_counter: 0,
        }
    }

    fn frame_len(&self) -> usize {
        match gvsp::bits_per_pixel(self.pixel_format) {
            Some(bpp) => (self.width * self.height * bpp / 8) as usize,
            // Compressed output: synthesize a fixed-size opaque payload.
            None => (self.width * self.height / 8) as usize,
        }
    }
}

impl Default for TestPatternCamera {
    fn default() -> Self {
        Self::new(320, 240)
    }
}

impl Camera for TestPatternCamera {
    fn capture_frame(&mut self) -> Result<Frame> {
        let shift = self.frame_counter;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        let len = self.frame_len();
        let bytes = (0..len)
            .map(|i| (i as u32).wrapping_add(shift) as u8)
            .collect();
        Ok(Frame {
            bytes,
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
        })
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn exposure_us(&self) -> u32 {
        self.exposure_us
    }

    fn set_exposure_us(&mut self, us: u32) -> Result<()> {
        self.exposure_us = us;
        Ok(())
    }

    fn gain_db(&self) -> u32 {
        self.gain_db
    }

    fn set_gain_db(&mut self, db: u32) -> Result<()> {
        self.gain_db = db;
        Ok(())
    }

    fn brightness(&self) -> i32 {
        self.brightness
    }

    fn set_brightness(&mut self, v: i32) -> Result<()> {
        self.brightness = v;
        Ok(())
    }

    fn contrast(&self) -> i32 {
        self.contrast
    }

    fn set_contrast(&mut self, v: i32) -> Result<()> {
        self.contrast = v;
        Ok(())
    }

    fn saturation(&self) -> i32 {
        self.saturation
    }

    fn set_saturation(&mut self, v: i32) -> Result<()> {
        self.saturation = v;
        Ok(())
    }

    fn white_balance(&self) -> WhiteBalanceMode {
        self.white_balance
    }

    fn set_white_balance(&mut self, mode: WhiteBalanceMode) -> Result<()> {
        self.white_balance = mode;
        Ok(())
    }

    fn trigger_mode(&self) -> TriggerMode {
        self.trigger_mode
    }

    fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<()> {
        self.trigger_mode = mode;
        Ok(())
    }

    fn pixel_format(&self) -> u32 {
        self.pixel_format
    }

    fn set_pixel_format(&mut self, pfnc: u32) -> Result<()> {
        self.pixel_format = pfnc;
        Ok(())
    }

    fn jpeg_quality(&self) -> u32 {
        self.jpeg_quality
    }

    fn set_jpeg_quality(&mut self, q: u32) -> Result<()> {
        self.jpeg_quality = q;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono8_frame_has_one_byte_per_pixel() {
        let mut cam = TestPatternCamera::new(320, 240);
        let frame = cam.capture_frame().unwrap();
        assert_eq!(frame.bytes.len(), 320 * 240);
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
        assert_eq!(frame.pixel_format, gvsp::PIXEL_FORMAT_MONO8);
    }

    #[test]
    fn rgb565_frame_has_two_bytes_per_pixel() {
        let mut cam = TestPatternCamera::new(160, 120);
        cam.set_pixel_format(gvsp::PIXEL_FORMAT_RGB565).unwrap();
        let frame = cam.capture_frame().unwrap();
        assert_eq!(frame.bytes.len(), 160 * 120 * 2);
    }

    #[test]
    fn successive_frames_differ() {
        let mut cam = TestPatternCamera::default();
        let a = cam.capture_frame().unwrap();
        let b = cam.capture_frame().unwrap();
        assert_ne!(a.bytes, b.bytes);
    }

    #[test]
    fn mode_raw_round_trip() {
        for mode in [WhiteBalanceMode::Off, WhiteBalanceMode::Auto] {
            assert_eq!(WhiteBalanceMode::from_raw(mode.as_raw()).unwrap(), mode);
        }
        assert!(WhiteBalanceMode::from_raw(2).is_none());

        for mode in [TriggerMode::Off, TriggerMode::On, TriggerMode::Software] {
            assert_eq!(TriggerMode::from_raw(mode.as_raw()).unwrap(), mode);
        }
        assert!(TriggerMode::from_raw(3).is_none());
    }
}
