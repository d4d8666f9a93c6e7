//! Persistent sensor-parameter storage.
//!
//! One snapshot per endpoint, one key per parameter. Exposure and gain
//! writes auto-save (they change most often in tuning sessions); the rest
//! persist on an explicit save. Out-of-range values found on load are
//! discarded field-wise and the defaults kept, so a corrupt store never
//! poisons the sensor.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::{
    ADJUST_MAX, ADJUST_MIN, EXPOSURE_US_MAX, EXPOSURE_US_MIN, GAIN_DB_MAX, GAIN_DB_MIN,
    JPEG_QUALITY_MAX, TriggerMode, WhiteBalanceMode,
};
use crate::protocol::gvsp;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// The persisted parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSnapshot {
    pub exposure_us: u32,
    pub gain_db: i32,
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub wb_mode: i32,
    pub trigger_mode: i32,
    pub jpeg_quality: i32,
    pub pixel_format: i32,
}

impl Default for ParamSnapshot {
    fn default() -> Self {
        Self {
            exposure_us: 10_000,
            gain_db: 0,
            brightness: 0,
            contrast: 0,
            saturation: 0,
            wb_mode: WhiteBalanceMode::Auto.as_raw() as i32,
            trigger_mode: TriggerMode::Off.as_raw() as i32,
            jpeg_quality: 40,
            pixel_format: gvsp::PIXEL_FORMAT_MONO8 as i32,
        }
    }
}

impl ParamSnapshot {
    /// Replace every out-of-range field with its default.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(EXPOSURE_US_MIN..=EXPOSURE_US_MAX).contains(&self.exposure_us) {
            self.exposure_us = defaults.exposure_us;
        }
        if !(GAIN_DB_MIN as i32..=GAIN_DB_MAX as i32).contains(&self.gain_db) {
            self.gain_db = defaults.gain_db;
        }
        for v in [&mut self.brightness, &mut self.contrast, &mut self.saturation] {
            if !(ADJUST_MIN..=ADJUST_MAX).contains(v) {
                *v = 0;
            }
        }
        if WhiteBalanceMode::from_raw(self.wb_mode as u32).is_none() {
            self.wb_mode = defaults.wb_mode;
        }
        if TriggerMode::from_raw(self.trigger_mode as u32).is_none() {
            self.trigger_mode = defaults.trigger_mode;
        }
        if !(0..=JPEG_QUALITY_MAX as i32).contains(&self.jpeg_quality) {
            self.jpeg_quality = defaults.jpeg_quality;
        }
        if !gvsp::SUPPORTED_PIXEL_FORMATS.contains(&(self.pixel_format as u32)) {
            self.pixel_format = defaults.pixel_format;
        }
        self
    }
}

/// Non-volatile storage collaborator.
pub trait SettingsStore: Send + Sync {
    /// Load the snapshot, sanitizing ranges. Missing or unreadable state
    /// yields the defaults.
    fn load(&self) -> ParamSnapshot;

    fn save(&self, snapshot: &ParamSnapshot) -> Result<()>;

    fn reset_defaults(&self) -> Result<()> {
        self.save(&ParamSnapshot::default())
    }
}

/// Volatile store for tests and diskless deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<ParamSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> ParamSnapshot {
        self.slot
            .lock()
            .map(|s| s.unwrap_or_default())
            .unwrap_or_default()
            .sanitized()
    }

    fn save(&self, snapshot: &ParamSnapshot) -> Result<()> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(*snapshot);
        }
        Ok(())
    }
}

/// JSON-file-backed store: one object per namespace.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> ParamSnapshot {
        let parsed = std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<ParamSnapshot>(&bytes).ok());
        parsed.unwrap_or_default().sanitized()
    }

    fn save(&self, snapshot: &ParamSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
