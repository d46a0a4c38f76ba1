use anyhow::{Context, Result};
use dryfire_calib::{CalibrationMode, EngineConfig};
use dryfire_state::{Target, TargetError};
use dryfire_vision::BlobSelector;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid target: {0}")]
    Target(#[from] TargetError),
    #[error("{0} size must be non-zero")]
    ZeroSize(&'static str),
    #[error("{0} must be non-zero")]
    ZeroValue(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub width: f64,
    pub height: f64,
    pub center: [f64; 2],
    pub rings: Vec<f64>,
    pub points: Vec<i32>,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            width: 900.0,
            height: 1200.0,
            center: [450.0, 600.0],
            rings: vec![120.0, 220.0, 320.0, 420.0],
            points: vec![10, 9, 8, 7, 6],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobSettings {
    pub min_area: usize,
    pub sensitivity: usize,
}

impl Default for BlobSettings {
    fn default() -> Self {
        Self {
            min_area: 12,
            sensitivity: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub mode: CalibrationMode,
    pub tick_interval_ms: u64,
    pub stale_timeout_ms: u64,
    pub stale_after_ticks: u32,
    pub square_fallback: bool,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::Manual,
            tick_interval_ms: 60,
            stale_timeout_ms: 2000,
            stale_after_ticks: 60,
            square_fallback: true,
        }
    }
}

/// Everything tunable, read from one JSON file. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Frames are downscaled to this size before any detection.
    pub processing: Size,
    /// Surface the taps are made on.
    pub display: Size,
    pub target: TargetSettings,
    pub blob: BlobSettings,
    pub hit_debounce_ms: u64,
    pub calibration: CalibrationSettings,
    pub shots_goal: u32,
    /// Pacing for file-backed frame sources.
    pub frame_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            processing: Size::default(),
            display: Size::default(),
            target: TargetSettings::default(),
            blob: BlobSettings::default(),
            hit_debounce_ms: 120,
            calibration: CalibrationSettings::default(),
            shots_goal: 10,
            frame_interval_ms: 33,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let settings: Settings = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            tracing::info!("Loaded settings from {}", path.display());
            settings
        } else {
            tracing::warn!("No settings file at {}, using defaults", path.display());
            Settings::default()
        };

        settings
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, size) in [("processing", self.processing), ("display", self.display)] {
            if size.width == 0 || size.height == 0 {
                return Err(ConfigError::ZeroSize(name));
            }
        }
        for (name, value) in [
            ("hit_debounce_ms", self.hit_debounce_ms),
            ("calibration.tick_interval_ms", self.calibration.tick_interval_ms),
            ("calibration.stale_timeout_ms", self.calibration.stale_timeout_ms),
            ("frame_interval_ms", self.frame_interval_ms),
            ("calibration.stale_after_ticks", self.calibration.stale_after_ticks as u64),
            ("shots_goal", self.shots_goal as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name));
            }
        }
        self.target()?;
        Ok(())
    }

    pub fn target(&self) -> Result<Target, TargetError> {
        let t = &self.target;
        Target::new(
            t.width,
            t.height,
            Point2::new(t.center[0], t.center[1]),
            t.rings.clone(),
            t.points.clone(),
        )
    }

    pub fn blob_selector(&self) -> BlobSelector {
        BlobSelector::new(self.blob.min_area, self.blob.sensitivity)
    }

    /// Display-to-processing scale applied to taps.
    pub fn tap_scale(&self) -> Vector2<f64> {
        Vector2::new(
            self.processing.width as f64 / self.display.width as f64,
            self.processing.height as f64 / self.display.height as f64,
        )
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            mode: self.calibration.mode,
            target_width: self.target.width,
            target_height: self.target.height,
            tap_scale: self.tap_scale(),
            stale_timeout: Duration::from_millis(self.calibration.stale_timeout_ms),
            stale_after_ticks: self.calibration.stale_after_ticks,
            square_fallback: self.calibration.square_fallback,
            ..EngineConfig::default()
        }
    }

    pub fn hit_debounce(&self) -> Duration {
        Duration::from_millis(self.hit_debounce_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.calibration.tick_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
