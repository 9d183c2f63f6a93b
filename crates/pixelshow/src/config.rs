//! Show configuration.
//!
//! Read from `<config_dir>/PixelShow/config.json`, then overridden by the
//! `EVENT_ID`, `SENSITIVITY` and `SAMPLE_HZ` environment variables.

use pixelshow_control::DeviceConfig;
use pixelshow_core::{LogConfig, SignalConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Settings of a local show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowConfig {
    /// Event to run
    pub event_id: String,
    /// Beat sensitivity slider
    pub sensitivity: f32,
    /// Sensor frame rate in Hz
    pub sample_hz: f32,
    /// Simulated devices
    pub devices: usize,
    /// Device render rate
    pub frame_rate: u32,
    /// Lead time of the synchronised start
    pub start_lead_ms: u64,
    /// Logging
    pub logging: LogConfig,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            event_id: "FIESTA-2025".to_string(),
            sensitivity: 80.0,
            sample_hz: 40.0,
            devices: 4,
            frame_rate: 60,
            start_lead_ms: 500,
            logging: LogConfig::default(),
        }
    }
}

impl ShowConfig {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("PixelShow");
            p.push("config.json");
            p
        })
    }

    /// Load from the user config directory, defaults when missing or invalid
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load from a file, defaults when missing or invalid
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path).map(|content| serde_json::from_str(&content)) {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }
            Err(e) => {
                warn!("Cannot read config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Write to a file
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }

    /// Apply environment overrides read through `lookup`. Values that do not
    /// parse are ignored.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(id) = lookup("EVENT_ID").filter(|v| !v.trim().is_empty()) {
            self.event_id = id.trim().to_string();
        }
        if let Some(v) = lookup("SENSITIVITY").and_then(|v| v.trim().parse::<f32>().ok()) {
            if v.is_finite() {
                self.sensitivity = v;
            }
        }
        if let Some(v) = lookup("SAMPLE_HZ").and_then(|v| v.trim().parse::<f32>().ok()) {
            if v.is_finite() && v > 0.0 {
                self.sample_hz = v;
            }
        }
        self
    }

    /// Conditioner settings for the sensor bridge
    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            sensitivity: self.sensitivity,
            sample_hz: self.sample_hz,
            ..SignalConfig::default()
        }
    }

    /// Runtime settings of each simulated device
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::with_frame_rate(self.frame_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ShowConfig::default();
        assert_eq!(config.event_id, "FIESTA-2025");
        assert_eq!(config.sensitivity, 80.0);
        assert_eq!(config.signal_config().min_emit_interval_ms(), 25);
        assert_eq!(config.device_config().frame_interval_ms, 16);
    }

    #[test]
    fn test_env_overrides() {
        let config = ShowConfig::default().with_env_overrides(env(&[
            ("EVENT_ID", "BODA-2026"),
            ("SENSITIVITY", "120"),
            ("SAMPLE_HZ", "20"),
        ]));
        assert_eq!(config.event_id, "BODA-2026");
        assert_eq!(config.sensitivity, 120.0);
        assert_eq!(config.signal_config().min_emit_interval_ms(), 50);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let config = ShowConfig::default().with_env_overrides(env(&[
            ("EVENT_ID", "  "),
            ("SENSITIVITY", "loud"),
            ("SAMPLE_HZ", "-3"),
        ]));
        assert_eq!(config, ShowConfig::default());
    }

    #[test]
    fn test_file_round_trip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PixelShow").join("config.json");

        let mut config = ShowConfig::default();
        config.devices = 12;
        config.save_to(&path).unwrap();
        assert_eq!(ShowConfig::load_from(&path), config);

        fs::write(&path, r#"{"event_id": "X"}"#).unwrap();
        let partial = ShowConfig::load_from(&path);
        assert_eq!(partial.event_id, "X");
        assert_eq!(partial.devices, 4);

        fs::write(&path, "not json").unwrap();
        assert_eq!(ShowConfig::load_from(&path), ShowConfig::default());
    }
}
