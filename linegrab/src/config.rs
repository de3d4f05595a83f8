/*!
Configuration management for the line grabber application.
*/

use anyhow::{Context, Result};
use clap::ValueEnum;
use linescan::synthetic::{RampConfig, SpectrumConfig, WaveformConfig};
use linescan::{
    CameraLinkBackend, CameraLinkConfig, CyclingRampBackend, DeviceSession, StoredWaveformBackend,
    SyntheticSpectrumBackend,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub camera_link: CameraLinkConfig,
    pub synthetic: SyntheticConfig,
    pub capture: CaptureConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Build the configured backend, not yet set up
    pub fn build_session(&self) -> Result<Box<dyn DeviceSession>> {
        let session: Box<dyn DeviceSession> = match self.device.backend {
            BackendKind::Ramp => Box::new(CyclingRampBackend::new(self.synthetic.ramp.clone())),
            BackendKind::Spectrum => {
                Box::new(SyntheticSpectrumBackend::new(self.synthetic.spectrum.clone()))
            }
            BackendKind::StoredWaveform => {
                let waveform = &self.synthetic.waveform;
                let backend = StoredWaveformBackend::new(waveform.clone()).with_context(|| {
                    format!(
                        "Failed to load reference waveform: {}",
                        waveform.reference_path.display()
                    )
                })?;
                Box::new(backend)
            }
            BackendKind::CameraLink => Box::new(CameraLinkBackend::new(self.camera_link.clone())),
        };
        Ok(session)
    }
}

/// Which backend to drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Ramp,
    Spectrum,
    StoredWaveform,
    CameraLink,
}

/// Device selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backend: BackendKind,
}

/// Parameters for the synthetic backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub ramp: RampConfig,
    pub spectrum: SpectrumConfig,
    pub waveform: WaveformConfig,
}

/// Acquisition loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Output directory for .raw frame files
    pub output_directory: String,

    /// Enable file storage
    pub enable_storage: bool,

    /// Frames to acquire; 0 runs until interrupted
    pub frame_count: u64,

    /// Pause between acquisitions in milliseconds
    pub frame_interval_ms: u64,

    /// Gain applied right after setup
    pub gain: Option<f64>,

    /// Offset applied right after setup
    pub offset: Option<f64>,

    /// Issue the scan initialization sequence after setup
    pub scan_start: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_directory: "./frames".to_string(),
            enable_storage: true,
            frame_count: 0,
            frame_interval_ms: 0,
            gain: None,
            offset: None,
            scan_start: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linescan::SessionState;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let mut original_config = AppConfig::new();
        original_config.device.backend = BackendKind::CameraLink;
        original_config.camera_link = CameraLinkConfig::basler_sprint_4k();
        original_config.capture.gain = Some(2.5);

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        // Save and load
        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::new();

        assert_eq!(config.device.backend, BackendKind::Ramp);
        assert_eq!(config.capture.output_directory, "./frames");
        assert!(config.capture.enable_storage);
        assert_eq!(config.capture.frame_count, 0);
        assert!(!config.capture.scan_start);

        assert_eq!(config.camera_link, CameraLinkConfig::cobra());
        assert_eq!(config.synthetic.ramp.data_length, 1024);
        assert_eq!(config.synthetic.spectrum.pixel_count, 2048);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nbackend = \"spectrum\"\n\n[capture]\nframe_count = 5").unwrap();
        file.flush().unwrap();

        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.device.backend, BackendKind::Spectrum);
        assert_eq!(config.capture.frame_count, 5);
        assert_eq!(config.capture.output_directory, "./frames");
        assert_eq!(config.camera_link, CameraLinkConfig::cobra());
    }

    #[test]
    fn test_camera_without_serial_stays_without_serial() {
        let mut config = AppConfig::new();
        config.camera_link = CameraLinkConfig::basler_sprint_4k();

        let temp_file = NamedTempFile::new().unwrap();
        config.save_to_file(temp_file.path()).unwrap();
        let saved = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(!saved.contains("serial_port"));

        let loaded = AppConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.camera_link.serial_port, None);
        assert_eq!(loaded.camera_link.ccf_path, config.camera_link.ccf_path);

        // A hand-written table that leaves the port out has no serial link either
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[camera_link]\ncard = \"Xcelera-CL_LX1_2\"").unwrap();
        file.flush().unwrap();
        let loaded = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.camera_link.card, "Xcelera-CL_LX1_2");
        assert_eq!(loaded.camera_link.serial_port, None);
    }

    #[test]
    fn test_bad_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nbackend = \"scope\"").unwrap();
        file.flush().unwrap();
        assert!(AppConfig::load_from_file(file.path()).is_err());

        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load_from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_build_session() {
        let mut config = AppConfig::new();
        let session = config.build_session().unwrap();
        assert_eq!(session.name(), "ramp");
        assert_eq!(session.state(), SessionState::Unopened);

        config.device.backend = BackendKind::Spectrum;
        assert_eq!(config.build_session().unwrap().name(), "spectrum");

        let dir = tempfile::tempdir().unwrap();
        config.device.backend = BackendKind::StoredWaveform;
        config.synthetic.waveform.reference_path = dir.path().join("missing.txt");
        assert!(config.build_session().is_err());

        std::fs::write(dir.path().join("curve.txt"), "1, 2, 3\n4, 5\n").unwrap();
        config.synthetic.waveform.reference_path = dir.path().join("curve.txt");
        let session = config.build_session().unwrap();
        assert_eq!(session.pixel_count(), Some(5));
    }
}
