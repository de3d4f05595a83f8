/*!
Stored waveform backend.

Replays a reference curve loaded once from comma-delimited text. Gain and
offset shift the stored curve in place.
*/

use crate::error::{Result, WaveformError};
use crate::frame::Frame;
use crate::session::{DeviceSession, SessionState};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{noisy_frame, rng_from_seed};

/// Per-read noise band
const NOISE_FLOOR: f64 = 0.0;
const NOISE_CEILING: f64 = 10.0;

/// Stored waveform parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    /// Comma-delimited reference curve
    pub reference_path: PathBuf,
    /// Generator seed; entropy-seeded when absent
    pub seed: Option<u64>,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            reference_path: PathBuf::from("cobra_singlesled.txt"),
            seed: None,
        }
    }
}

/// Load a comma-delimited numeric curve. Rows are concatenated in order.
pub fn load_reference<P: AsRef<Path>>(path: P) -> std::result::Result<Vec<f64>, WaveformError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| WaveformError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut curve = Vec::new();
    for record in reader.records() {
        let record = record?;
        for field in record.iter().filter(|field| !field.is_empty()) {
            let value = field.parse::<f64>().map_err(|_| WaveformError::NotNumeric {
                value: field.to_string(),
            })?;
            curve.push(value);
        }
    }

    if curve.is_empty() {
        return Err(WaveformError::Empty);
    }

    info!("Loaded {} samples from {}", curve.len(), path.display());
    Ok(curve)
}

/// Replays a stored reference curve with fresh noise on every read.
///
/// `set_gain` and `set_offset` add their value to the stored baseline. The
/// shift is cumulative: two calls with 100 move the baseline by 200, and a
/// call with -100 undoes a call with 100.
pub struct StoredWaveformBackend {
    baseline: Vec<f64>,
    rng: StdRng,
    state: SessionState,
}

impl StoredWaveformBackend {
    /// Create a backend from the reference file named in `config`
    pub fn new(config: WaveformConfig) -> std::result::Result<Self, WaveformError> {
        let baseline = load_reference(&config.reference_path)?;
        Ok(Self::from_baseline(baseline, config.seed))
    }

    /// Create a backend from an in-memory curve
    pub fn from_baseline(baseline: Vec<f64>, seed: Option<u64>) -> Self {
        Self {
            baseline,
            rng: rng_from_seed(seed),
            state: SessionState::Unopened,
        }
    }

    /// Current (shifted) baseline
    pub fn baseline(&self) -> &[f64] {
        &self.baseline
    }

    fn shift(&mut self, amount: f64) {
        for value in &mut self.baseline {
            *value += amount;
        }
    }
}

impl DeviceSession for StoredWaveformBackend {
    fn name(&self) -> &str {
        "stored_waveform"
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn pixel_count(&self) -> Option<usize> {
        Some(self.baseline.len())
    }

    fn setup(&mut self) -> Result<()> {
        info!("Setup stored waveform device ({} pixels)", self.baseline.len());
        self.state = SessionState::Ready;
        Ok(())
    }

    fn acquire(&mut self) -> Result<Frame> {
        self.state.ensure_ready()?;
        Ok(noisy_frame(&self.baseline, &mut self.rng, NOISE_FLOOR, NOISE_CEILING))
    }

    fn set_gain(&mut self, value: f64) -> Result<()> {
        self.state.ensure_ready()?;
        debug!("Shift stored baseline by gain {}", value);
        self.shift(value);
        Ok(())
    }

    fn set_offset(&mut self, value: f64) -> Result<()> {
        self.state.ensure_ready()?;
        debug!("Shift stored baseline by offset {}", value);
        self.shift(value);
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        info!("Close stored waveform device");
        self.state = SessionState::Closed;
        Ok(())
    }
}
