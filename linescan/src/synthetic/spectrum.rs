/*!
Synthetic Raman-like spectrum backend.
*/

use crate::error::Result;
use crate::frame::Frame;
use crate::session::{DeviceSession, SessionState};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{noisy_frame, rng_from_seed};

/// Uniform background band
const BACKGROUND_LOW: f64 = 100.0;
const BACKGROUND_HIGH: f64 = 200.0;

/// Lowest pixel a peak may start at
const PEAK_MARGIN: usize = 100;

/// Peak height band
const PEAK_HEIGHT_LOW: u32 = 500;
const PEAK_HEIGHT_HIGH: u32 = 1000;

/// Peak width in pixels, split evenly into a rising and a falling edge
const PEAK_WIDTH: usize = 10;

/// Height step between adjacent peak samples
const MIN_GAP: f64 = 10.0;

/// Per-read noise band
const NOISE_FLOOR: f64 = 50.0;
const NOISE_CEILING: f64 = 150.0;

/// Synthetic spectrum parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Samples per frame
    pub pixel_count: usize,
    /// Number of triangular peaks placed on the background
    pub peak_count: usize,
    /// Generator seed; entropy-seeded when absent
    pub seed: Option<u64>,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            pixel_count: 2048,
            peak_count: 10,
            seed: None,
        }
    }
}

/// Raman-like spectrum: a baseline of background plus randomly placed peaks
/// built once at construction, with fresh noise on every read.
pub struct SyntheticSpectrumBackend {
    baseline: Vec<f64>,
    peak_positions: Vec<usize>,
    rng: StdRng,
    state: SessionState,
}

impl SyntheticSpectrumBackend {
    /// Create a new spectrum backend, generating its baseline
    pub fn new(config: SpectrumConfig) -> Self {
        let mut rng = rng_from_seed(config.seed);
        let (baseline, peak_positions) =
            generate_baseline(config.pixel_count, config.peak_count, &mut rng);

        debug!("Spectrum peaks at {:?}", peak_positions);
        Self {
            baseline,
            peak_positions,
            rng,
            state: SessionState::Unopened,
        }
    }

    /// Noise-free baseline curve
    pub fn baseline(&self) -> &[f64] {
        &self.baseline
    }

    /// Start pixel of every peak, in generation order
    pub fn peak_positions(&self) -> &[usize] {
        &self.peak_positions
    }
}

impl Default for SyntheticSpectrumBackend {
    fn default() -> Self {
        Self::new(SpectrumConfig::default())
    }
}

/// Build the background + peaks curve
fn generate_baseline(pixel_count: usize, peak_count: usize, rng: &mut StdRng) -> (Vec<f64>, Vec<usize>) {
    let background: Vec<f64> = (0..pixel_count)
        .map(|_| rng.gen_range(BACKGROUND_LOW..BACKGROUND_HIGH))
        .collect();

    let mut peaks = vec![0.0; pixel_count];
    let mut positions = Vec::with_capacity(peak_count);

    // Room for a full peak after the last possible start
    if pixel_count > PEAK_WIDTH {
        let last_start = pixel_count - PEAK_WIDTH - 1;
        let first_start = if PEAK_MARGIN < last_start { PEAK_MARGIN } else { 0 };
        let half = PEAK_WIDTH / 2;

        for _ in 0..peak_count {
            let start = rng.gen_range(first_start..=last_start);
            let height = f64::from(rng.gen_range(PEAK_HEIGHT_LOW..PEAK_HEIGHT_HIGH));
            positions.push(start);

            let mut floor = height + MIN_GAP;
            let mut x = start;
            for _ in 0..half {
                let next = floor + MIN_GAP;
                peaks[x] = rng.gen_range(floor..next).trunc();
                floor = next;
                x += 1;
            }
            for _ in 0..half {
                let next = floor - MIN_GAP;
                peaks[x] = rng.gen_range(next..floor).trunc();
                floor = next;
                x += 1;
            }
        }
    }

    let baseline = background.iter().zip(&peaks).map(|(b, p)| b + p).collect();
    (baseline, positions)
}

impl DeviceSession for SyntheticSpectrumBackend {
    fn name(&self) -> &str {
        "spectrum"
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn pixel_count(&self) -> Option<usize> {
        Some(self.baseline.len())
    }

    fn setup(&mut self) -> Result<()> {
        info!("Setup spectrum device ({} pixels)", self.baseline.len());
        self.state = SessionState::Ready;
        Ok(())
    }

    fn acquire(&mut self) -> Result<Frame> {
        self.state.ensure_ready()?;
        Ok(noisy_frame(&self.baseline, &mut self.rng, NOISE_FLOOR, NOISE_CEILING))
    }

    fn set_gain(&mut self, value: f64) -> Result<()> {
        self.state.ensure_ready()?;
        debug!("Spectrum ignores gain {}", value);
        Ok(())
    }

    fn set_offset(&mut self, value: f64) -> Result<()> {
        self.state.ensure_ready()?;
        debug!("Spectrum ignores offset {}", value);
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        info!("Close spectrum device");
        self.state = SessionState::Closed;
        Ok(())
    }
}
