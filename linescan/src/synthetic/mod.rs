/*!
Synthetic backends.

These implement [`crate::DeviceSession`] without any transport so calling
code can be exercised without a camera or frame grabber:

- [`CyclingRampBackend`] - a deterministic ramp that walks up one step per read
- [`SyntheticSpectrumBackend`] - a fixed peaked spectrum with fresh noise per read
- [`StoredWaveformBackend`] - a recorded reference curve shifted by gain/offset
*/

mod ramp;
mod spectrum;
mod waveform;

pub use ramp::{CyclingRampBackend, RampConfig};
pub use spectrum::{SpectrumConfig, SyntheticSpectrumBackend};
pub use waveform::{load_reference, StoredWaveformBackend, WaveformConfig};

use crate::frame::Frame;
use num_traits::ToPrimitive;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seeded generator for reproducible runs, entropy-seeded otherwise
pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Round to the nearest representable sample, saturating at the u16 range
pub(crate) fn to_sample(value: f64) -> u16 {
    value
        .round()
        .clamp(0.0, f64::from(u16::MAX))
        .to_u16()
        .unwrap_or(0)
}

/// Overlay uniform noise in `[floor, ceiling)` on a baseline
pub(crate) fn noisy_frame(baseline: &[f64], rng: &mut StdRng, floor: f64, ceiling: f64) -> Frame {
    let samples = baseline
        .iter()
        .map(|&base| to_sample(base + rng.gen_range(floor..ceiling)))
        .collect();
    Frame::new(samples)
}
