/*!
Cycling ramp backend: a deterministic linear ramp whose start value walks up
one step per read.
*/

use crate::error::Result;
use crate::frame::Frame;
use crate::session::{DeviceSession, SessionState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::to_sample;

/// Cycling ramp parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// Samples per frame
    pub data_length: usize,
    /// Height of the ramp and wrap point of the start position
    pub top_level: u32,
    /// Start position increment per acquisition
    pub pattern_jump: u32,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            data_length: 1024,
            top_level: 1000,
            pattern_jump: 1,
        }
    }
}

/// Returns a linear ramp from `p` to `p + top_level`, advancing `p` by
/// `pattern_jump` after every read and wrapping it to 0 at `top_level`.
pub struct CyclingRampBackend {
    config: RampConfig,
    position: u32,
    state: SessionState,
}

impl CyclingRampBackend {
    /// Create a new ramp backend
    pub fn new(config: RampConfig) -> Self {
        Self {
            config,
            position: 0,
            state: SessionState::Unopened,
        }
    }

    /// Start value of the next frame
    pub fn position(&self) -> u32 {
        self.position
    }

    fn ramp(&self) -> Frame {
        let start = f64::from(self.position);
        let top = f64::from(self.config.top_level);
        let n = self.config.data_length;
        let step = if n > 1 { top / (n - 1) as f64 } else { 0.0 };

        Frame::new((0..n).map(|i| to_sample(start + step * i as f64)).collect())
    }
}

impl Default for CyclingRampBackend {
    fn default() -> Self {
        Self::new(RampConfig::default())
    }
}

impl DeviceSession for CyclingRampBackend {
    fn name(&self) -> &str {
        "ramp"
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn pixel_count(&self) -> Option<usize> {
        Some(self.config.data_length)
    }

    fn setup(&mut self) -> Result<()> {
        info!("Setup ramp device ({:?})", self.config);
        self.state = SessionState::Ready;
        Ok(())
    }

    fn acquire(&mut self) -> Result<Frame> {
        self.state.ensure_ready()?;
        let frame = self.ramp();

        self.position = self.position.saturating_add(self.config.pattern_jump);
        if self.position >= self.config.top_level {
            self.position = 0;
        }

        Ok(frame)
    }

    fn set_gain(&mut self, value: f64) -> Result<()> {
        self.state.ensure_ready()?;
        debug!("Ramp ignores gain {}", value);
        Ok(())
    }

    fn set_offset(&mut self, value: f64) -> Result<()> {
        self.state.ensure_ready()?;
        debug!("Ramp ignores offset {}", value);
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        info!("Close ramp device");
        self.position = 0;
        self.state = SessionState::Closed;
        Ok(())
    }
}
