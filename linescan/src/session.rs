/*!
Device session contract.

Calling code holds a `Box<dyn DeviceSession>` (or a concrete backend), calls
[`DeviceSession::setup`], acquires any number of frames, optionally changing
gain or offset in between, and finally calls [`DeviceSession::teardown`].
*/

use crate::error::{DeviceError, Result};
use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Constructed, transports not yet established
    Unopened,
    /// Setup completed, acquisitions allowed
    Ready,
    /// Torn down
    Closed,
}

impl SessionState {
    /// Fail with [`DeviceError::NotReady`] unless the session is `Ready`
    pub fn ensure_ready(self) -> Result<()> {
        match self {
            SessionState::Ready => Ok(()),
            state => Err(DeviceError::NotReady { state }),
        }
    }
}

/// Capability contract implemented by every backend.
///
/// Operations block until complete. A session must not be shared between
/// threads without external serialization.
pub trait DeviceSession {
    /// Human readable backend name
    fn name(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> SessionState;

    /// Samples per frame, known once setup has completed
    fn pixel_count(&self) -> Option<usize>;

    /// Establish transports. Call once per session, before any acquisition.
    fn setup(&mut self) -> Result<()>;

    /// Perform one full acquisition, returning exactly `pixel_count` samples
    fn acquire(&mut self) -> Result<Frame>;

    /// Change the sensor gain; blocks until acknowledged
    fn set_gain(&mut self, value: f64) -> Result<()>;

    /// Change the sensor offset; blocks until acknowledged
    fn set_offset(&mut self, value: f64) -> Result<()>;

    /// Issue the scan initialization sequence. Only hardware backends have one.
    fn scan_start(&mut self) -> Result<()> {
        debug!("{}: scan start is a no-op", self.name());
        self.state().ensure_ready()
    }

    /// Release transports. Best-effort: safe after a partial setup and never
    /// fails the caller's shutdown.
    fn teardown(&mut self) -> Result<()>;
}

impl<T: DeviceSession + ?Sized> DeviceSession for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn state(&self) -> SessionState {
        (**self).state()
    }

    fn pixel_count(&self) -> Option<usize> {
        (**self).pixel_count()
    }

    fn setup(&mut self) -> Result<()> {
        (**self).setup()
    }

    fn acquire(&mut self) -> Result<Frame> {
        (**self).acquire()
    }

    fn set_gain(&mut self, value: f64) -> Result<()> {
        (**self).set_gain(value)
    }

    fn set_offset(&mut self, value: f64) -> Result<()> {
        (**self).set_offset(value)
    }

    fn scan_start(&mut self) -> Result<()> {
        (**self).scan_start()
    }

    fn teardown(&mut self) -> Result<()> {
        (**self).teardown()
    }
}
