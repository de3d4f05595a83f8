/*!
# Line-Scan Device Protocol Layer

This crate drives a camera-link line-scan sensor through two channels: a
strictly ordered text handshake with an external frame-grabber console
process, and an ASCII command/acknowledgment protocol on a serial link for
gain, offset and scan control. Synthetic backends implement the same
[`DeviceSession`] contract without any transport.

## Core Types

- [`DeviceSession`] - Capability contract shared by all backends
- [`Frame`] - One fixed-length line-scan acquisition
- [`CameraLinkBackend`] - Pipe + serial hardware backend
- [`CyclingRampBackend`], [`SyntheticSpectrumBackend`], [`StoredWaveformBackend`] - Synthetic backends

## Modules

- [`frame`] - Frame type and raw frame-file decoding
- [`ccf`] - Pixel count extraction from camera configuration files
- [`pipe`] - Snap/save/next/repeat handshake with the grab console
- [`serial`] - Serial command channel with acknowledgment checking
- [`session`] - Device session contract and lifecycle state
- [`camera_link`] - Hardware backend composing pipe and serial channels
- [`synthetic`] - Transport-free backends for testing calling code
- [`process`] - Stale grab-console cleanup
- [`error`] - Error types for every component
*/

pub mod camera_link;
pub mod ccf;
pub mod error;
pub mod frame;
pub mod pipe;
pub mod process;
pub mod serial;
pub mod session;
pub mod synthetic;

// Re-export commonly used types
pub use camera_link::{CameraLinkBackend, CameraLinkConfig};
pub use error::{CcfError, DecodeError, DeviceError, PipeError, SerialError, WaveformError};
pub use frame::Frame;
pub use pipe::{HandshakeState, PipeHandshake};
pub use serial::{SerialCommandChannel, SerialLinkState};
pub use session::{DeviceSession, SessionState};
pub use synthetic::{CyclingRampBackend, StoredWaveformBackend, SyntheticSpectrumBackend};

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    use std::time::Duration;

    /// Byte order of 16-bit samples in the frame file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ByteOrder {
        Little,
        Big,
    }

    /// Sample byte order written by the grab console (raw buffer save on x86).
    pub const FRAME_BYTE_ORDER: ByteOrder = ByteOrder::Little;

    /// Bytes per frame sample
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Serial link baud rate
    pub const SERIAL_BAUD_RATE: u32 = 9600;

    /// Serial read/write timeout
    pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

    /// Terminator appended to every serial command
    pub const COMMAND_TERMINATOR: u8 = b'\r';

    /// Token a serial response must contain to count as acknowledged
    pub const ACK_TOKEN: &str = "<ok>";

    /// Number of response bytes read after each serial command
    pub const ACK_READ_BYTES: usize = 7;

    /// Number of `q` lines written to the grab console on close.
    /// Fixed by the console's own command loop.
    pub const DRAIN_COUNT: usize = 10;

    /// Default deadline for a single handshake line read
    pub const DEFAULT_PIPE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Key in the CCF file holding the sensor pixel width
    pub const CROP_WIDTH_KEY: &str = "Crop Width";
}
