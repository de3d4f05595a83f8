/*!
Camera-link hardware backend.

Pixel data comes from the grab console through the pipe handshake; gain,
offset and scan control go over the camera's serial link. Cameras differ only
by configuration (card, CCF, serial port), so a single backend type is
parameterized by [`CameraLinkConfig`].
*/

use crate::ccf;
use crate::error::{DeviceError, PipeError, Result};
use crate::frame::Frame;
use crate::pipe::PipeHandshake;
use crate::process;
use crate::protocol::DEFAULT_PIPE_TIMEOUT;
use crate::serial::SerialCommandChannel;
use crate::session::{DeviceSession, SessionState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

/// Camera-link backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraLinkConfig {
    /// Grab console executable
    pub executable: PathBuf,

    /// Console command argument
    pub command: String,

    /// Acquisition server (frame grabber card) name
    pub card: String,

    /// Acquisition resource index on the card
    pub index: String,

    /// CCF file for the camera; also supplies the pixel count
    pub ccf_path: PathBuf,

    /// Frame file the console writes on every save. Relative paths are
    /// resolved against `working_dir`.
    pub frame_path: PathBuf,

    /// Working directory for the console process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Serial control port, if the camera has one. A missing key means no
    /// serial link, so a saved config without a port loads back without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<String>,

    /// Deadline for each handshake line read in milliseconds
    pub pipe_timeout_ms: u64,

    /// Kill leftover console processes before starting a new one
    pub kill_stale_instances: bool,
}

impl CameraLinkConfig {
    /// Wasatch Cobra on an Xcelera card, with serial control
    pub fn cobra() -> Self {
        Self {
            executable: PathBuf::from("GrabConsole/SapNETCSharpGrabConsole.exe"),
            command: "grab".to_string(),
            card: "Xcelera-CL_LX1_1".to_string(),
            index: "0".to_string(),
            ccf_path: PathBuf::from("GrabConsole/cobra.ccf"),
            frame_path: PathBuf::from("test.raw"),
            working_dir: None,
            serial_port: Some(default_serial_port().to_string()),
            pipe_timeout_ms: DEFAULT_PIPE_TIMEOUT.as_millis() as u64,
            kill_stale_instances: true,
        }
    }

    /// Basler Sprint 4K on an Xcelera card, no serial control
    pub fn basler_sprint_4k() -> Self {
        Self {
            ccf_path: PathBuf::from("GrabConsole/BaslerSprint4K.ccf"),
            serial_port: None,
            ..Self::cobra()
        }
    }

    /// Frame file location as seen from this process
    pub fn resolved_frame_path(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) if self.frame_path.is_relative() => dir.join(&self.frame_path),
            _ => self.frame_path.clone(),
        }
    }

    /// Executable image name used to find stale console processes
    pub fn image_name(&self) -> String {
        self.executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.display().to_string())
    }

    /// Handshake read deadline
    pub fn pipe_timeout(&self) -> Duration {
        Duration::from_millis(self.pipe_timeout_ms)
    }

    fn console_command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg(&self.command)
            .arg(&self.card)
            .arg(&self.index)
            .arg(&self.ccf_path);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl Default for CameraLinkConfig {
    fn default() -> Self {
        Self::cobra()
    }
}

#[cfg(windows)]
fn default_serial_port() -> &'static str {
    "COM5"
}

#[cfg(not(windows))]
fn default_serial_port() -> &'static str {
    "/dev/ttyS4"
}

/// Hardware backend: grab console pipe for frames, serial link for control
pub struct CameraLinkBackend {
    config: CameraLinkConfig,
    state: SessionState,
    pixel_count: Option<usize>,
    pipe: Option<PipeHandshake>,
    serial: Option<SerialCommandChannel>,
}

impl CameraLinkBackend {
    /// Create an unopened backend
    pub fn new(config: CameraLinkConfig) -> Self {
        Self {
            config,
            state: SessionState::Unopened,
            pixel_count: None,
            pipe: None,
            serial: None,
        }
    }

    /// Create a ready backend over already established channels
    pub fn from_parts(
        config: CameraLinkConfig,
        pixel_count: usize,
        pipe: PipeHandshake,
        serial: Option<SerialCommandChannel>,
    ) -> Self {
        Self {
            config,
            state: SessionState::Ready,
            pixel_count: Some(pixel_count),
            pipe: Some(pipe),
            serial,
        }
    }

    /// Backend configuration
    pub fn config(&self) -> &CameraLinkConfig {
        &self.config
    }

    /// Kill leftover grab console processes. Called from `setup` when
    /// `kill_stale_instances` is set.
    pub fn kill_stale_instances(&self) -> bool {
        process::kill_stale_instances(&self.config.image_name())
    }

    fn serial(&mut self, operation: &str) -> Result<&mut SerialCommandChannel> {
        self.state.ensure_ready()?;
        match self.serial.as_mut() {
            Some(serial) => Ok(serial),
            None => Err(DeviceError::unsupported(format!(
                "{} needs a serial link, none configured for {}",
                operation,
                self.config.ccf_path.display()
            ))),
        }
    }

    fn open_channels(&mut self) -> Result<()> {
        let pixel_count = match self.pixel_count {
            Some(pixels) => pixels,
            None => {
                let pixels = ccf::read_pixel_count(&self.config.ccf_path)?;
                self.pixel_count = Some(pixels);
                pixels
            }
        };

        info!(
            "Setup pipe device: {} {} ({} pixels)",
            self.config.executable.display(),
            self.config.ccf_path.display(),
            pixel_count
        );
        let pipe = PipeHandshake::spawn(
            &mut self.config.console_command(),
            self.config.resolved_frame_path(),
            self.config.pipe_timeout(),
        )?;
        self.pipe = Some(pipe);

        if let Some(port) = &self.config.serial_port {
            let mut serial = SerialCommandChannel::new(port.clone());
            serial.open()?;
            self.serial = Some(serial);
        }

        Ok(())
    }

    fn release_channels(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.close();
        }
        if let Some(mut serial) = self.serial.take() {
            if let Err(e) = serial.close() {
                warn!("Problem closing port: {}", e);
            }
        }
    }
}

impl DeviceSession for CameraLinkBackend {
    fn name(&self) -> &str {
        "camera_link"
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn pixel_count(&self) -> Option<usize> {
        self.pixel_count
    }

    fn setup(&mut self) -> Result<()> {
        if self.state == SessionState::Ready {
            warn!("Camera-link session already set up");
            return Ok(());
        }

        if self.config.kill_stale_instances {
            self.kill_stale_instances();
        }

        if let Err(e) = self.open_channels() {
            self.release_channels();
            return Err(e);
        }

        self.state = SessionState::Ready;
        Ok(())
    }

    fn acquire(&mut self) -> Result<Frame> {
        self.state.ensure_ready()?;
        let pixel_count = self.pixel_count.ok_or(DeviceError::NotReady { state: self.state })?;
        let pipe = self.pipe.as_mut().ok_or(PipeError::Closed)?;

        match pipe.acquire(pixel_count) {
            Ok(frame) => Ok(frame),
            Err(PipeError::Decode(e)) => Err(DeviceError::Decode(e)),
            Err(e) => Err(e.into()),
        }
    }

    fn set_gain(&mut self, value: f64) -> Result<()> {
        Ok(self.serial("set_gain")?.set_gain(value)?)
    }

    fn set_offset(&mut self, value: f64) -> Result<()> {
        Ok(self.serial("set_offset")?.set_offset(value)?)
    }

    fn scan_start(&mut self) -> Result<()> {
        Ok(self.serial("scan_start")?.start_scan()?)
    }

    fn teardown(&mut self) -> Result<()> {
        info!("Camera-link teardown");
        self.release_channels();
        self.state = SessionState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, SerialError};
    use std::collections::VecDeque;
    use std::io::{self, Cursor, Read, Write};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    const CYCLE: &str = "Press a key to trigger snap\nPress a key to trigger save\n\
        frame: 0\nFile saved, Press a key to repeat, q to quit:\n";

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u8>>>);

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct AckPort {
        written: Recorder,
        replies: VecDeque<u8>,
    }

    impl Read for AckPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.replies.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.replies.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for AckPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_config(dir: &Path) -> CameraLinkConfig {
        CameraLinkConfig {
            ccf_path: dir.join("cobra.ccf"),
            working_dir: Some(dir.to_path_buf()),
            serial_port: None,
            pipe_timeout_ms: 2000,
            kill_stale_instances: false,
            ..CameraLinkConfig::cobra()
        }
    }

    #[test]
    fn test_presets() {
        let cobra = CameraLinkConfig::cobra();
        assert_eq!(cobra.command, "grab");
        assert_eq!(cobra.index, "0");
        assert!(cobra.serial_port.is_some());
        assert_eq!(cobra.image_name(), "SapNETCSharpGrabConsole.exe");

        let basler = CameraLinkConfig::basler_sprint_4k();
        assert!(basler.serial_port.is_none());
        assert_eq!(basler.card, cobra.card);
    }

    #[test]
    fn test_frame_path_resolution() {
        let mut config = CameraLinkConfig::cobra();
        assert_eq!(config.resolved_frame_path(), PathBuf::from("test.raw"));

        config.working_dir = Some(PathBuf::from("/opt/grab"));
        assert_eq!(config.resolved_frame_path(), PathBuf::from("/opt/grab/test.raw"));

        config.frame_path = PathBuf::from("/tmp/frame.raw");
        assert_eq!(config.resolved_frame_path(), PathBuf::from("/tmp/frame.raw"));
    }

    #[test]
    fn test_operations_before_setup() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = CameraLinkBackend::new(test_config(dir.path()));

        assert!(matches!(backend.acquire(), Err(DeviceError::NotReady { .. })));
        assert!(matches!(backend.set_gain(1.0), Err(DeviceError::NotReady { .. })));
        assert!(backend.teardown().is_ok());
        assert_eq!(backend.state(), SessionState::Closed);
    }

    #[test]
    fn test_setup_without_ccf_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = CameraLinkBackend::new(test_config(dir.path()));

        assert!(matches!(backend.setup(), Err(DeviceError::Config(_))));
        assert_eq!(backend.state(), SessionState::Unopened);
        assert!(backend.teardown().is_ok());
    }

    #[test]
    fn test_setup_with_missing_console() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cobra.ccf"), "Crop Width=2048\n").unwrap();

        let mut config = test_config(dir.path());
        config.executable = dir.path().join("missing-console");
        let mut backend = CameraLinkBackend::new(config);

        assert!(matches!(
            backend.setup(),
            Err(DeviceError::Pipe(PipeError::ProcessSpawn { .. }))
        ));
        assert_eq!(backend.pixel_count(), Some(2048));
    }

    #[test]
    fn test_acquire_and_control_over_injected_channels() {
        let dir = tempfile::tempdir().unwrap();
        let frame_path = dir.path().join("test.raw");
        std::fs::write(&frame_path, Frame::new(vec![10, 20, 30, 40]).to_bytes()).unwrap();

        let console_input = Recorder::default();
        let pipe = PipeHandshake::from_streams(
            Cursor::new(CYCLE.as_bytes().to_vec()),
            console_input.clone(),
            &frame_path,
            Duration::from_secs(2),
        )
        .unwrap();

        let serial_written = Recorder::default();
        let port = AckPort {
            written: serial_written.clone(),
            // One acknowledgment: gain gets it, offset hears nothing back
            replies: b"\r<ok>\r\n".iter().copied().collect(),
        };
        let serial = SerialCommandChannel::with_transport("test", Box::new(port));

        let mut backend =
            CameraLinkBackend::from_parts(test_config(dir.path()), 4, pipe, Some(serial));

        let frame = backend.acquire().unwrap();
        assert_eq!(frame.samples(), &[10, 20, 30, 40]);

        backend.set_gain(187.0).unwrap();
        assert!(matches!(
            backend.set_offset(3.0),
            Err(DeviceError::Serial(SerialError::Timeout { .. }))
        ));

        backend.teardown().unwrap();
        let serial_text = String::from_utf8(serial_written.0.lock().unwrap().clone()).unwrap();
        assert_eq!(serial_text, "gain 187\roffset 3\r");

        let pipe_text = String::from_utf8(console_input.0.lock().unwrap().clone()).unwrap();
        assert_eq!(pipe_text, format!("\n\n\n{}", "q\n".repeat(10)));
    }

    #[test]
    fn test_missing_frame_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let console_input = Recorder::default();
        let pipe = PipeHandshake::from_streams(
            Cursor::new(CYCLE.as_bytes().to_vec()),
            console_input.clone(),
            dir.path().join("test.raw"),
            Duration::from_secs(2),
        )
        .unwrap();
        let mut backend = CameraLinkBackend::from_parts(test_config(dir.path()), 4, pipe, None);

        assert!(matches!(
            backend.acquire(),
            Err(DeviceError::Decode(DecodeError::Io { .. }))
        ));
        assert!(matches!(
            backend.acquire(),
            Err(DeviceError::Pipe(PipeError::Closed))
        ));
    }

    #[test]
    fn test_control_without_serial_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = PipeHandshake::from_streams(
            Cursor::new(Vec::new()),
            Recorder::default(),
            dir.path().join("test.raw"),
            Duration::from_millis(100),
        )
        .unwrap();
        let mut backend = CameraLinkBackend::from_parts(test_config(dir.path()), 4, pipe, None);

        assert!(matches!(backend.set_gain(1.0), Err(DeviceError::Unsupported(_))));
        assert!(matches!(backend.scan_start(), Err(DeviceError::Unsupported(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_session_with_console_process() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cobra.ccf"), "[Stream]\nCrop Width=4\n").unwrap();

        let script = dir.path().join("grab_console.sh");
        std::fs::write(
            &script,
            "n=0\n\
             while true; do\n\
               echo 'Press a key to trigger snap'\n\
               read line || exit 0\n\
               echo 'Press a key to trigger save'\n\
               read line || exit 0\n\
               printf '\\001\\000\\002\\000\\003\\000\\004\\000' > test.raw\n\
               echo \"frame: $n\"\n\
               n=$((n+1))\n\
               echo 'File saved, Press a key to repeat, q to quit:'\n\
               read line || exit 0\n\
               [ \"$line\" = q ] && exit 0\n\
             done\n",
        )
        .unwrap();

        let config = CameraLinkConfig {
            executable: PathBuf::from("/bin/sh"),
            command: script.display().to_string(),
            ..test_config(dir.path())
        };
        let mut backend = CameraLinkBackend::new(config);

        backend.setup().unwrap();
        assert_eq!(backend.state(), SessionState::Ready);
        assert_eq!(backend.pixel_count(), Some(4));

        for _ in 0..3 {
            let frame = backend.acquire().unwrap();
            assert_eq!(frame.samples(), &[1, 2, 3, 4]);
        }

        backend.teardown().unwrap();
        assert_eq!(backend.state(), SessionState::Closed);
        assert!(matches!(backend.acquire(), Err(DeviceError::NotReady { .. })));
    }
}
