/*!
ASCII command/acknowledgment channel on the camera's serial link.

Each command is sent with a carriage-return terminator and is considered
successful only if the short response read back contains the acknowledgment
token. Nothing is retried; retry policy belongs to the caller.
*/

use crate::error::SerialError;
use crate::protocol::{
    ACK_READ_BYTES, ACK_TOKEN, COMMAND_TERMINATOR, SERIAL_BAUD_RATE, SERIAL_TIMEOUT,
};
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Commands issued by [`SerialCommandChannel::start_scan`], in order:
/// initialize, internal trigger mode, line-scan mode.
pub const SCAN_START_SEQUENCE: [&str; 3] = ["init", "ats 0", "lsc 1"];

/// Byte stream a command channel runs over
pub trait SerialTransport: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> SerialTransport for T {}

/// Serial link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialLinkState {
    Closed,
    Open,
}

/// Command channel to the camera's serial control port
pub struct SerialCommandChannel {
    port_name: String,
    timeout: Duration,
    port: Option<Box<dyn SerialTransport>>,
}

impl SerialCommandChannel {
    /// Create a closed channel for the named port (e.g. "COM5", "/dev/ttyS4")
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            timeout: SERIAL_TIMEOUT,
            port: None,
        }
    }

    /// Create an already open channel over an arbitrary transport
    pub fn with_transport(port_name: impl Into<String>, transport: Box<dyn SerialTransport>) -> Self {
        Self {
            port_name: port_name.into(),
            timeout: SERIAL_TIMEOUT,
            port: Some(transport),
        }
    }

    /// Port name this channel talks to
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Current link state
    pub fn state(&self) -> SerialLinkState {
        if self.port.is_some() {
            SerialLinkState::Open
        } else {
            SerialLinkState::Closed
        }
    }

    /// Open the port at the fixed baud rate and timeout.
    /// Any existing connection is closed first.
    pub fn open(&mut self) -> Result<(), SerialError> {
        self.close()?;

        let port = serialport::new(&self.port_name, SERIAL_BAUD_RATE)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|source| SerialError::Open {
                port: self.port_name.clone(),
                source,
            })?;

        info!(
            "Serial port '{}' opened at {} baud",
            self.port_name, SERIAL_BAUD_RATE
        );
        self.port = Some(Box::new(port));
        Ok(())
    }

    /// Flush and release the port. Closing a closed channel is a no-op.
    pub fn close(&mut self) -> Result<(), SerialError> {
        if let Some(mut port) = self.port.take() {
            port.flush().map_err(|e| SerialError::Close {
                port: self.port_name.clone(),
                reason: e.to_string(),
            })?;
            info!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    /// Send `command` and require `expected_ack` in the first
    /// `read_byte_count` response bytes received within `timeout`.
    pub fn send(
        &mut self,
        command: &str,
        expected_ack: &str,
        read_byte_count: usize,
        timeout: Duration,
    ) -> Result<(), SerialError> {
        let port = self.port.as_mut().ok_or(SerialError::NotOpen)?;

        let mut wire = Vec::with_capacity(command.len() + 1);
        wire.extend_from_slice(command.as_bytes());
        wire.push(COMMAND_TERMINATOR);

        debug!("Send serial command [{}]", command);
        port.write_all(&wire)
            .and_then(|_| port.flush())
            .map_err(|source| {
                if source.kind() == ErrorKind::TimedOut {
                    SerialError::Timeout {
                        command: command.to_string(),
                        timeout,
                    }
                } else {
                    SerialError::Write {
                        command: command.to_string(),
                        source,
                    }
                }
            })?;

        let raw = read_response(&mut **port, command, read_byte_count, timeout)?;
        let response = String::from_utf8_lossy(&raw).into_owned();
        debug!("Serial read result [{:?}] ({})", response, hex::encode(&raw));

        if raw.is_empty() {
            return Err(SerialError::Timeout {
                command: command.to_string(),
                timeout,
            });
        }

        if !response.contains(expected_ack) {
            error!("Command failure: {}, {:?}", command, response);
            return Err(SerialError::CommandRejected {
                command: command.to_string(),
                response,
            });
        }

        Ok(())
    }

    /// Send a command expecting the standard acknowledgment
    pub fn command(&mut self, command: &str) -> Result<(), SerialError> {
        let timeout = self.timeout;
        self.send(command, ACK_TOKEN, ACK_READ_BYTES, timeout)
    }

    /// Set the analog gain
    pub fn set_gain(&mut self, gain: f64) -> Result<(), SerialError> {
        self.command(&format!("gain {}", gain))
    }

    /// Set the analog offset
    pub fn set_offset(&mut self, offset: f64) -> Result<(), SerialError> {
        self.command(&format!("offset {}", offset))
    }

    /// Put the camera in internally triggered line-scan mode.
    /// The first failing command aborts the rest of the sequence.
    pub fn start_scan(&mut self) -> Result<(), SerialError> {
        for command in SCAN_START_SEQUENCE {
            self.command(command)?;
        }
        info!("Scan started on '{}'", self.port_name);
        Ok(())
    }

    /// Open the port, send one command, and close it again
    pub fn open_write_close(&mut self, command: &str) -> Result<(), SerialError> {
        self.open()?;
        self.command_and_close(command)
    }

    /// Send one command, then close the port whatever the outcome
    fn command_and_close(&mut self, command: &str) -> Result<(), SerialError> {
        let result = self.command(command);
        let closed = self.close();
        result.and(closed)
    }
}

/// Read until `count` bytes arrived or `timeout` elapsed
fn read_response(
    port: &mut dyn SerialTransport,
    command: &str,
    count: usize,
    timeout: Duration,
) -> Result<Vec<u8>, SerialError> {
    let deadline = Instant::now() + timeout;
    let mut response = Vec::with_capacity(count);
    let mut chunk = vec![0u8; count];

    while response.len() < count && Instant::now() < deadline {
        let remaining = count - response.len();
        match port.read(&mut chunk[..remaining]) {
            Ok(0) => thread::sleep(Duration::from_millis(10)),
            Ok(n) => response.extend_from_slice(&chunk[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(source) => {
                return Err(SerialError::Read {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    const OK_REPLY: &[u8] = b"\r<ok>\r\n";

    /// In-memory port: records writes, plays back a canned response
    struct ScriptedPort {
        written: Arc<Mutex<Vec<u8>>>,
        response: VecDeque<u8>,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.response.len()).min(3);
            for slot in buf.iter_mut().take(n) {
                *slot = self.response.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted(response: &[u8]) -> (SerialCommandChannel, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let port = ScriptedPort {
            written: Arc::clone(&written),
            response: response.iter().copied().collect(),
        };
        let channel = SerialCommandChannel::with_transport("test", Box::new(port));
        (channel, written)
    }

    fn written_text(written: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(written.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_acknowledged_command() {
        let (mut channel, written) = scripted(OK_REPLY);
        channel
            .send("init", ACK_TOKEN, ACK_READ_BYTES, Duration::from_millis(200))
            .unwrap();
        assert_eq!(written_text(&written), "init\r");
    }

    #[test]
    fn test_missing_ack_is_rejected() {
        let (mut channel, _) = scripted(b"\r<er>\r\n");
        match channel.command("gain 999") {
            Err(SerialError::CommandRejected { command, response }) => {
                assert_eq!(command, "gain 999");
                assert_eq!(response, "\r<er>\r\n");
            }
            other => panic!("expected CommandRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_response_is_rejected() {
        let (mut channel, _) = scripted(b"<o");
        let result = channel.send("init", ACK_TOKEN, ACK_READ_BYTES, Duration::from_millis(50));
        assert!(matches!(result, Err(SerialError::CommandRejected { .. })));
    }

    #[test]
    fn test_silent_device_times_out() {
        let (mut channel, _) = scripted(b"");
        let result = channel.send("init", ACK_TOKEN, ACK_READ_BYTES, Duration::from_millis(50));
        assert!(matches!(result, Err(SerialError::Timeout { .. })));
    }

    #[test]
    fn test_closed_channel() {
        let mut channel = SerialCommandChannel::new("COM5");
        assert_eq!(channel.state(), SerialLinkState::Closed);
        assert!(matches!(channel.command("init"), Err(SerialError::NotOpen)));
        assert!(channel.close().is_ok());
    }

    #[test]
    fn test_gain_and_offset_formatting() {
        let mut reply = OK_REPLY.to_vec();
        reply.extend_from_slice(OK_REPLY);
        let (mut channel, written) = scripted(&reply);

        channel.set_gain(187.0).unwrap();
        channel.set_offset(-12.5).unwrap();
        assert_eq!(written_text(&written), "gain 187\roffset -12.5\r");
    }

    #[test]
    fn test_start_scan_sequence() {
        let reply = OK_REPLY.repeat(3);
        let (mut channel, written) = scripted(&reply);

        channel.start_scan().unwrap();
        assert_eq!(written_text(&written), "init\rats 0\rlsc 1\r");
    }

    #[test]
    fn test_start_scan_aborts_on_failure() {
        let mut reply = OK_REPLY.to_vec();
        reply.extend_from_slice(b"\rerror\r");
        reply.extend_from_slice(OK_REPLY);
        let (mut channel, written) = scripted(&reply);

        let result = channel.start_scan();
        assert!(matches!(
            result,
            Err(SerialError::CommandRejected { ref command, .. }) if command == "ats 0"
        ));
        assert_eq!(written_text(&written), "init\rats 0\r");
    }

    #[test]
    fn test_one_shot_command_closes_port() {
        let (mut channel, written) = scripted(OK_REPLY);
        channel.command_and_close("lsc 1").unwrap();
        assert_eq!(written_text(&written), "lsc 1\r");
        assert_eq!(channel.state(), SerialLinkState::Closed);

        // Rejected command still releases the port
        let (mut channel, _) = scripted(b"\rerror\r");
        assert!(matches!(
            channel.command_and_close("lsc 9"),
            Err(SerialError::CommandRejected { .. })
        ));
        assert_eq!(channel.state(), SerialLinkState::Closed);
    }

    #[test]
    fn test_one_shot_on_missing_port() {
        let mut channel = SerialCommandChannel::new("linescan-no-such-serial-port");
        assert!(matches!(
            channel.open_write_close("init"),
            Err(SerialError::Open { .. })
        ));
        assert_eq!(channel.state(), SerialLinkState::Closed);
    }

    #[test]
    fn test_close_releases_transport() {
        let (mut channel, _) = scripted(OK_REPLY);
        assert_eq!(channel.state(), SerialLinkState::Open);
        channel.close().unwrap();
        assert_eq!(channel.state(), SerialLinkState::Closed);
        assert!(matches!(channel.command("init"), Err(SerialError::NotOpen)));
    }
}
