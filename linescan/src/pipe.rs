/*!
Snap/save/next/repeat handshake with the grab console process.

The console runs a blocking prompt loop on its stdin/stdout:

1. prints "trigger snap", waits for a line, snaps a frame
2. prints "trigger save", waits for a line, saves the frame file
3. prints "frame: N"
4. prints "press a key to repeat, q to quit", waits for a line

[`PipeHandshake::acquire`] walks that loop exactly once per frame. Reading or
writing out of turn leaves both sides blocked on each other, so every read
has a deadline and any failure ends the session: the drain sequence runs and
the pipe is closed before the error is returned.

Console output is read on a dedicated thread and forwarded over a bounded
channel so that each read can be bounded with `recv_timeout`.
*/

use crate::error::PipeError;
use crate::frame::Frame;
use crate::protocol::DRAIN_COUNT;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Grace period for the console to exit on its own after the drain
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Between cycles
    Idle,
    /// Waiting for the snap prompt
    AwaitSnapEcho,
    /// Waiting for the save prompt
    AwaitSaveEcho,
    /// Waiting for the frame-saved line
    AwaitNextEcho,
    /// Frame file decoded
    FrameReady,
    /// Waiting for the repeat prompt
    AwaitRepeatEcho,
}

/// Lines from the console's stdout, forwarded by a reader thread
struct LineReader {
    rx: Receiver<io::Result<String>>,
}

impl LineReader {
    fn spawn<R: Read + Send + 'static>(source: R) -> io::Result<Self> {
        let (tx, rx) = bounded(64);

        thread::Builder::new()
            .name("grab-console-reader".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(source);
                loop {
                    // Prompt text is only logged, so any code page will do
                    let mut raw = Vec::new();
                    match reader.read_until(b'\n', &mut raw) {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&raw).into_owned();
                            if tx.send(Ok(line)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
                debug!("Grab console output closed");
            })?;

        Ok(Self { rx })
    }
}

/// Line-oriented handshake with one grab console process
pub struct PipeHandshake {
    state: HandshakeState,
    input: Option<Box<dyn Write + Send>>,
    output: Option<LineReader>,
    child: Option<Child>,
    frame_path: PathBuf,
    timeout: Duration,
    lines_read: u64,
    lines_written: u64,
    frames_completed: u64,
}

impl PipeHandshake {
    /// Start the console with piped stdin/stdout and attach to it
    pub fn spawn(
        command: &mut Command,
        frame_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, PipeError> {
        let executable = command.get_program().to_string_lossy().into_owned();
        info!("Starting grab console {}", executable);

        let spawn_error = |source| PipeError::ProcessSpawn {
            executable: executable.clone(),
            source,
        };

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_error)?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_error(io::Error::other("console stdio not captured")));
            }
        };

        match Self::from_streams(stdout, stdin, frame_path, timeout) {
            Ok(mut handshake) => {
                handshake.child = Some(child);
                Ok(handshake)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Attach to an already running console through its output and input streams
    pub fn from_streams<R, W>(
        output: R,
        input: W,
        frame_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, PipeError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let output = LineReader::spawn(output).map_err(|source| PipeError::ProcessSpawn {
            executable: "grab-console-reader".to_string(),
            source,
        })?;

        Ok(Self {
            state: HandshakeState::Idle,
            input: Some(Box::new(input)),
            output: Some(output),
            child: None,
            frame_path: frame_path.into(),
            timeout,
            lines_read: 0,
            lines_written: 0,
            frames_completed: 0,
        })
    }

    /// Current handshake state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Check whether the pipe is still attached
    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }

    /// Frame file the console writes on every save
    pub fn frame_path(&self) -> &Path {
        &self.frame_path
    }

    /// Get statistics: (lines read, lines written, frames completed)
    pub fn stats(&self) -> (u64, u64, u64) {
        (self.lines_read, self.lines_written, self.frames_completed)
    }

    /// Run one handshake cycle and decode the frame it produced.
    ///
    /// On any failure the pipe is drained and closed before returning.
    pub fn acquire(&mut self, pixel_count: usize) -> Result<Frame, PipeError> {
        if !self.is_open() {
            return Err(PipeError::Closed);
        }

        match self.run_cycle(pixel_count) {
            Ok(frame) => Ok(frame),
            Err(e) => {
                warn!("Handshake failed in {:?}: {}", self.state, e);
                self.close();
                Err(e)
            }
        }
    }

    fn run_cycle(&mut self, pixel_count: usize) -> Result<Frame, PipeError> {
        self.state = HandshakeState::AwaitSnapEcho;
        self.read_line("snap")?;
        self.write_line("snap", "\n")?;

        self.state = HandshakeState::AwaitSaveEcho;
        self.read_line("save")?;
        self.write_line("save", "\n")?;

        // The console saves and announces the frame without further input
        self.state = HandshakeState::AwaitNextEcho;
        self.read_line("next")?;

        let frame = Frame::from_file(&self.frame_path, pixel_count)?;
        self.state = HandshakeState::FrameReady;
        self.frames_completed += 1;

        self.state = HandshakeState::AwaitRepeatEcho;
        self.write_line("repeat", "\n")?;
        self.read_line("repeat")?;

        self.state = HandshakeState::Idle;
        Ok(frame)
    }

    fn read_line(&mut self, step: &'static str) -> Result<String, PipeError> {
        let output = self.output.as_ref().ok_or(PipeError::Closed)?;

        match output.rx.recv_timeout(self.timeout) {
            Ok(Ok(line)) => {
                let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();
                self.lines_read += 1;
                debug!("READ [{}] {}", step, line);
                Ok(line)
            }
            Ok(Err(e)) => Err(PipeError::ProtocolDesync {
                step,
                reason: e.to_string(),
            }),
            Err(RecvTimeoutError::Timeout) => Err(PipeError::Timeout {
                step,
                waited: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(PipeError::ProtocolDesync {
                step,
                reason: "grab console closed its output".to_string(),
            }),
        }
    }

    fn write_line(&mut self, step: &'static str, text: &str) -> Result<(), PipeError> {
        let input = self.input.as_mut().ok_or(PipeError::Closed)?;

        debug!("WR [{}] {:?}", step, text);
        input
            .write_all(text.as_bytes())
            .and_then(|_| input.flush())
            .map_err(|source| PipeError::Write { step, source })?;

        self.lines_written += 1;
        Ok(())
    }

    /// Drain and close the console.
    ///
    /// Always writes `q` [`DRAIN_COUNT`] times, reading one line after each
    /// write until a read fails. Errors are logged, never returned.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        info!("Close pipe");

        let mut reading = true;
        for i in 0..DRAIN_COUNT {
            debug!("WR q{}", i);
            if let Err(e) = self.write_line("drain", "q\n") {
                warn!("Drain write {} failed: {}", i, e);
            }

            if reading {
                if let Err(e) = self.read_line("drain") {
                    debug!("Drain read {} stopped: {}", i, e);
                    reading = false;
                }
            }
        }

        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.flush() {
                warn!("Close pipe flush failed: {}", e);
            }
        }
        self.output = None;
        self.state = HandshakeState::Idle;

        if let Some(child) = self.child.take() {
            reap(child);
        }
    }
}

impl Drop for PipeHandshake {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Wait briefly for the console to exit, then kill it
fn reap(mut child: Child) {
    let polls = 10;
    for _ in 0..polls {
        match child.try_wait() {
            Ok(Some(status)) => {
                info!("Grab console exited: {}", status);
                return;
            }
            Ok(None) => thread::sleep(EXIT_GRACE / polls),
            Err(e) => {
                warn!("Failed to query grab console status: {}", e);
                break;
            }
        }
    }

    warn!("Grab console still running after drain, killing it");
    if let Err(e) = child.kill() {
        warn!("Failed to kill grab console: {}", e);
    }
    let _ = child.wait();
}
