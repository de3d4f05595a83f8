/*!
Acquisition loop.

Drives one device session from setup to teardown, writing every frame as a
`.raw` file in a timestamped session directory or, in live mode, as one JSON
object per line on stdout.
*/

use crate::config::CaptureConfig;
use anyhow::{Context, Result};
use chrono::Local;
use linescan::{DeviceSession, Frame};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Runs a device session until the frame count is reached or the running
/// flag is cleared. Each run creates a timestamped subdirectory.
pub struct AcquisitionLoop {
    session: Box<dyn DeviceSession>,
    settings: CaptureConfig,
    session_dir: PathBuf,
    save_files: bool,
    live_output: bool,
    running: Arc<AtomicBool>,
}

impl AcquisitionLoop {
    /// Create a new loop; live output disables file storage
    pub fn new(session: Box<dyn DeviceSession>, settings: CaptureConfig, live_output: bool) -> Self {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let save_files = settings.enable_storage && !live_output;

        let session_dir = if save_files {
            Path::new(&settings.output_directory).join(&timestamp)
        } else {
            PathBuf::from(&settings.output_directory)
        };

        if save_files {
            info!("📁 Capture session timestamp: {}", timestamp);
            info!("📁 Files will be saved to: {}", session_dir.display());
        }

        Self {
            session,
            settings,
            session_dir,
            save_files,
            live_output,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get a reference to the running flag for external control
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Directory frame files are written to
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// The driven session
    pub fn session(&self) -> &dyn DeviceSession {
        self.session.as_ref()
    }

    /// Run the session. Teardown always runs, even when setup or an
    /// acquisition fails. Returns the number of frames acquired.
    pub fn start(&mut self) -> Result<u64> {
        let result = self.run_session();

        if let Err(e) = self.session.teardown() {
            warn!("Teardown of {} failed: {}", self.session.name(), e);
        }

        result
    }

    fn run_session(&mut self) -> Result<u64> {
        let name = self.session.name().to_string();

        self.session
            .setup()
            .with_context(|| format!("Failed to set up {} device", name))?;
        self.apply_settings()?;

        if self.save_files {
            std::fs::create_dir_all(&self.session_dir).with_context(|| {
                format!("Failed to create capture directory: {}", self.session_dir.display())
            })?;
            info!("📁 Created capture directory: {}", self.session_dir.display());
        }

        let interval = Duration::from_millis(self.settings.frame_interval_ms);
        let limit = self.settings.frame_count;
        let start_time = Instant::now();
        let mut frame_counter = 0u64;
        let mut file_write_errors = 0u64;

        info!("📝 Acquisition started (device: {}, save_files: {}, live_output: {})",
              name, self.save_files, self.live_output);

        while self.running.load(Ordering::SeqCst) && (limit == 0 || frame_counter < limit) {
            let frame = self
                .session
                .acquire()
                .with_context(|| format!("Acquisition {} failed", frame_counter))?;

            if self.live_output {
                Self::output_live_frame(&mut io::stdout().lock(), &frame, frame_counter)?;
            }

            if self.save_files {
                let filename = self.session_dir.join(format!("{:08X}.raw", frame_counter));
                match std::fs::write(&filename, frame.to_bytes()) {
                    Ok(_) => {
                        info!("✅ Completed frame file: {} ({} pixels, mean {:.1})",
                              filename.display(), frame.len(), frame.mean());
                    }
                    Err(e) => {
                        error!("❌ Failed to write frame file {}: {}", filename.display(), e);
                        file_write_errors += 1;
                    }
                }
            }

            frame_counter += 1;

            if !interval.is_zero() {
                thread::sleep(interval);
            }
        }

        let elapsed = start_time.elapsed();
        info!("📊 Acquisition final stats:");
        info!("   Frames acquired: {}", frame_counter);
        info!("   File write errors: {}", file_write_errors);
        info!("   Duration: {:.1}s", elapsed.as_secs_f64());

        Ok(frame_counter)
    }

    /// Push the configured gain, offset and scan start to the device
    fn apply_settings(&mut self) -> Result<()> {
        if let Some(gain) = self.settings.gain {
            self.session
                .set_gain(gain)
                .with_context(|| format!("Failed to set gain {}", gain))?;
            info!("Gain set to {}", gain);
        }
        if let Some(offset) = self.settings.offset {
            self.session
                .set_offset(offset)
                .with_context(|| format!("Failed to set offset {}", offset))?;
            info!("Offset set to {}", offset);
        }
        if self.settings.scan_start {
            self.session.scan_start().context("Failed to start scan")?;
            info!("Scan started");
        }
        Ok(())
    }

    /// Write one frame as a JSON line for live processing
    fn output_live_frame<W: Write>(out: &mut W, frame: &Frame, frame_counter: u64) -> Result<()> {
        let json_output = serde_json::json!({
            "frame_number": frame_counter,
            "pixel_count": frame.len(),
            "mean": frame.mean(),
            "samples": frame.samples(),
        });

        writeln!(out, "{}", json_output)?;
        out.flush()?;
        Ok(())
    }
}
