/*!
# Line Grabber Application

Acquires line-scan frames from a camera-link frame grabber or one of the
synthetic backends and saves them as `.raw` files.

## Features

- Camera-link acquisition through the grab console pipe handshake
- Gain, offset and scan start over the camera serial link
- Synthetic ramp, spectrum and stored waveform backends for bench testing
- Timestamped session directories with automatic frame numbering
- Live output mode for real-time processing

## Usage

### Acquire with the configured backend
```bash
linegrab --config linegrab.toml acquire --count 100
```

### Live Output Mode (no file saving)
```bash
linegrab acquire --backend spectrum --live
```

### Generate a configuration file
```bash
linegrab config --output linegrab.toml
```
*/

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod capture;
mod config;

use capture::AcquisitionLoop;
use config::{AppConfig, BackendKind};

#[derive(Parser)]
#[command(name = "linegrab")]
#[command(about = "Line-scan frame acquisition from camera-link grabbers or synthetic backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "linegrab.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire frames
    Acquire {
        /// Backend to drive, overriding the config file
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,

        /// Number of frames; 0 runs until Ctrl+C
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Output directory for .raw files
        #[arg(short, long)]
        output_dir: Option<String>,

        /// Enable live output mode (no file saving)
        #[arg(long)]
        live: bool,

        /// Gain applied after setup
        #[arg(long, allow_negative_numbers = true)]
        gain: Option<f64>,

        /// Offset applied after setup
        #[arg(long, allow_negative_numbers = true)]
        offset: Option<f64>,

        /// Issue the scan initialization sequence after setup
        #[arg(long)]
        scan_start: bool,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "linegrab.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Live mode owns stdout, so logging stays off
    let is_live_mode = matches!(cli.command, Commands::Acquire { live: true, .. });

    if !is_live_mode {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    match cli.command {
        Commands::Acquire { backend, count, output_dir, live, gain, offset, scan_start } => {
            let mut config = load_config(&cli.config, live)?;

            if let Some(backend) = backend {
                config.device.backend = backend;
            }
            if let Some(count) = count {
                config.capture.frame_count = count;
            }
            if let Some(output_dir) = output_dir {
                config.capture.output_directory = output_dir;
            }
            if gain.is_some() {
                config.capture.gain = gain;
            }
            if offset.is_some() {
                config.capture.offset = offset;
            }
            config.capture.scan_start |= scan_start;

            run_acquire(config, live)
        }

        Commands::Config { output } => generate_config_file(output),
    }
}

/// Load the config file, falling back to defaults when it does not exist
fn load_config(path: &Path, quiet: bool) -> Result<AppConfig> {
    if !path.exists() {
        if !quiet {
            eprintln!("⚠️ No config file at {}, using defaults", path.display());
        }
        return Ok(AppConfig::new());
    }

    AppConfig::load_from_file(path)
}

/// Run the acquisition loop until done or interrupted
fn run_acquire(config: AppConfig, live: bool) -> Result<()> {
    let session = config.build_session()?;

    if !live {
        println!("🚀 Starting acquisition ({:?} backend)", config.device.backend);
        if config.capture.enable_storage {
            println!("💾 Output directory: {}", config.capture.output_directory);
        } else {
            println!("📺 Storage disabled");
        }
    }

    let mut acquisition = AcquisitionLoop::new(session, config.capture, live);

    // Set up Ctrl+C handler
    let running = acquisition.get_running_flag();
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        running.store(false, std::sync::atomic::Ordering::SeqCst);
    })?;

    let frames = acquisition.start().map_err(|e| {
        eprintln!("Acquisition failed: {:#}", e);
        e
    })?;

    if !live {
        println!("✅ Acquisition completed ({} frames)", frames);
    }
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   linegrab --config {} acquire", output_path.display());

    Ok(())
}
