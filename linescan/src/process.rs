/*!
Stale grab console cleanup.

A grab console left over from a crashed session keeps the frame grabber
card claimed, so hardware setup can kill every running instance by image
name before starting a new one.
*/

use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Images that are never grab consoles themselves. Killing by one of these
/// names would take down unrelated shells and interpreters.
const GENERIC_IMAGES: &[&str] = &[
    "sh", "bash", "dash", "zsh", "ksh", "fish", "env", "python", "python3", "perl", "ruby",
    "node", "wine", "mono", "dotnet", "cmd.exe", "powershell.exe", "pwsh", "pwsh.exe",
];

/// Check whether `image_name` is specific enough to kill by
pub fn is_killable_image(image_name: &str) -> bool {
    !image_name.is_empty()
        && !GENERIC_IMAGES
            .iter()
            .any(|generic| generic.eq_ignore_ascii_case(image_name))
}

/// Kill every running process with exactly the given executable image name.
///
/// Best-effort: the outcome is logged and returned, but "no such process"
/// is not an error worth failing setup for. Generic interpreter names are
/// refused without running anything.
pub fn kill_stale_instances(image_name: &str) -> bool {
    if !is_killable_image(image_name) {
        warn!("Refusing to kill processes by generic image name '{}'", image_name);
        return false;
    }

    let mut command = kill_command(image_name);
    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) => {
            info!("Kill {} result: {}", image_name, status);
            status.success()
        }
        Err(e) => {
            warn!("Failed to run kill command for {}: {}", image_name, e);
            false
        }
    }
}

#[cfg(windows)]
fn kill_command(image_name: &str) -> Command {
    let mut command = Command::new("taskkill");
    command.args(["/F", "/IM", image_name]);
    command
}

#[cfg(not(windows))]
fn kill_command(image_name: &str) -> Command {
    let mut command = Command::new("pkill");
    command.args(["-f", &command_line_pattern(image_name)]);
    command
}

/// Extended regex matching a command line whose program, with or without a
/// leading directory, is exactly `image_name`. The kernel process name seen
/// by `pkill -x` is truncated to 15 characters, so the full command line is
/// matched instead.
#[cfg_attr(windows, allow(dead_code))]
fn command_line_pattern(image_name: &str) -> String {
    let mut escaped = String::with_capacity(image_name.len() * 2);
    for c in image_name.chars() {
        if r"\.^$|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("^([^ ]*/)?{}( |$)", escaped)
}
