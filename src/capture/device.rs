//! Device access: screenshot capture and tap injection.
//!
//! The polling loop only sees the `CaptureDevice` and `Actuator` traits.
//! `AdbDevice` talks to an emulator or phone through `adb`; `FileDevice`
//! replays a screenshot from disk for one-shot tool invocations.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

use super::frame::Frame;
use crate::error::{ActuatorError, CaptureError};

/// Screenshots below this size are truncated or empty payloads.
pub const MIN_SCREENSHOT_BYTES: usize = 1024;

/// Source of screen frames for one device.
pub trait CaptureDevice {
    /// Identifier used in logs and debug file names.
    fn device_id(&self) -> &str;

    /// Captures and decodes one frame.
    fn capture(&mut self) -> Result<Frame, CaptureError>;
}

impl<T: CaptureDevice + ?Sized> CaptureDevice for Box<T> {
    fn device_id(&self) -> &str {
        (**self).device_id()
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        (**self).capture()
    }
}

/// Injects taps into one device. Fire-and-forget: callers log failures
/// and let the next cycle re-detect the state.
pub trait Actuator {
    fn tap(&mut self, x: u32, y: u32) -> Result<(), ActuatorError>;
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn tap(&mut self, x: u32, y: u32) -> Result<(), ActuatorError> {
        (**self).tap(x, y)
    }
}

/// Android device reachable through `adb -s <serial>`.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    serial: String,
    adb: PathBuf,
}

impl AdbDevice {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            adb: PathBuf::from("adb"),
        }
    }

    /// Uses a specific adb binary instead of the one on PATH.
    pub fn with_adb(mut self, adb: impl Into<PathBuf>) -> Self {
        self.adb = adb.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb);
        cmd.arg("-s").arg(&self.serial);
        cmd
    }
}

impl CaptureDevice for AdbDevice {
    fn device_id(&self) -> &str {
        &self.serial
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let output = self
            .command()
            .args(["exec-out", "screencap", "-p"])
            .output()
            .map_err(|e| CaptureError::Transport(format!("failed to run adb: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Transport(format!(
                "adb screencap exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let frame = decode_screencap(&output.stdout)?;
        debug!(
            device = %self.serial,
            bytes = output.stdout.len(),
            width = frame.width(),
            height = frame.height(),
            "captured screenshot"
        );
        Ok(frame)
    }
}

/// Decodes `screencap -p` output, rejecting truncated payloads.
fn decode_screencap(bytes: &[u8]) -> Result<Frame, CaptureError> {
    if bytes.len() < MIN_SCREENSHOT_BYTES {
        return Err(CaptureError::Undersized {
            size: bytes.len(),
            min: MIN_SCREENSHOT_BYTES,
        });
    }
    Frame::decode(bytes)
}

impl Actuator for AdbDevice {
    fn tap(&mut self, x: u32, y: u32) -> Result<(), ActuatorError> {
        let output = self
            .command()
            .args(["shell", "input", "tap"])
            .arg(x.to_string())
            .arg(y.to_string())
            .output()
            .map_err(|e| ActuatorError {
                x,
                y,
                reason: format!("failed to run adb: {}", e),
            })?;

        if !output.status.success() {
            return Err(ActuatorError {
                x,
                y,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(device = %self.serial, x, y, "tapped");
        Ok(())
    }
}

/// Reads the frame from a screenshot file on every capture.
#[derive(Debug, Clone)]
pub struct FileDevice {
    id: String,
    path: PathBuf,
}

impl FileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        Self { id, path }
    }
}

impl CaptureDevice for FileDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    /// No size floor here: saved crops can be legitimately small.
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        if !self.path.is_file() {
            return Err(CaptureError::Transport(format!(
                "{}: no such screenshot",
                self.path.display()
            )));
        }
        Frame::open(&self.path)
    }
}

/// Actuator that only records what it would have tapped.
/// Used when classifying a screenshot file with no device attached.
#[derive(Debug, Default, Clone)]
pub struct DryRunActuator {
    pub taps: Vec<(u32, u32)>,
}

impl Actuator for DryRunActuator {
    fn tap(&mut self, x: u32, y: u32) -> Result<(), ActuatorError> {
        info!(x, y, "dry run: tap suppressed");
        self.taps.push((x, y));
        Ok(())
    }
}
