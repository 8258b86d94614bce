//! Error types shared across the crate.
//!
//! Component errors are typed so that the runner can decide whether a
//! failure skips the current cycle or stops the process. Configuration
//! errors are always fatal; capture and OCR errors are transient.

use std::path::PathBuf;

use thiserror::Error;

/// Problems detected while loading or validating configuration.
/// Any of these stops the process before the polling loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("template file missing for '{name}': {path}")]
    MissingTemplateFile { name: String, path: PathBuf },

    #[error("failed to decode template '{name}' ({path}): {reason}")]
    TemplateDecode {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("threshold for '{name}' must be within [0, 1], got {value}")]
    InvalidThreshold { name: String, value: f32 },

    #[error("invalid region for '{name}': {reason}")]
    InvalidRegion { name: String, reason: String },

    #[error("cascade group '{group}' references unknown template '{template}'")]
    UnknownTemplate { group: String, template: String },

    #[error("duplicate template name '{0}'")]
    DuplicateTemplate(String),

    #[error("{0}")]
    Invalid(String),
}

/// Failures raised by the matcher.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("failed to load image: {0}")]
    ImageLoad(String),

    #[error("template '{0}' is not in the library")]
    TemplateMissing(String),
}

/// Failures talking to the capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture transport failed: {0}")]
    Transport(String),

    #[error("screenshot too small ({size} bytes, need at least {min})")]
    Undersized { size: usize, min: usize },

    #[error("failed to decode screenshot: {0}")]
    Decode(String),

    #[error("capture failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<CaptureError> },
}

/// Failures from the text extraction path.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("region {x},{y} {width}x{height} is outside the {frame_width}x{frame_height} frame")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("OCR engine failed: {0}")]
    Engine(String),

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivery failures for the event sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink transport failed: {0}")]
    Transport(String),

    #[error("sink rejected event: {0}")]
    Rejected(String),

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A tap command could not be issued.
#[derive(Debug, Error)]
#[error("tap at ({x}, {y}) failed: {reason}")]
pub struct ActuatorError {
    pub x: u32,
    pub y: u32,
    pub reason: String,
}
