use std::path::PathBuf;
use std::process::Command;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::setup::{locate_tesseract, TesseractPaths};
use crate::error::OcrError;

/// Characters that can appear in a title request line.
pub const CHAT_WHITELIST: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789#():;.,_-[]";

/// Per-call recognition options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcrOptions {
    /// Tesseract page segmentation mode. 6 = single uniform block of text.
    #[serde(default = "default_psm")]
    pub psm: u8,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Restricts recognized characters. `None` lets the engine use its full set.
    #[serde(default)]
    pub whitelist: Option<String>,
}

fn default_psm() -> u8 {
    6
}

fn default_lang() -> String {
    "eng".to_string()
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            psm: default_psm(),
            lang: default_lang(),
            whitelist: None,
        }
    }
}

impl OcrOptions {
    pub fn chat() -> Self {
        Self {
            whitelist: Some(CHAT_WHITELIST.to_string()),
            ..Default::default()
        }
    }
}

/// Turns a preprocessed grayscale image into text.
///
/// An empty string is a valid result.
pub trait OcrEngine {
    fn recognize(&self, img: &GrayImage, options: &OcrOptions) -> Result<String, OcrError>;
}

/// Tesseract run as a subprocess.
#[derive(Clone, Debug)]
pub struct Tesseract {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
}

impl Tesseract {
    pub fn new(paths: TesseractPaths) -> Self {
        Self {
            executable: paths.executable,
            tessdata: paths.tessdata,
        }
    }

    /// Locates an installed tesseract.
    pub fn locate() -> Result<Self, OcrError> {
        locate_tesseract().map(Self::new)
    }

    fn command(&self, input: &std::path::Path, options: &OcrOptions) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(input).arg("stdout");
        if let Some(tessdata) = &self.tessdata {
            cmd.arg("--tessdata-dir").arg(tessdata);
        }
        cmd.arg("-l")
            .arg(&options.lang)
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg(options.psm.to_string());
        if let Some(whitelist) = &options.whitelist {
            cmd.arg("-c").arg(format!("tessedit_char_whitelist={}", whitelist));
        }
        cmd
    }
}

impl OcrEngine for Tesseract {
    fn recognize(&self, img: &GrayImage, options: &OcrOptions) -> Result<String, OcrError> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())
            .map_err(|e| OcrError::Engine(format!("Failed to write OCR input: {}", e)))?;

        let output = self.command(temp_input.path(), options).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!("Tesseract failed: {}", stderr.trim())));
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        debug!(chars = text.len(), "tesseract finished");
        Ok(text)
    }
}
