use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::OcrError;
use crate::paths::get_data_dir;

/// Environment variable that overrides the tesseract executable path.
pub const TESSERACT_ENV: &str = "TITLEWATCH_TESSERACT";

#[derive(Clone, Debug)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    /// `None` lets tesseract use its compiled-in default or `TESSDATA_PREFIX`.
    pub tessdata: Option<PathBuf>,
}

/// Directory for a bundled tesseract install.
pub fn get_tesseract_dir() -> PathBuf {
    get_data_dir().join("tesseract")
}

fn exe_name() -> &'static str {
    if cfg!(windows) { "tesseract.exe" } else { "tesseract" }
}

const COMMON_PATHS: &[&str] = &[
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
];

/// Locates tesseract and its language data.
pub fn locate_tesseract() -> Result<TesseractPaths, OcrError> {
    let executable = find_tesseract_executable()?;
    let tessdata = find_tessdata_dir(&executable);
    debug!(
        executable = %executable.display(),
        tessdata = ?tessdata.as_ref().map(|p| p.display().to_string()),
        "tesseract located"
    );
    Ok(TesseractPaths { executable, tessdata })
}

/// Finds the tesseract executable: env override, local dir, PATH, then common
/// install locations.
pub fn find_tesseract_executable() -> Result<PathBuf, OcrError> {
    if let Ok(path) = std::env::var(TESSERACT_ENV) {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
        return Err(OcrError::Engine(format!(
            "{} points to missing file {}",
            TESSERACT_ENV,
            p.display()
        )));
    }

    let local_exe = get_tesseract_dir().join(exe_name());
    if local_exe.exists() {
        return Ok(local_exe);
    }

    // Check PATH
    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    for path in COMMON_PATHS {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(OcrError::Engine(
        "Tesseract not found. Install tesseract-ocr or set TITLEWATCH_TESSERACT.".to_string(),
    ))
}

/// Finds a tessdata directory containing `eng.traineddata`.
///
/// Only the local bundle and the directory next to the executable are
/// checked; otherwise tesseract resolves its own data.
pub fn find_tessdata_dir(executable: &Path) -> Option<PathBuf> {
    let local_tessdata = get_tesseract_dir().join("tessdata");
    if local_tessdata.join("eng.traineddata").exists() {
        return Some(local_tessdata);
    }

    let beside = executable.parent()?.join("tessdata");
    beside.join("eng.traineddata").exists().then_some(beside)
}
