use tracing::debug;

use super::engine::{OcrEngine, OcrOptions};
use super::preprocess::Preprocess;
use crate::capture::{Frame, Region};
use crate::error::OcrError;

/// Raw, unvalidated OCR output for one crop.
pub type RawText = String;

/// Crop → grayscale → preprocess → OCR.
pub struct TextExtractor<E> {
    engine: E,
    options: OcrOptions,
}

impl<E: OcrEngine> TextExtractor<E> {
    pub fn new(engine: E, options: OcrOptions) -> Self {
        Self { engine, options }
    }

    /// Reads the text inside `region`.
    ///
    /// `region` is in the frame's native pixel coordinates and must lie fully
    /// inside it. Finding no text returns an empty string.
    pub fn extract(&self, frame: &Frame, region: &Region, preprocess: &Preprocess) -> Result<RawText, OcrError> {
        let cropped = frame.crop(region)?;
        let prepared = preprocess.apply(cropped.gray());
        let text = self.engine.recognize(&prepared, &self.options)?;
        debug!(
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            text = %text.trim(),
            "text extracted"
        );
        Ok(text)
    }
}
