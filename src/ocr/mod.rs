//! Chat text recognition.
//!
//! Crops a frame to the chat region, runs the preprocessing pipeline and hands
//! the result to tesseract.

pub mod engine;
pub mod extract;
pub mod preprocess;
pub mod setup;

pub use engine::{OcrEngine, OcrOptions, Tesseract, CHAT_WHITELIST};
pub use extract::{RawText, TextExtractor};
pub use preprocess::{adaptive_threshold, fixed_threshold, Binarize, Preprocess};
pub use setup::{locate_tesseract, TesseractPaths};
