//! Screen perception for an emulator-driven game bot.
//!
//! Classifies screenshots into known UI states by template matching and
//! reads title requests out of the in-game chat with tesseract.

pub mod automation;
pub mod capture;
pub mod detection;
pub mod error;
pub mod ocr;
pub mod parse;
pub mod paths;
