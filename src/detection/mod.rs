//! Screen state detection by template matching.
//!
//! This module provides:
//! - The template library loaded from the resources directory
//! - Zero-mean normalized cross-correlation matching
//! - The priority cascade that turns a frame into a `ClassifiedState`
//! - Debug images of matched regions

pub mod annotate;
pub mod classifier;
pub mod library;
pub mod matcher;

pub use annotate::{highlight_match, save_highlight};
pub use classifier::{classify, Cascade, ClassifiedState, GroupSpec, TemplateGroup, UNKNOWN_STATE};
pub use library::{load_gray, ActionTag, TemplateEntry, TemplateLibrary, TemplateSpec};
pub use matcher::{match_named, match_templates, zncc_best, zncc_coarse, MatchResult};
