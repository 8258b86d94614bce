//! Debug images with the matched box drawn on the frame.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::matcher::MatchResult;
use crate::capture::Frame;

const HIGHLIGHT: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Returns a copy of the frame with a 2px rectangle around the match.
pub fn highlight_match(frame: &Frame, matched: &MatchResult) -> RgbaImage {
    let mut canvas = frame.rgba().clone();
    for inset in 0..2u32 {
        if matched.width <= inset * 2 || matched.height <= inset * 2 {
            break;
        }
        let rect = Rect::at((matched.x + inset) as i32, (matched.y + inset) as i32)
            .of_size(matched.width - inset * 2, matched.height - inset * 2);
        draw_hollow_rect_mut(&mut canvas, rect, HIGHLIGHT);
    }
    canvas
}

/// Writes the highlighted frame to `dir/<device>_<state>_<timestamp>.png`.
pub fn save_highlight(
    dir: &Path,
    device_id: &str,
    state: &str,
    frame: &Frame,
    matched: &MatchResult,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create debug directory {}", dir.display()))?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f");
    let path = dir.join(format!("{}_{}_{}.png", sanitize(device_id), sanitize(state), timestamp));

    highlight_match(frame, matched)
        .save(&path)
        .with_context(|| format!("Failed to save debug image {}", path.display()))?;
    Ok(path)
}

/// Replaces characters that are awkward in file names (adb serials contain ':').
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
