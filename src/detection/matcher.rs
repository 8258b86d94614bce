//! Template matching by zero-mean normalized cross-correlation.
//!
//! The score of a template at a position is
//!
//! ```text
//!            Σ (I - mean I)(T - mean T)
//! score = -------------------------------
//!         sqrt(Σ (I - mean I)² Σ (T - mean T)²)
//! ```
//!
//! which is unaffected by a uniform brightness shift of the frame. Window
//! sums come from integral images so only the cross term is computed per
//! pixel. Every position is scored at full resolution unless a template
//! opts into the coarse search, which scans a downscaled copy first and only
//! refines around the best coarse candidates. The coarse search is faster on
//! large frames but can miss thin-line elements, so it is never the default.

use image::imageops::FilterType;
use image::GrayImage;
use serde::Serialize;
use tracing::trace;

use super::library::{TemplateEntry, TemplateLibrary};
use crate::capture::{Frame, Region};
use crate::error::MatchError;

/// Positions × template pixels above which an opted-in template is
/// searched coarse-to-fine.
const FULL_SEARCH_BUDGET: u64 = 40_000_000;

/// Coarse templates smaller than this on either side are not useful.
const MIN_COARSE_SIDE: u32 = 6;

/// Number of coarse candidates refined at full resolution.
const COARSE_CANDIDATES: usize = 4;

const EPSILON: f64 = 1e-9;

/// The best location of one template in a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchResult {
    pub template: String,
    /// Top-left corner in frame coordinates
    pub x: u32,
    pub y: u32,
    pub confidence: f32,
    pub width: u32,
    pub height: u32,
}

impl MatchResult {
    /// Matched box in frame coordinates.
    pub fn bounds(&self) -> Region {
        Region::new(self.x, self.y, self.width, self.height)
    }

    pub fn center(&self) -> (u32, u32) {
        self.bounds().center()
    }
}

/// Finds the best-scoring template that clears its own threshold.
///
/// Templates are examined in order. A later template replaces the current
/// best only with a strictly higher score, so ties go to the earlier one.
/// Returns `None` when the overall best does not reach its threshold.
pub fn match_templates(
    frame: &Frame,
    templates: &[&TemplateEntry],
) -> Result<Option<MatchResult>, MatchError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(MatchError::ImageLoad("frame has no pixels".to_string()));
    }

    let gray = frame.gray();
    let mut best: Option<(f32, MatchResult, f32)> = None;

    for entry in templates {
        let Some((x, y, score)) = best_location(gray, entry) else {
            trace!(template = %entry.name, "template does not fit search region");
            continue;
        };
        trace!(template = %entry.name, x, y, score, "template scored");

        let better = best.as_ref().map_or(true, |(s, _, _)| score > *s);
        if better {
            best = Some((
                score,
                MatchResult {
                    template: entry.name.clone(),
                    x,
                    y,
                    confidence: score,
                    width: entry.width(),
                    height: entry.height(),
                },
                entry.threshold,
            ));
        }
    }

    Ok(best.and_then(|(score, result, threshold)| (score >= threshold).then_some(result)))
}

/// Resolves template names through the library, then matches them in order.
///
/// An unknown name fails with `TemplateMissing` instead of being skipped.
pub fn match_named(
    frame: &Frame,
    library: &TemplateLibrary,
    names: &[String],
) -> Result<Option<MatchResult>, MatchError> {
    let entries = names
        .iter()
        .map(|name| library.get(name))
        .collect::<Result<Vec<_>, _>>()?;
    match_templates(frame, &entries)
}

/// Best position and score of `entry` inside its search region.
fn best_location(gray: &GrayImage, entry: &TemplateEntry) -> Option<(u32, u32, f32)> {
    let search = entry
        .region
        .unwrap_or_else(|| Region::new(0, 0, gray.width(), gray.height()))
        .clamp_to(gray.width(), gray.height());

    if search.width < entry.width() || search.height < entry.height() {
        return None;
    }

    let haystack = if search == Region::new(0, 0, gray.width(), gray.height()) {
        None
    } else {
        Some(
            image::imageops::crop_imm(gray, search.x, search.y, search.width, search.height)
                .to_image(),
        )
    };
    let haystack = haystack.as_ref().unwrap_or(gray);

    let (x, y, score) = if entry.coarse_search {
        zncc_coarse(haystack, &entry.image)?
    } else {
        zncc_best(haystack, &entry.image)?
    };
    Some((x + search.x, y + search.y, score))
}

/// Best zero-mean normalized cross-correlation of `template` in `haystack`.
///
/// Every top-left position is scored. Returns the corner and score, or
/// `None` if the template does not fit. Scores are clamped to `[-1, 1]`; a
/// flat template or window scores 0. Ties resolve to the first position in
/// raster order.
pub fn zncc_best(haystack: &GrayImage, template: &GrayImage) -> Option<(u32, u32, f32)> {
    let (hw, hh) = haystack.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > hw || th > hh {
        return None;
    }
    let searcher = Searcher::new(haystack, template);
    Some(searcher.scan(0, 0, hw - tw, hh - th))
}

/// Like [`zncc_best`], but large searches run on a downscaled copy first.
///
/// Only the best coarse candidates are refined at full resolution, so the
/// result is approximate: a fine-detailed element can lose to a bolder
/// look-alike in the coarse pass. Small searches are still exhaustive.
pub fn zncc_coarse(haystack: &GrayImage, template: &GrayImage) -> Option<(u32, u32, f32)> {
    let (hw, hh) = haystack.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > hw || th > hh {
        return None;
    }

    let positions = u64::from(hw - tw + 1) * u64::from(hh - th + 1);
    let cost = positions * u64::from(tw) * u64::from(th);

    match coarse_factor(cost, tw, th) {
        Some(factor) => coarse_to_fine(haystack, template, factor),
        None => zncc_best(haystack, template),
    }
}

/// Smallest power-of-two downscale that brings the search within budget.
fn coarse_factor(cost: u64, tw: u32, th: u32) -> Option<u32> {
    if cost <= FULL_SEARCH_BUDGET {
        return None;
    }
    let mut factor = 2u32;
    while factor <= 8 {
        if tw / factor < MIN_COARSE_SIDE || th / factor < MIN_COARSE_SIDE {
            break;
        }
        // Cost shrinks with the fourth power of the factor
        if cost / u64::from(factor).pow(4) <= FULL_SEARCH_BUDGET {
            return Some(factor);
        }
        factor *= 2;
    }
    let fallback = factor / 2;
    (fallback >= 2).then_some(fallback)
}

fn coarse_to_fine(haystack: &GrayImage, template: &GrayImage, factor: u32) -> Option<(u32, u32, f32)> {
    let (hw, hh) = haystack.dimensions();
    let (tw, th) = template.dimensions();

    let small_hay = image::imageops::resize(haystack, hw / factor, hh / factor, FilterType::Triangle);
    let small_tmpl = image::imageops::resize(template, tw / factor, th / factor, FilterType::Triangle);

    let coarse = Searcher::new(&small_hay, &small_tmpl);
    let candidates = coarse.top_candidates(COARSE_CANDIDATES, (small_tmpl.width() / 2).max(1));

    let fine = Searcher::new(haystack, template);
    let max_x = hw - tw;
    let max_y = hh - th;
    let radius = factor * 2;

    let mut best: Option<(u32, u32, f32)> = None;
    for (cx, cy) in candidates {
        let x0 = (cx * factor).saturating_sub(radius).min(max_x);
        let y0 = (cy * factor).saturating_sub(radius).min(max_y);
        let x1 = (cx * factor + radius).min(max_x);
        let y1 = (cy * factor + radius).min(max_y);
        let found = fine.scan(x0, y0, x1, y1);
        if best.map_or(true, |b| is_better(found, b)) {
            best = Some(found);
        }
    }
    best
}

/// Higher score wins; equal scores go to the earlier raster position.
fn is_better(a: (u32, u32, f32), b: (u32, u32, f32)) -> bool {
    a.2 > b.2 || (a.2 == b.2 && (a.1, a.0) < (b.1, b.0))
}

/// Precomputed state for scoring one template against one haystack.
struct Searcher<'a> {
    hay: &'a [u8],
    hay_width: usize,
    /// Integral image of pixel values, (w + 1) x (h + 1)
    sum: Vec<f64>,
    /// Integral image of squared pixel values
    sq_sum: Vec<f64>,
    /// Template with its mean removed, row-major
    tmpl: Vec<f64>,
    tmpl_width: usize,
    tmpl_height: usize,
    tmpl_norm: f64,
}

impl<'a> Searcher<'a> {
    fn new(haystack: &'a GrayImage, template: &GrayImage) -> Self {
        let (w, h) = (haystack.width() as usize, haystack.height() as usize);
        let hay = haystack.as_raw().as_slice();

        let stride = w + 1;
        let mut sum = vec![0.0f64; stride * (h + 1)];
        let mut sq_sum = vec![0.0f64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = f64::from(hay[y * w + x]);
                row += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }

        let n = f64::from(template.width() * template.height());
        let mean = template.as_raw().iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let tmpl: Vec<f64> = template.as_raw().iter().map(|&v| f64::from(v) - mean).collect();
        let tmpl_norm = tmpl.iter().map(|v| v * v).sum::<f64>().sqrt();

        Self {
            hay,
            hay_width: w,
            sum,
            sq_sum,
            tmpl,
            tmpl_width: template.width() as usize,
            tmpl_height: template.height() as usize,
            tmpl_norm,
        }
    }

    fn window(&self, table: &[f64], x: usize, y: usize) -> f64 {
        let stride = self.hay_width + 1;
        let (x1, y1) = (x + self.tmpl_width, y + self.tmpl_height);
        table[y1 * stride + x1] - table[y * stride + x1] - table[y1 * stride + x] + table[y * stride + x]
    }

    fn score(&self, x: u32, y: u32) -> f32 {
        if self.tmpl_norm < EPSILON {
            return 0.0;
        }
        let (x, y) = (x as usize, y as usize);
        let n = (self.tmpl_width * self.tmpl_height) as f64;

        let s = self.window(&self.sum, x, y);
        let sq = self.window(&self.sq_sum, x, y);
        let variance_sum = sq - s * s / n;
        if variance_sum < EPSILON {
            return 0.0;
        }

        // Σ (I - mean I)(T - mean T) == Σ I (T - mean T) since Σ (T - mean T) == 0
        let mut cross = 0.0;
        for ty in 0..self.tmpl_height {
            let hay_row = &self.hay[(y + ty) * self.hay_width + x..][..self.tmpl_width];
            let tmpl_row = &self.tmpl[ty * self.tmpl_width..][..self.tmpl_width];
            cross += hay_row
                .iter()
                .zip(tmpl_row)
                .map(|(&i, &t)| f64::from(i) * t)
                .sum::<f64>();
        }

        let score = cross / (self.tmpl_norm * variance_sum.sqrt());
        score.clamp(-1.0, 1.0) as f32
    }

    /// Exhaustive scan of top-left corners in the inclusive box.
    fn scan(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> (u32, u32, f32) {
        let mut best = (x0, y0, f32::NEG_INFINITY);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let score = self.score(x, y);
                if score > best.2 {
                    best = (x, y, score);
                }
            }
        }
        best
    }

    /// The `k` best positions, at least `spacing` apart on some axis.
    fn top_candidates(&self, k: usize, spacing: u32) -> Vec<(u32, u32)> {
        let hay_height = self.hay.len() / self.hay_width;
        let max_x = (self.hay_width - self.tmpl_width) as u32;
        let max_y = (hay_height - self.tmpl_height) as u32;

        let mut top: Vec<(u32, u32, f32)> = Vec::with_capacity(k + 1);
        for y in 0..=max_y {
            for x in 0..=max_x {
                let score = self.score(x, y);
                if top.len() == k && top.last().is_some_and(|last| score <= last.2) {
                    continue;
                }
                let near = top.iter().position(|&(cx, cy, _)| {
                    cx.abs_diff(x) < spacing && cy.abs_diff(y) < spacing
                });
                match near {
                    Some(i) if top[i].2 >= score => continue,
                    Some(i) => {
                        top.remove(i);
                    }
                    None => {}
                }
                let at = top.iter().position(|c| score > c.2).unwrap_or(top.len());
                top.insert(at, (x, y, score));
                top.truncate(k);
            }
        }
        top.into_iter().map(|(x, y, _)| (x, y)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::library::ActionTag;
    use image::{Luma, Rgba, RgbaImage};

    /// Deterministic textured pattern so templates have a unique best match.
    fn texture(x: u32, y: u32) -> u8 {
        let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
        h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
        (h >> 24) as u8 / 2 + 40
    }

    fn textured_frame(w: u32, h: u32) -> Frame {
        Frame::from_rgba(RgbaImage::from_fn(w, h, |x, y| {
            let v = texture(x, y);
            Rgba([v, v, v, 255])
        }))
    }

    fn patch_of(frame: &Frame, region: Region) -> GrayImage {
        image::imageops::crop_imm(frame.gray(), region.x, region.y, region.width, region.height)
            .to_image()
    }

    fn entry(name: &str, image: GrayImage, threshold: f32) -> TemplateEntry {
        TemplateEntry::new(name, image, threshold, None, ActionTag::Report).unwrap()
    }

    #[test]
    fn test_finds_exact_patch() {
        let frame = textured_frame(80, 60);
        let tmpl = entry("patch", patch_of(&frame, Region::new(31, 17, 12, 9)), 0.9);

        let result = match_templates(&frame, &[&tmpl]).unwrap().unwrap();

        assert_eq!((result.x, result.y), (31, 17));
        assert_eq!((result.width, result.height), (12, 9));
        assert!(result.confidence > 0.999 && result.confidence <= 1.0);
    }

    #[test]
    fn test_brightness_shift_invariant() {
        let frame = textured_frame(60, 40);
        let tmpl = entry("patch", patch_of(&frame, Region::new(10, 12, 10, 8)), 0.95);

        // Same scene, uniformly brighter (no clipping: texture stays below 170)
        let brighter = Frame::from_rgba(RgbaImage::from_fn(60, 40, |x, y| {
            let v = texture(x, y) + 60;
            Rgba([v, v, v, 255])
        }));

        let result = match_templates(&brighter, &[&tmpl]).unwrap().unwrap();
        assert_eq!((result.x, result.y), (10, 12));
        assert!(result.confidence > 0.999);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let frame = textured_frame(40, 30);
        let mut patch = patch_of(&frame, Region::new(5, 5, 8, 8));
        // Perturb the patch so the score sits strictly below 1
        for (i, p) in patch.pixels_mut().enumerate() {
            if i % 5 == 0 {
                p.0[0] = p.0[0].saturating_add(25);
            }
        }

        let open = entry("open", patch.clone(), 0.0);
        let score = match_templates(&frame, &[&open]).unwrap().unwrap().confidence;
        assert!(score < 1.0);

        let at = entry("at", patch.clone(), score);
        assert!(match_templates(&frame, &[&at]).unwrap().is_some());

        let above = entry("above", patch, f32::from_bits(score.to_bits() + 1));
        assert!(match_templates(&frame, &[&above]).unwrap().is_none());
    }

    #[test]
    fn test_tie_goes_to_earlier_template() {
        let frame = textured_frame(50, 50);
        let patch = patch_of(&frame, Region::new(20, 20, 10, 10));
        let first = entry("first", patch.clone(), 0.8);
        let second = entry("second", patch, 0.8);

        let result = match_templates(&frame, &[&first, &second]).unwrap().unwrap();
        assert_eq!(result.template, "first");
    }

    #[test]
    fn test_best_below_threshold_returns_none() {
        let frame = textured_frame(50, 50);
        // Texture sampled with a different stride never appears in the frame
        let unrelated = GrayImage::from_fn(10, 10, |x, y| Luma([texture(x + 300, y * 7 + 11)]));
        let tmpl = entry("unrelated", unrelated, 0.95);

        assert!(match_templates(&frame, &[&tmpl]).unwrap().is_none());
    }

    #[test]
    fn test_region_restricts_search() {
        let frame = textured_frame(80, 60);
        let patch = patch_of(&frame, Region::new(50, 30, 10, 10));

        let outside = TemplateEntry::new(
            "outside",
            patch.clone(),
            0.99,
            Some(Region::new(0, 0, 40, 60)),
            ActionTag::Report,
        )
        .unwrap();
        assert!(match_templates(&frame, &[&outside]).unwrap().is_none());

        let inside = TemplateEntry::new(
            "inside",
            patch,
            0.99,
            Some(Region::new(40, 20, 40, 40)),
            ActionTag::Report,
        )
        .unwrap();
        let result = match_templates(&frame, &[&inside]).unwrap().unwrap();
        assert_eq!((result.x, result.y), (50, 30));
    }

    #[test]
    fn test_template_larger_than_frame_is_skipped() {
        let frame = textured_frame(10, 10);
        let big = entry("big", GrayImage::from_pixel(20, 20, Luma([1])), 0.0);
        assert!(match_templates(&frame, &[&big]).unwrap().is_none());
    }

    #[test]
    fn test_flat_template_scores_zero() {
        let frame = textured_frame(30, 30);
        let flat = GrayImage::from_pixel(5, 5, Luma([128]));
        let (_, _, score) = zncc_best(frame.gray(), &flat).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_empty_frame_is_image_load_error() {
        let frame = Frame::from_rgba(RgbaImage::new(0, 0));
        let tmpl = entry("t", GrayImage::from_pixel(2, 2, Luma([0])), 0.5);
        assert!(matches!(
            match_templates(&frame, &[&tmpl]),
            Err(MatchError::ImageLoad(_))
        ));
    }

    #[test]
    fn test_match_named_reports_missing_template() {
        let frame = textured_frame(20, 20);
        let library = TemplateLibrary::default();
        let err = match_named(&frame, &library, &["exit".to_string()]).unwrap_err();
        assert!(matches!(err, MatchError::TemplateMissing(name) if name == "exit"));
    }

    /// 1px-wide diagonal cross, `size` square, dark on light.
    fn draw_cross(img: &mut RgbaImage, x0: u32, y0: u32, size: u32, thickness: u32) {
        for i in 0..size {
            for t in 0..thickness {
                let a = (i + t).min(size - 1);
                for (x, y) in [(x0 + i, y0 + a), (x0 + size - 1 - i, y0 + a)] {
                    img.put_pixel(x, y, Rgba([30, 30, 30, 255]));
                }
            }
        }
    }

    #[test]
    fn test_thin_icon_found_among_bold_lookalikes() {
        // Large enough that a downscaled first pass would kick in
        let mut img = RgbaImage::from_pixel(640, 360, Rgba([210, 210, 210, 255]));
        for i in 0..6 {
            draw_cross(&mut img, 60 + i * 90, 50, 21, 3);
        }
        draw_cross(&mut img, 323, 251, 21, 1);
        let frame = Frame::from_rgba(img);

        let tmpl = entry("close", patch_of(&frame, Region::new(321, 249, 25, 25)), 0.9);
        let result = match_templates(&frame, &[&tmpl]).unwrap().unwrap();

        assert_eq!((result.x, result.y), (321, 249));
        assert!(result.confidence > 0.999);
    }

    #[test]
    fn test_coarse_search_on_large_frame() {
        // Smooth blobs survive downscaling, unlike per-pixel noise
        let blob = |x: u32, y: u32| -> u8 {
            let fx = x as f32 / 23.0;
            let fy = y as f32 / 17.0;
            (128.0 + 60.0 * fx.sin() * fy.cos() + 30.0 * (fx * 0.37 + fy * 0.53).sin()) as u8
        };
        let frame = Frame::from_rgba(RgbaImage::from_fn(900, 700, |x, y| {
            let v = blob(x, y);
            Rgba([v, v, v, 255])
        }));
        let region = Region::new(613, 402, 64, 64);
        let tmpl = entry("blob", patch_of(&frame, region), 0.98).with_coarse_search(true);

        let result = match_templates(&frame, &[&tmpl]).unwrap().unwrap();
        assert_eq!((result.x, result.y), (613, 402));
    }
}
