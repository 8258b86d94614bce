use image::imageops::FilterType;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};
use serde::{Deserialize, Serialize};

/// How a grayscale crop is turned into black and white.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Binarize {
    /// Pixels brighter than `threshold` become white, the rest black.
    Fixed {
        threshold: u8,
        #[serde(default)]
        invert: bool,
    },
    /// Each pixel is compared with the mean of its (2r+1)² neighbourhood
    /// minus `offset`. Handles chat text over uneven backgrounds.
    Adaptive {
        block_radius: u32,
        #[serde(default)]
        offset: i16,
        #[serde(default)]
        invert: bool,
    },
}

/// Preprocessing applied to a grayscale crop before OCR.
///
/// Steps always run in this order, each one optional:
/// upscale → blur → binarize → dilate → erode.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Preprocess {
    /// Upscale factor (bicubic). Tesseract reads small UI fonts better at 2x.
    #[serde(default)]
    pub scale: Option<f32>,
    /// Gaussian blur sigma
    #[serde(default)]
    pub blur_sigma: Option<f32>,
    #[serde(default)]
    pub binarize: Option<Binarize>,
    /// Dilation radius in pixels (square structuring element)
    #[serde(default)]
    pub dilate: Option<u8>,
    /// Erosion radius in pixels (square structuring element)
    #[serde(default)]
    pub erode: Option<u8>,
}

impl Preprocess {
    /// Default for the chat box: light text on a dark panel, fixed cut at 150,
    /// inverted so tesseract sees dark text on white.
    pub fn chat() -> Self {
        Self {
            binarize: Some(Binarize::Fixed {
                threshold: 150,
                invert: true,
            }),
            ..Default::default()
        }
    }

    pub fn apply(&self, gray: &GrayImage) -> GrayImage {
        let mut img = gray.clone();

        if let Some(scale) = self.scale.filter(|s| *s > 0.0 && (*s - 1.0).abs() > f32::EPSILON) {
            let w = ((img.width() as f32 * scale).round() as u32).max(1);
            let h = ((img.height() as f32 * scale).round() as u32).max(1);
            img = image::imageops::resize(&img, w, h, FilterType::CatmullRom);
        }

        if let Some(sigma) = self.blur_sigma.filter(|s| *s > 0.0) {
            img = image::imageops::blur(&img, sigma);
        }

        match &self.binarize {
            Some(Binarize::Fixed { threshold, invert }) => {
                img = fixed_threshold(&img, *threshold, *invert);
            }
            Some(Binarize::Adaptive {
                block_radius,
                offset,
                invert,
            }) => {
                img = adaptive_threshold(&img, *block_radius, *offset, *invert);
            }
            None => {}
        }

        if let Some(k) = self.dilate.filter(|k| *k > 0) {
            img = dilate(&img, Norm::LInf, k);
        }

        if let Some(k) = self.erode.filter(|k| *k > 0) {
            img = erode(&img, Norm::LInf, k);
        }

        img
    }
}

/// Pixels above `threshold` become 255, others 0 (swapped when `invert`).
pub fn fixed_threshold(img: &GrayImage, threshold: u8, invert: bool) -> GrayImage {
    let (on, off) = if invert { (0u8, 255u8) } else { (255u8, 0u8) };
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if img.get_pixel(x, y)[0] > threshold {
            Luma([on])
        } else {
            Luma([off])
        }
    })
}

/// Local-mean threshold using a summed-area table.
///
/// A pixel is "on" when it is brighter than the neighbourhood mean minus
/// `offset`. The window is clipped at image borders.
pub fn adaptive_threshold(img: &GrayImage, block_radius: u32, offset: i16, invert: bool) -> GrayImage {
    let (w, h) = img.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let stride = wu + 1;
    let mut table = vec![0u64; stride * (hu + 1)];

    for y in 0..hu {
        let mut row = 0u64;
        for x in 0..wu {
            row += u64::from(img.get_pixel(x as u32, y as u32)[0]);
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
        }
    }

    let (on, off) = if invert { (0u8, 255u8) } else { (255u8, 0u8) };
    let r = block_radius as usize;

    GrayImage::from_fn(w, h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let x0 = x.saturating_sub(r);
        let y0 = y.saturating_sub(r);
        let x1 = (x + r + 1).min(wu);
        let y1 = (y + r + 1).min(hu);
        let sum = table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0];
        let count = ((x1 - x0) * (y1 - y0)) as f64;
        let mean = sum as f64 / count;

        let value = f64::from(img.get_pixel(x as u32, y as u32)[0]);
        if value > mean - f64::from(offset) {
            Luma([on])
        } else {
            Luma([off])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_threshold() {
        let mut img = GrayImage::new(3, 1);
        img.put_pixel(0, 0, Luma([100]));
        img.put_pixel(1, 0, Luma([151]));
        img.put_pixel(2, 0, Luma([150]));

        let result = fixed_threshold(&img, 150, false);
        assert_eq!(result.get_pixel(0, 0)[0], 0);
        assert_eq!(result.get_pixel(1, 0)[0], 255);
        assert_eq!(result.get_pixel(2, 0)[0], 0, "threshold itself is not above");

        let inverted = fixed_threshold(&img, 150, true);
        assert_eq!(inverted.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn test_chat_default_turns_bright_text_black() {
        let mut img = GrayImage::from_pixel(4, 1, Luma([40]));
        img.put_pixel(1, 0, Luma([230]));

        let out = Preprocess::chat().apply(&img);
        assert_eq!(out.get_pixel(1, 0)[0], 0, "text");
        assert_eq!(out.get_pixel(0, 0)[0], 255, "panel");
    }

    #[test]
    fn test_adaptive_threshold_separates_text_from_gradient() {
        // Horizontal gradient background with a bright 1px vertical stroke
        let img = GrayImage::from_fn(30, 10, |x, _| {
            if x == 15 {
                Luma([250])
            } else {
                Luma([(x * 4) as u8])
            }
        });

        let result = adaptive_threshold(&img, 2, 10, false);
        assert_eq!(result.get_pixel(15, 5)[0], 255);
        assert_eq!(result.get_pixel(13, 5)[0], 0);
        assert_eq!(result.get_pixel(17, 5)[0], 0);
    }

    #[test]
    fn test_scale_changes_dimensions() {
        let img = GrayImage::new(20, 10);
        let pre = Preprocess {
            scale: Some(2.0),
            ..Default::default()
        };
        assert_eq!(pre.apply(&img).dimensions(), (40, 20));
    }

    #[test]
    fn test_default_is_identity() {
        let img = GrayImage::from_fn(5, 5, |x, y| Luma([(x * 10 + y) as u8]));
        assert_eq!(Preprocess::default().apply(&img), img);
    }

    #[test]
    fn test_binarize_then_dilate_order() {
        // A single bright pixel grows into a 3x3 block after binarize + dilate
        let mut img = GrayImage::from_pixel(7, 7, Luma([10]));
        img.put_pixel(3, 3, Luma([200]));

        let pre = Preprocess {
            binarize: Some(Binarize::Fixed {
                threshold: 128,
                invert: false,
            }),
            dilate: Some(1),
            ..Default::default()
        };
        let out = pre.apply(&img);
        assert_eq!(out.get_pixel(2, 2)[0], 255);
        assert_eq!(out.get_pixel(4, 4)[0], 255);
        assert_eq!(out.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn test_preprocess_from_json() {
        let pre: Preprocess = serde_json::from_str(
            r#"{"scale":2.0,"binarize":{"kind":"adaptive","block_radius":5,"offset":2,"invert":true}}"#,
        )
        .unwrap();
        assert_eq!(pre.scale, Some(2.0));
        assert!(matches!(pre.binarize, Some(Binarize::Adaptive { block_radius: 5, .. })));
        assert_eq!(pre.dilate, None);
    }
}
