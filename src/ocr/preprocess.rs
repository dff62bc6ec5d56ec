//! Challenge image preprocessing.
//!
//! A fixed menu of independent transforms turns one noisy challenge
//! bitmap into several cleaner candidates for recognition. Each method
//! sees only the shared source image, never another method's output.

use anyhow::{Result, anyhow};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};

use crate::driver::Bitmap;
use crate::ocr::engine::EngineMode;

/// Thresholds tried by the sweep method.
pub const SWEEP_THRESHOLDS: [u8; 5] = [100, 120, 140, 160, 180];

const SHARPEN_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];

/// One registered preprocessing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    /// Plain binarization at mid gray.
    Binarize,
    /// Contrast boost + sharpen + binarize.
    Contrast,
    /// Gaussian blur + binarize + median despeckle.
    Smooth,
    /// Binarization at each of [`SWEEP_THRESHOLDS`].
    ThresholdSweep,
    /// Brightness lift + binarize.
    Brighten,
}

impl VariantKind {
    pub const ALL: [VariantKind; 5] = [
        VariantKind::Binarize,
        VariantKind::Contrast,
        VariantKind::Smooth,
        VariantKind::ThresholdSweep,
        VariantKind::Brighten,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VariantKind::Binarize => "binarize",
            VariantKind::Contrast => "contrast",
            VariantKind::Smooth => "smooth",
            VariantKind::ThresholdSweep => "threshold-sweep",
            VariantKind::Brighten => "brighten",
        }
    }

    /// Engine segmentation hint this method was tuned with.
    pub fn mode(self) -> EngineMode {
        match self {
            VariantKind::Binarize => EngineMode::SingleWord,
            VariantKind::Contrast => EngineMode::SingleLine,
            VariantKind::Smooth => EngineMode::Block,
            VariantKind::ThresholdSweep => EngineMode::SingleWord,
            VariantKind::Brighten => EngineMode::SingleWord,
        }
    }
}

/// Converts a captured RGBA bitmap to grayscale.
pub fn to_gray(img: &Bitmap) -> GrayImage {
    imageops::grayscale(img)
}

/// Shared pre-step before the method menu: 2x bicubic upscale + sharpen.
/// Challenge bitmaps are small; recognition works better at double size.
pub fn prescale(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let upscaled = imageops::resize(img, w * 2, h * 2, FilterType::CatmullRom);
    imageops::filter3x3(&upscaled, &SHARPEN_KERNEL)
}

/// Fixed binarization: pixels below the threshold become black (text),
/// the rest white (background).
pub fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = ImageBuffer::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let value = if pixel[0] < threshold { 0u8 } else { 255u8 };
        output.put_pixel(x, y, Luma([value]));
    }

    output
}

/// Multiplies pixel brightness by a factor, saturating at white.
pub fn scale_brightness(img: &GrayImage, factor: f32) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = ImageBuffer::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let scaled = (pixel[0] as f32 * factor).round().min(255.0) as u8;
        output.put_pixel(x, y, Luma([scaled]));
    }

    output
}

/// 3x3 median filter, clamping at the borders. Removes salt-and-pepper
/// speckle left over from binarization.
pub fn median3(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = ImageBuffer::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let mut neighborhood = [0u8; 9];
            let mut i = 0;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = (x as i32 + dx).clamp(0, width as i32 - 1) as u32;
                    let ny = (y as i32 + dy).clamp(0, height as i32 - 1) as u32;
                    neighborhood[i] = img.get_pixel(nx, ny)[0];
                    i += 1;
                }
            }
            neighborhood.sort_unstable();
            output.put_pixel(x, y, Luma([neighborhood[4]]));
        }
    }

    output
}

/// Applies one method to the shared source image.
///
/// Most methods yield a single image; the threshold sweep yields one per
/// threshold. An error here is isolated by the caller and never aborts
/// the other methods.
pub fn apply_method(kind: VariantKind, src: &GrayImage) -> Result<Vec<GrayImage>> {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return Err(anyhow!("empty source image"));
    }

    let images = match kind {
        VariantKind::Binarize => vec![binarize(src, 128)],
        VariantKind::Contrast => {
            let boosted = imageops::contrast(src, 30.0);
            let sharpened = imageops::filter3x3(&boosted, &SHARPEN_KERNEL);
            vec![binarize(&sharpened, 140)]
        }
        VariantKind::Smooth => {
            let blurred = imageops::blur(src, 0.5);
            vec![median3(&binarize(&blurred, 120))]
        }
        VariantKind::ThresholdSweep => SWEEP_THRESHOLDS
            .iter()
            .map(|&t| binarize(src, t))
            .collect(),
        VariantKind::Brighten => vec![binarize(&scale_brightness(src, 1.2), 110)],
    };

    Ok(images)
}

/// Lazily yields each registered method's output images, in registration
/// order. The sequence is finite and can be restarted by calling again.
pub fn variants(src: &GrayImage) -> impl Iterator<Item = (VariantKind, Result<Vec<GrayImage>>)> {
    VariantKind::ALL
        .into_iter()
        .map(move |kind| (kind, apply_method(kind, src)))
}
