use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use crate::core::domain::{Rgb, ScoreMethod, SimilarityScore};
use crate::raster::canvas::{Canvas, luma};

const WINDOW: usize = 7;
const RADIUS: usize = WINDOW / 2;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;
const DARK_THRESHOLD: u8 = 128;

#[derive(Debug, thiserror::Error)]
pub enum ComparisonError {
    #[error("cannot read image {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {} has no pixels", .0.display())]
    Empty(PathBuf),
}

/// Blend of the structural and stroke-density signals.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendWeights {
    pub ssim: f64,
    pub density: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            ssim: crate::constants::DEFAULT_SSIM_WEIGHT,
            density: crate::constants::DEFAULT_DENSITY_WEIGHT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImageComparison {
    pub score: SimilarityScore,
    pub ssim: f64,
    pub density_ratio: f64,
    /// False-colour map of local dissimilarity; absent when nothing was compared.
    pub diff_map: Option<RgbImage>,
}

impl ImageComparison {
    fn failed(note: impl Into<String>) -> Self {
        Self {
            score: SimilarityScore::zero(ScoreMethod::Image, note),
            ssim: 0.0,
            density_ratio: 0.0,
            diff_map: None,
        }
    }
}

pub fn compare_canvases(
    reference: &Canvas,
    submission: &Canvas,
    weights: BlendWeights,
) -> ImageComparison {
    compare_luma(&reference.to_luma(), &submission.to_luma(), weights)
}

/// Either canvas missing degrades to a zero score.
pub fn compare_optional_canvases(
    reference: Option<&Canvas>,
    submission: Option<&Canvas>,
    weights: BlendWeights,
) -> ImageComparison {
    match (reference, submission) {
        (Some(r), Some(s)) => compare_canvases(r, s, weights),
        (None, _) => ImageComparison::failed("reference canvas is missing"),
        (_, None) => ImageComparison::failed("submission canvas is missing"),
    }
}

/// Compares two PNG files; unreadable files score 0 instead of failing.
#[tracing::instrument(skip(weights))]
pub fn compare_files(reference: &Path, submission: &Path, weights: BlendWeights) -> ImageComparison {
    let loaded = load_luma(reference).and_then(|r| Ok((r, load_luma(submission)?)));
    match loaded {
        Ok((r, s)) => compare_luma(&r, &s, weights),
        Err(e) => {
            tracing::warn!(%e, "image comparison degraded to zero");
            ImageComparison::failed(e.to_string())
        }
    }
}

pub fn load_luma(path: &Path) -> Result<GrayImage, ComparisonError> {
    let rgb = image::open(path)
        .map_err(|source| ComparisonError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(ComparisonError::Empty(path.to_path_buf()));
    }
    Ok(GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        image::Luma([luma(Rgb(r, g, b))])
    }))
}

/// Weighted blend of mean SSIM and the dark-pixel count ratio, in [0, 1].
pub fn compare_luma(
    reference: &GrayImage,
    submission: &GrayImage,
    weights: BlendWeights,
) -> ImageComparison {
    if reference.width() == 0
        || reference.height() == 0
        || submission.width() == 0
        || submission.height() == 0
    {
        return ImageComparison::failed("image has no pixels");
    }

    let density_ratio = density_ratio(dark_pixels(reference), dark_pixels(submission));

    // The smaller image is scaled onto the larger one so the result does not
    // depend on argument order.
    let ref_dims = (reference.width(), reference.height());
    let sub_dims = (submission.width(), submission.height());
    let (a, b) = match ref_dims.cmp(&sub_dims) {
        std::cmp::Ordering::Equal => (reference.clone(), submission.clone()),
        std::cmp::Ordering::Greater => (
            reference.clone(),
            imageops::resize(submission, ref_dims.0, ref_dims.1, FilterType::Nearest),
        ),
        std::cmp::Ordering::Less => (
            imageops::resize(reference, sub_dims.0, sub_dims.1, FilterType::Nearest),
            submission.clone(),
        ),
    };

    if a == b && ref_dims == sub_dims {
        let diff_map = jet_map(&vec![1.0; a.as_raw().len()], a.width(), a.height());
        return ImageComparison {
            score: SimilarityScore::new(1.0, ScoreMethod::Image),
            ssim: 1.0,
            density_ratio,
            diff_map: Some(diff_map),
        };
    }

    let Some(map) = ssim_map(&a, &b) else {
        let mut failed = ImageComparison::failed(format!(
            "images smaller than the {}x{} similarity window",
            WINDOW, WINDOW
        ));
        failed.density_ratio = density_ratio;
        return failed;
    };

    let ssim = mean_interior(&map, a.width() as usize, a.height() as usize);
    let blended = weights.ssim * ssim + weights.density * density_ratio;
    tracing::debug!(ssim, density_ratio, blended, "image comparison");
    ImageComparison {
        score: SimilarityScore::new(blended, ScoreMethod::Image),
        ssim,
        density_ratio,
        diff_map: Some(jet_map(&map, a.width(), a.height())),
    }
}

fn dark_pixels(img: &GrayImage) -> u64 {
    img.as_raw().iter().filter(|&&v| v < DARK_THRESHOLD).count() as u64
}

/// `min / max` of the two counts; two blank images agree perfectly.
fn density_ratio(a: u64, b: u64) -> f64 {
    match a.max(b) {
        0 => 1.0,
        max => a.min(b) as f64 / max as f64,
    }
}

/// Half-sample symmetric reflection (`d c b a | a b c d`).
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let r = if i < 0 {
        -i - 1
    } else if i >= n {
        2 * n - i - 1
    } else {
        i
    };
    r.clamp(0, n - 1) as usize
}

/// Per-pixel SSIM with a uniform 7x7 window and sample covariance. Windows
/// that cross the border see reflected pixels.
fn ssim_map(a: &GrayImage, b: &GrayImage) -> Option<Vec<f64>> {
    let (w, h) = (a.width() as usize, a.height() as usize);
    if w < WINDOW || h < WINDOW {
        return None;
    }
    let (pw, ph) = (w + 2 * RADIUS, h + 2 * RADIUS);
    let stride = pw + 1;

    // Summed-area tables of x, y, x^2, y^2 and xy over the padded frame.
    let mut sat = vec![[0.0_f64; 5]; stride * (ph + 1)];
    for py in 0..ph {
        let sy = reflect(py as isize - RADIUS as isize, h) as u32;
        let mut row = [0.0_f64; 5];
        for px in 0..pw {
            let sx = reflect(px as isize - RADIUS as isize, w) as u32;
            let x = a.get_pixel(sx, sy).0[0] as f64;
            let y = b.get_pixel(sx, sy).0[0] as f64;
            let sample = [x, y, x * x, y * y, x * y];
            for (acc, v) in row.iter_mut().zip(sample) {
                *acc += v;
            }
            let above = sat[py * stride + px + 1];
            let cell = &mut sat[(py + 1) * stride + px + 1];
            for k in 0..5 {
                cell[k] = above[k] + row[k];
            }
        }
    }

    let n = (WINDOW * WINDOW) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let mut map = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let (x1, y1, x2, y2) = (x, y, x + WINDOW, y + WINDOW);
            let mut s = [0.0_f64; 5];
            for (k, slot) in s.iter_mut().enumerate() {
                *slot = (sat[y2 * stride + x2][k] - sat[y1 * stride + x2][k]
                    - sat[y2 * stride + x1][k]
                    + sat[y1 * stride + x1][k])
                    / n;
            }
            let [ux, uy, uxx, uyy, uxy] = s;
            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);
            let num = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let den = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            map.push(num / den);
        }
    }
    Some(map)
}

/// Mean over pixels whose window lies fully inside the frame.
fn mean_interior(map: &[f64], w: usize, h: usize) -> f64 {
    let (mut sum, mut count) = (0.0, 0usize);
    for y in RADIUS..h - RADIUS {
        for x in RADIUS..w - RADIUS {
            sum += map[y * w + x];
            count += 1;
        }
    }
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Colours `255 - ssim * 255` with the JET ramp: blue where the images
/// agree, red where they differ most.
fn jet_map(map: &[f64], w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let s = map[(y * w + x) as usize].clamp(0.0, 1.0);
        let v = 1.0 - s;
        let channel = |offset: f64| {
            let c = (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
            (c * 255.0).round() as u8
        };
        image::Rgb([channel(3.0), channel(2.0), channel(1.0)])
    })
}
