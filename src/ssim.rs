//! Per-pixel SSIM between two preprocessed channels.

use imgref::*;

use crate::blur::blur_in_place;
use crate::image::DssimChan;

const C1: f32 = 0.01 * 0.01;
const C2: f32 = 0.03 * 0.03;

/// Lowest SSIM a score is computed from.
///
/// Anti-correlated images have a mean SSIM at or below zero, which has no
/// DSSIM. They get the DSSIM of this value instead (999999).
const MIN_SSIM: f64 = 1e-6;

/// SSIM of every pixel of one channel at one scale.
///
/// Only produced when requested with
/// [`Dssim::set_save_ssim_maps`](crate::Dssim::set_save_ssim_maps).
#[derive(Debug, Clone)]
pub struct SimilarityMap {
    /// Dissimilarity of this channel and scale on its own
    pub dssim: f64,
    /// 1.0 means identical
    pub map: ImgVec<f32>,
}

impl SimilarityMap {
    #[must_use]
    pub fn width(&self) -> usize {
        self.map.width()
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.map.height()
    }

    /// Average SSIM over the map, summed the same way the score was.
    #[must_use]
    pub fn mean_ssim(&self) -> f64 {
        mean(self.map.as_ref())
    }
}

/// Compares one channel at one scale.
///
/// The modified side is consumed: its pixel plane holds the blurred cross
/// product, and its `mu` plane is overwritten with the returned SSIM map.
pub(crate) fn compare_channel(
    original: &DssimChan,
    modified: DssimChan,
    tmp: &mut [f32],
) -> (f64, ImgVec<f32>) {
    assert_eq!(original.width(), modified.width());
    assert_eq!(original.height(), modified.height());

    let DssimChan {
        img: mut img1_img2_blur,
        mu: mut map,
        img_sq_blur: img2_sq_blur,
        ..
    } = modified;

    for (px, orig) in img1_img2_blur.buf_mut().iter_mut().zip(original.img.pixels()) {
        *px *= orig;
    }
    blur_in_place(img1_img2_blur.as_mut(), tmp);

    for ((((out, mu1), img1_sq), img2_sq), img1_img2) in map
        .buf_mut()
        .iter_mut()
        .zip(original.mu.pixels())
        .zip(original.img_sq_blur.pixels())
        .zip(img2_sq_blur.pixels())
        .zip(img1_img2_blur.pixels())
    {
        let mu2 = *out;
        *out = ssim_pixel(mu1, mu2, img1_sq, img2_sq, img1_img2);
    }

    (mean(map.as_ref()), map)
}

// Plain arithmetic keeps identical inputs at exactly 1.0
#[inline(always)]
#[allow(clippy::suboptimal_flops)]
fn ssim_pixel(mu1: f32, mu2: f32, img1_sq_blur: f32, img2_sq_blur: f32, img1_img2_blur: f32) -> f32 {
    let mu1_sq = mu1 * mu1;
    let mu2_sq = mu2 * mu2;
    let mu1_mu2 = mu1 * mu2;
    let sigma1_sq = img1_sq_blur - mu1_sq;
    let sigma2_sq = img2_sq_blur - mu2_sq;
    let sigma12 = img1_img2_blur - mu1_mu2;

    ((2.0 * mu1_mu2 + C1) * (2.0 * sigma12 + C2))
        / ((mu1_sq + mu2_sq + C1) * (sigma1_sq + sigma2_sq + C2))
}

pub(crate) fn mean(plane: ImgRef<'_, f32>) -> f64 {
    let sum: f64 = plane.pixels().map(f64::from).sum();
    sum / (plane.width() * plane.height()) as f64
}

/// Maps an SSIM score to DSSIM. 0 means identical, larger is worse.
///
/// SSIM above 1 (possible through rounding) counts as identical; SSIM below
/// [`MIN_SSIM`] counts as [`MIN_SSIM`].
pub(crate) fn to_dssim(ssim: f64) -> f64 {
    1.0 / ssim.clamp(MIN_SSIM, 1.0) - 1.0
}
