#![deny(clippy::all)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::inline_always)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::exit)]
#![warn(clippy::float_cmp_const)]
#![warn(clippy::if_then_some_else_none)]
#![warn(clippy::lossy_float_literal)]
#![warn(clippy::map_err_ignore)]
#![warn(clippy::mem_forget)]
#![warn(clippy::mod_module_files)]
#![warn(clippy::multiple_inherent_impl)]
#![warn(clippy::rest_pat_in_fully_bound_structs)]
#![warn(clippy::same_name_method)]
#![warn(clippy::str_to_string)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(clippy::unnecessary_self_imports)]
#![warn(clippy::unneeded_field_pattern)]
#![warn(clippy::use_debug)]

mod blur;
mod error;
mod gamma;
mod image;
mod lab;
mod ssim;

use tracing::{debug, trace, warn};

pub use blur::{blur, blur_in_place};
pub use error::DssimError;
pub use gamma::{GammaTable, SRGB_GAMMA};
pub use crate::image::{DssimImage, RowSource};
pub use imgref::{Img, ImgRef, ImgVec};
pub use lab::{ColorType, PixelConverter};
pub use rgb::{RGB8, RGBA8};
pub use ssim::SimilarityMap;

use lab::PixelRows;
use ssim::to_dssim;

/// Upper limit for [`Dssim::set_scales`].
pub const MAX_SCALES: usize = 5;

/// Weight of each scale, finest first.
pub const DEFAULT_WEIGHTS: [f64; MAX_SCALES] = [0.0448, 0.2856, 0.3001, 0.2363, 0.1333];

const DEFAULT_SCALES: usize = 4;
const DEFAULT_COLOR_WEIGHT: f64 = 0.95;

/// Comparison settings, plus a scratch buffer reused between calls.
///
/// A `Dssim` is not meant to be shared between threads while in use; give
/// each thread its own.
#[derive(Debug, Clone)]
pub struct Dssim {
    scale_weights: Vec<f64>,
    subsample_chroma: bool,
    color_weight: f64,
    save_maps_scales: usize,
    save_maps_channels: usize,
    ssim_maps: Vec<(usize, usize, SimilarityMap)>,
    tmp: Vec<f32>,
}

impl Default for Dssim {
    fn default() -> Self {
        Self {
            scale_weights: DEFAULT_WEIGHTS[..DEFAULT_SCALES].to_vec(),
            subsample_chroma: true,
            color_weight: DEFAULT_COLOR_WEIGHT,
            save_maps_scales: 0,
            save_maps_channels: 0,
            ssim_maps: Vec::new(),
            tmp: Vec::new(),
        }
    }
}

impl Dssim {
    /// Four scales, chroma subsampled and weighted at 0.95, no maps saved.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many scales images get and how much each one counts.
    ///
    /// `count` is clamped to `1..=MAX_SCALES`. Weights need not add up to 1.
    /// Scales without a weight in `weights` use [`DEFAULT_WEIGHTS`], extra
    /// weights are ignored.
    ///
    /// Only affects images created afterwards.
    ///
    /// # Errors
    /// - If a weight is negative or not finite, or all weights are zero
    pub fn set_scales(&mut self, count: usize, weights: Option<&[f64]>) -> Result<(), DssimError> {
        let count = count.clamp(1, MAX_SCALES);
        let mut scale_weights = DEFAULT_WEIGHTS[..count].to_vec();
        if let Some(weights) = weights {
            for (out, &w) in scale_weights.iter_mut().zip(weights) {
                *out = w;
            }
        }

        if !scale_weights.iter().copied().all(valid_weight)
            || scale_weights.iter().all(|&w| w <= 0.0)
        {
            return Err(DssimError::InvalidWeights);
        }

        self.scale_weights = scale_weights;
        Ok(())
    }

    #[must_use]
    pub fn scale_weights(&self) -> &[f64] {
        &self.scale_weights
    }

    /// Chooses whether chroma is compared at half resolution, and how much
    /// chroma counts relative to luma.
    ///
    /// # Errors
    /// - If `color_weight` is negative or not finite
    pub fn set_color_handling(
        &mut self,
        subsample_chroma: bool,
        color_weight: f64,
    ) -> Result<(), DssimError> {
        if !valid_weight(color_weight) {
            return Err(DssimError::InvalidWeights);
        }
        self.subsample_chroma = subsample_chroma;
        self.color_weight = color_weight;
        Ok(())
    }

    #[must_use]
    pub const fn subsample_chroma(&self) -> bool {
        self.subsample_chroma
    }

    #[must_use]
    pub const fn color_weight(&self) -> f64 {
        self.color_weight
    }

    /// Keeps per-pixel SSIM maps of the first `num_scales` scales of the
    /// first `num_channels` channels during the next comparisons.
    ///
    /// Retrieve them with [`Dssim::take_ssim_map`].
    pub fn set_save_ssim_maps(&mut self, num_scales: usize, num_channels: usize) {
        self.save_maps_scales = num_scales;
        self.save_maps_channels = num_channels;
    }

    /// Hands over a map saved by the last [`Dssim::compare`].
    ///
    /// Returns `None` if it was not requested, not computed, or already taken.
    pub fn take_ssim_map(&mut self, scale: usize, channel: usize) -> Option<SimilarityMap> {
        let pos = self
            .ssim_maps
            .iter()
            .position(|&(s, c, _)| s == scale && c == channel)?;
        Some(self.ssim_maps.swap_remove(pos).2)
    }

    /// Converts a packed 8-bit buffer and builds its image pyramid.
    ///
    /// `gamma` is only used by color types that need linearizing (see
    /// [`ColorType::uses_gamma`]); pass [`SRGB_GAMMA`] for sRGB input.
    ///
    /// # Errors
    /// - If `pixels` is shorter than `width * height` pixels of `color_type`
    /// - If `gamma` is invalid
    /// - If the image is empty or cannot be allocated
    pub fn create_image(
        &mut self,
        pixels: &[u8],
        color_type: ColorType,
        width: usize,
        height: usize,
        gamma: f64,
    ) -> Result<DssimImage, DssimError> {
        let rows = PixelRows::from_bytes(pixels, color_type, width, height, gamma)?;
        self.create_image_from_rows(&rows)
    }

    /// Builds the image pyramid of an RGB image. Rows may be strided.
    ///
    /// # Errors
    /// - If `gamma` is invalid
    /// - If the image is empty or cannot be allocated
    pub fn create_image_rgb(
        &mut self,
        img: ImgRef<'_, RGB8>,
        gamma: f64,
    ) -> Result<DssimImage, DssimError> {
        let rows = PixelRows::Rgb(img, PixelConverter::new(GammaTable::new(gamma)?));
        self.create_image_from_rows(&rows)
    }

    /// Builds the image pyramid of an RGBA image (alpha not premultiplied).
    /// Rows may be strided.
    ///
    /// # Errors
    /// - If `gamma` is invalid
    /// - If the image is empty or cannot be allocated
    pub fn create_image_rgba(
        &mut self,
        img: ImgRef<'_, RGBA8>,
        gamma: f64,
    ) -> Result<DssimImage, DssimError> {
        let rows = PixelRows::Rgba(img, PixelConverter::new(GammaTable::new(gamma)?));
        self.create_image_from_rows(&rows)
    }

    fn create_image_from_rows(&mut self, rows: &PixelRows<'_>) -> Result<DssimImage, DssimError> {
        let mut source = |channels: &mut [&mut [f32]], y: usize| rows.write_row(channels, y);
        DssimImage::new(
            rows.num_channels(),
            rows.width(),
            rows.height(),
            self.scale_weights.len(),
            self.subsample_chroma,
            &mut source,
            &mut self.tmp,
        )
    }

    /// Builds an image pyramid from rows produced by `source`.
    ///
    /// Channel 0 is luma, channels 1 and 2 (if present) are chroma. Rows are
    /// requested in order, once each.
    ///
    /// # Errors
    /// - If `num_channels` is not 1 or 3
    /// - If the image is empty or cannot be allocated
    pub fn create_image_from_callback<S: RowSource>(
        &mut self,
        num_channels: usize,
        width: usize,
        height: usize,
        mut source: S,
    ) -> Result<DssimImage, DssimError> {
        DssimImage::new(
            num_channels,
            width,
            height,
            self.scale_weights.len(),
            self.subsample_chroma,
            &mut source,
            &mut self.tmp,
        )
    }

    /// Computes the DSSIM between `original` and `modified`. 0 means
    /// identical.
    ///
    /// `modified` is consumed; `original` can be compared again. Maps from
    /// the previous comparison are discarded.
    ///
    /// # Errors
    /// - If the images are not the same size
    /// - If every scale weight in use is zero
    pub fn compare(&mut self, original: &DssimImage, modified: DssimImage) -> Result<f64, DssimError> {
        if original.width() != modified.width() || original.height() != modified.height() {
            return Err(DssimError::NonMatchingImageDimensions {
                original: (original.width(), original.height()),
                modified: (modified.width(), modified.height()),
            });
        }

        self.ssim_maps.clear();

        let mut ssim_sum = 0.0;
        let mut weight_sum = 0.0;

        for (ch, (orig_chan, mod_chan)) in original.channels.iter().zip(modified.channels).enumerate() {
            for (n, ((orig_scale, mod_scale), &scale_weight)) in orig_chan
                .scales
                .iter()
                .zip(mod_chan.scales)
                .zip(&self.scale_weights)
                .enumerate()
            {
                let channel_weight = if orig_scale.is_chroma {
                    self.color_weight
                } else {
                    1.0
                };
                let weight = channel_weight * scale_weight;
                weight_sum += weight;

                let size = (orig_scale.width(), orig_scale.height());
                let mod_size = (mod_scale.width(), mod_scale.height());
                if size != mod_size {
                    debug_assert_eq!(size, mod_size, "channel {} scale {}", ch, n);
                    warn!(
                        channel = ch,
                        scale = n,
                        ?size,
                        ?mod_size,
                        "scale sizes differ, counting it as dissimilar"
                    );
                    continue;
                }

                let tmp = crate::image::scratch(&mut self.tmp, size.0 * size.1)?;
                let (ssim, map) = ssim::compare_channel(orig_scale, mod_scale, tmp);
                trace!(channel = ch, scale = n, ssim, weight, "compared");
                ssim_sum += weight * ssim;

                if n < self.save_maps_scales && ch < self.save_maps_channels {
                    self.ssim_maps.push((
                        n,
                        ch,
                        SimilarityMap {
                            dssim: to_dssim(ssim),
                            map,
                        },
                    ));
                }
            }
        }

        if weight_sum <= 0.0 {
            return Err(DssimError::InvalidWeights);
        }

        let ssim = ssim_sum / weight_sum;
        let dssim = to_dssim(ssim);
        debug!(ssim, dssim, "comparison done");
        Ok(dssim)
    }
}

fn valid_weight(w: f64) -> bool {
    w.is_finite() && w >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{GrayImage, Luma, Rgba, RgbaImage};
    use num_traits::clamp;
    use rand::Rng;

    fn random_pixels(len: usize) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        (0..len).map(|_| rng.gen()).collect()
    }

    fn distort(pixels: &[u8], amount: i16) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        pixels
            .iter()
            .map(|&v| clamp(i16::from(v) + rng.gen_range(-amount..=amount), 0, 255) as u8)
            .collect()
    }

    fn constant_lab(values: [f32; 3]) -> impl FnMut(&mut [&mut [f32]], usize) {
        move |channels: &mut [&mut [f32]], _y: usize| {
            for (row, &v) in channels.iter_mut().zip(&values) {
                row.fill(v);
            }
        }
    }

    #[test]
    fn identical_images_score_zero() -> anyhow::Result<()> {
        let (width, height) = (41, 29);
        let color_types = [
            ColorType::Gray,
            ColorType::Rgb,
            ColorType::Rgba,
            ColorType::Luma,
            ColorType::Lab,
            ColorType::RgbaToGray,
        ];
        let mut attr = Dssim::new();

        for color_type in color_types {
            for gamma in [SRGB_GAMMA, 0.45455] {
                let pixels = random_pixels(width * height * color_type.bytes_per_pixel());
                let original = attr.create_image(&pixels, color_type, width, height, gamma)?;
                let modified = attr.create_image(&pixels, color_type, width, height, gamma)?;
                let dssim = attr.compare(&original, modified)?;
                assert!(dssim.abs() < 1e-6, "{:?} {} -> {}", color_type, gamma, dssim);
            }
        }
        Ok(())
    }

    #[test]
    fn identical_callback_images_score_zero() -> anyhow::Result<()> {
        let mut attr = Dssim::new();
        let original = attr.create_image_from_callback(3, 20, 20, constant_lab([0.3, 0.5, 0.6]))?;
        let modified = attr.create_image_from_callback(3, 20, 20, constant_lab([0.3, 0.5, 0.6]))?;
        assert!(attr.compare(&original, modified)?.abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn dssim_grows_with_offset() -> anyhow::Result<()> {
        let mut attr = Dssim::new();
        let original = attr.create_image_from_callback(3, 32, 32, constant_lab([0.3, 0.5, 0.5]))?;

        let mut prev = 0.0;
        for step in 0..=10 {
            let delta = step as f32 * 0.1;
            let modified =
                attr.create_image_from_callback(3, 32, 32, constant_lab([0.3 + delta, 0.5, 0.5]))?;
            let dssim = attr.compare(&original, modified)?;
            assert!(dssim >= prev, "delta {}: {} < {}", delta, dssim, prev);
            prev = dssim;
        }
        assert!(prev > 0.0);
        Ok(())
    }

    #[test]
    fn more_noise_scores_worse() -> anyhow::Result<()> {
        let (width, height) = (64, 64);
        let pixels = random_pixels(width * height * 3);
        let mut attr = Dssim::new();
        let original = attr.create_image(&pixels, ColorType::Rgb, width, height, SRGB_GAMMA)?;

        let slight = attr.create_image(&distort(&pixels, 4), ColorType::Rgb, width, height, SRGB_GAMMA)?;
        let heavy = attr.create_image(&distort(&pixels, 64), ColorType::Rgb, width, height, SRGB_GAMMA)?;
        let slight = attr.compare(&original, slight)?;
        let heavy = attr.compare(&original, heavy)?;
        assert!(slight > 0.0);
        assert!(heavy > slight, "{} <= {}", heavy, slight);
        Ok(())
    }

    #[test]
    fn score_is_weighted_mean_of_maps() -> anyhow::Result<()> {
        let (width, height) = (64, 48);
        let pixels = random_pixels(width * height * 3);
        let mut attr = Dssim::new();
        attr.set_save_ssim_maps(MAX_SCALES, 3);

        let original = attr.create_image(&pixels, ColorType::Rgb, width, height, SRGB_GAMMA)?;
        let modified =
            attr.create_image(&distort(&pixels, 20), ColorType::Rgb, width, height, SRGB_GAMMA)?;
        let dssim = attr.compare(&original, modified)?;

        let mut ssim_sum = 0.0;
        let mut weight_sum = 0.0;
        for ch in 0..original.num_channels() {
            for scale in 0..original.num_scales(ch) {
                let map = attr.take_ssim_map(scale, ch).expect("map was requested");
                let channel_weight = if ch > 0 { attr.color_weight() } else { 1.0 };
                let weight = channel_weight * attr.scale_weights()[scale];
                ssim_sum += weight * map.mean_ssim();
                weight_sum += weight;
            }
        }
        let expected = 1.0 / (ssim_sum / weight_sum) - 1.0;
        assert!((dssim - expected).abs() < 1e-6, "{} vs {}", dssim, expected);
        Ok(())
    }

    #[test]
    fn transparency_is_composited() -> anyhow::Result<()> {
        let opaque = RgbaImage::from_fn(16, 16, |_, _| Rgba([100, 150, 200, 255]));
        let transparent = RgbaImage::from_fn(16, 16, |_, _| Rgba([100, 150, 200, 0]));

        let mut attr = Dssim::new();
        let original = attr.create_image(opaque.as_raw(), ColorType::Rgba, 16, 16, SRGB_GAMMA)?;
        let modified =
            attr.create_image(transparent.as_raw(), ColorType::Rgba, 16, 16, SRGB_GAMMA)?;
        assert!(attr.compare(&original, modified)? > 0.0);

        let original =
            attr.create_image(opaque.as_raw(), ColorType::RgbaToGray, 16, 16, SRGB_GAMMA)?;
        let modified =
            attr.create_image(transparent.as_raw(), ColorType::RgbaToGray, 16, 16, SRGB_GAMMA)?;
        assert!(attr.compare(&original, modified)? > 0.0);
        Ok(())
    }

    #[test]
    fn smallest_gray_rgba_image() -> anyhow::Result<()> {
        let gray = RgbaImage::from_fn(8, 8, |_, _| Rgba([128, 128, 128, 255]));
        let mut attr = Dssim::new();
        let original = attr.create_image(gray.as_raw(), ColorType::Rgba, 8, 8, SRGB_GAMMA)?;
        let modified = attr.create_image(gray.as_raw(), ColorType::Rgba, 8, 8, SRGB_GAMMA)?;
        assert_eq!(original.num_scales(0), 1);
        assert_eq!(original.scale_size(1, 0), Some((4, 4)));
        assert!(attr.compare(&original, modified)?.abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn dimension_mismatch() {
        let mut attr = Dssim::new();
        let big = random_pixels(100 * 100 * 3);
        let original = attr
            .create_image(&big, ColorType::Rgb, 100, 100, SRGB_GAMMA)
            .unwrap();
        let modified = attr
            .create_image(&big[..100 * 50 * 3], ColorType::Rgb, 100, 50, SRGB_GAMMA)
            .unwrap();

        let err = attr.compare(&original, modified).unwrap_err();
        assert!(matches!(
            err,
            DssimError::NonMatchingImageDimensions {
                original: (100, 100),
                modified: (100, 50),
            }
        ));
    }

    #[test]
    fn ssim_map_round_trip() -> anyhow::Result<()> {
        let (width, height) = (37, 23);
        let gray = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            Luma([((x * 7 + y * 3) % 256) as u8])
        });
        let noisy = distort(gray.as_raw(), 30);

        let mut attr = Dssim::new();
        attr.set_save_ssim_maps(1, 1);
        let original = attr.create_image(gray.as_raw(), ColorType::Gray, width, height, SRGB_GAMMA)?;
        let modified = attr.create_image(&noisy, ColorType::Gray, width, height, SRGB_GAMMA)?;
        attr.compare(&original, modified)?;

        let map = attr.take_ssim_map(0, 0).expect("map was requested");
        assert_eq!((map.width(), map.height()), (width, height));
        assert_eq!(map.map.buf().len(), width * height);
        assert!(map.dssim > 0.0);
        assert!((map.mean_ssim() - 1.0 / (1.0 + map.dssim)).abs() < 1e-9);

        assert!(attr.take_ssim_map(0, 0).is_none());
        assert!(attr.take_ssim_map(1, 0).is_none());
        Ok(())
    }

    #[test]
    fn original_can_be_reused() -> anyhow::Result<()> {
        let (width, height) = (30, 30);
        let pixels = random_pixels(width * height * 4);
        let noisy = distort(&pixels, 10);
        let mut attr = Dssim::new();
        let original = attr.create_image(&pixels, ColorType::Rgba, width, height, SRGB_GAMMA)?;

        let first = attr.create_image(&noisy, ColorType::Rgba, width, height, SRGB_GAMMA)?;
        let second = attr.create_image(&noisy, ColorType::Rgba, width, height, SRGB_GAMMA)?;
        let a = attr.compare(&original, first)?;
        let b = attr.compare(&original, second)?;
        assert_eq!(a.to_bits(), b.to_bits());
        Ok(())
    }

    #[test]
    fn fewer_channels_compares_luma_only() -> anyhow::Result<()> {
        let mut attr = Dssim::new();
        let color = attr.create_image_from_callback(3, 16, 16, constant_lab([0.4, 0.1, 0.9]))?;
        let gray = attr.create_image_from_callback(1, 16, 16, constant_lab([0.4, 0.0, 0.0]))?;
        assert!(attr.compare(&color, gray)?.abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut attr = Dssim::new();
        let err = attr
            .create_image(&[0u8; 10], ColorType::Rgb, 2, 2, SRGB_GAMMA)
            .unwrap_err();
        assert!(matches!(
            err,
            DssimError::InvalidBufferSize {
                expected: 12,
                actual: 10
            }
        ));
    }

    #[test]
    fn invalid_gamma_is_rejected() {
        let mut attr = Dssim::new();
        let err = attr
            .create_image(&[0u8; 16], ColorType::Gray, 4, 4, 2.2)
            .unwrap_err();
        assert!(matches!(err, DssimError::InvalidGamma(_)));

        // raw luma and Lab ignore gamma
        assert!(attr.create_image(&[0u8; 16], ColorType::Luma, 4, 4, 2.2).is_ok());
        assert!(attr.create_image(&[0u8; 48], ColorType::Lab, 4, 4, f64::NAN).is_ok());

        let rgb = ImgVec::new(vec![RGB8::new(1, 2, 3); 16], 4, 4);
        assert!(matches!(
            attr.create_image_rgb(rgb.as_ref(), 1.5),
            Err(DssimError::InvalidGamma(_))
        ));
    }

    #[test]
    fn overflowing_size_is_rejected() {
        let mut attr = Dssim::new();
        let err = attr
            .create_image_from_callback(1, usize::MAX / 2, 4, constant_lab([0.0; 3]))
            .unwrap_err();
        assert!(matches!(err, DssimError::InvalidImageSize { .. }));

        let err = attr
            .create_image(&[], ColorType::Rgba, usize::MAX / 2, 4, SRGB_GAMMA)
            .unwrap_err();
        assert!(matches!(err, DssimError::InvalidImageSize { .. }));
    }

    #[test]
    fn inverse_image_is_very_dissimilar() -> anyhow::Result<()> {
        let (width, height) = (64, 64);
        let pixels = random_pixels(width * height);
        let inverse: Vec<u8> = pixels.iter().map(|&v| 255 - v).collect();

        let mut attr = Dssim::new();
        let original = attr.create_image(&pixels, ColorType::Luma, width, height, SRGB_GAMMA)?;
        let modified = attr.create_image(&inverse, ColorType::Luma, width, height, SRGB_GAMMA)?;
        let dssim = attr.compare(&original, modified)?;
        assert!(dssim.is_finite() && dssim > 1.0, "{}", dssim);
        Ok(())
    }

    #[test]
    fn typed_pixels_match_bytes() -> anyhow::Result<()> {
        let (width, height) = (24, 20);
        let bytes = random_pixels(width * height * 4);
        let noisy = distort(&bytes, 12);
        let rgba = |b: &[u8]| -> Vec<RGBA8> {
            b.chunks_exact(4)
                .map(|px| RGBA8::new(px[0], px[1], px[2], px[3]))
                .collect()
        };

        let mut attr = Dssim::new();
        let from_bytes = {
            let original = attr.create_image(&bytes, ColorType::Rgba, width, height, SRGB_GAMMA)?;
            let modified = attr.create_image(&noisy, ColorType::Rgba, width, height, SRGB_GAMMA)?;
            attr.compare(&original, modified)?
        };
        let typed = {
            let original = ImgVec::new(rgba(&bytes), width, height);
            let modified = ImgVec::new(rgba(&noisy), width, height);
            let original = attr.create_image_rgba(original.as_ref(), SRGB_GAMMA)?;
            let modified = attr.create_image_rgba(modified.as_ref(), SRGB_GAMMA)?;
            attr.compare(&original, modified)?
        };
        assert_eq!(from_bytes.to_bits(), typed.to_bits());

        let rgb_bytes: Vec<u8> = bytes.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect();
        let original = attr.create_image(&rgb_bytes, ColorType::Rgb, width, height, SRGB_GAMMA)?;
        // same pixels behind a 4-pixel stride padding
        let stride = width + 4;
        let mut padded = vec![RGB8::new(255, 0, 255); stride * height];
        for (row, src) in padded.chunks_exact_mut(stride).zip(rgb_bytes.chunks_exact(width * 3)) {
            for (out, px) in row.iter_mut().zip(src.chunks_exact(3)) {
                *out = RGB8::new(px[0], px[1], px[2]);
            }
        }
        let strided = Img::new_stride(&padded[..], width, height, stride);
        let modified = attr.create_image_rgb(strided, SRGB_GAMMA)?;
        assert!(attr.compare(&original, modified)?.abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn unsupported_channel_count() {
        let mut attr = Dssim::new();
        let err = attr
            .create_image_from_callback(4, 8, 8, constant_lab([0.0; 3]))
            .unwrap_err();
        assert!(matches!(err, DssimError::UnsupportedChannelCount(4)));
    }

    #[test]
    fn scale_settings() {
        let mut attr = Dssim::new();
        assert_eq!(attr.scale_weights(), &DEFAULT_WEIGHTS[..4]);
        assert!(attr.subsample_chroma());

        attr.set_scales(9, None).unwrap();
        assert_eq!(attr.scale_weights(), &DEFAULT_WEIGHTS);

        attr.set_scales(3, Some(&[1.0][..])).unwrap();
        assert_eq!(attr.scale_weights(), &[1.0, DEFAULT_WEIGHTS[1], DEFAULT_WEIGHTS[2]]);

        attr.set_scales(0, Some(&[2.0, 5.0][..])).unwrap();
        assert_eq!(attr.scale_weights(), &[2.0]);

        for bad in [[0.0, 0.0], [-1.0, 1.0], [f64::NAN, 1.0]] {
            assert!(matches!(
                attr.set_scales(2, Some(&bad[..])),
                Err(DssimError::InvalidWeights)
            ));
        }
        assert_eq!(attr.scale_weights(), &[2.0]);

        assert!(attr.set_color_handling(false, -0.5).is_err());
        attr.set_color_handling(false, 0.5).unwrap();
        assert!(!attr.subsample_chroma());
        assert!((attr.color_weight() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn scale_count_limits_pyramid() -> anyhow::Result<()> {
        let mut attr = Dssim::new();
        attr.set_scales(2, None)?;
        let img = attr.create_image(&random_pixels(256 * 256), ColorType::Gray, 256, 256, SRGB_GAMMA)?;
        assert_eq!(img.num_scales(0), 2);
        Ok(())
    }

    #[test]
    fn unused_scales_with_zero_weight() -> anyhow::Result<()> {
        let mut attr = Dssim::new();
        attr.set_scales(2, Some(&[0.0, 1.0][..]))?;
        // too small for a second scale, so no weight is left
        let original = attr.create_image(&[10u8; 64], ColorType::Gray, 8, 8, SRGB_GAMMA)?;
        let modified = attr.create_image(&[10u8; 64], ColorType::Gray, 8, 8, SRGB_GAMMA)?;
        assert!(matches!(
            attr.compare(&original, modified),
            Err(DssimError::InvalidWeights)
        ));
        Ok(())
    }

    fn mismatched_chroma() -> (Dssim, DssimImage, DssimImage) {
        let mut attr = Dssim::new();
        let pixels = random_pixels(16 * 16 * 3);
        let original = attr
            .create_image(&pixels, ColorType::Rgb, 16, 16, SRGB_GAMMA)
            .unwrap();
        attr.set_color_handling(false, DEFAULT_COLOR_WEIGHT).unwrap();
        let modified = attr
            .create_image(&pixels, ColorType::Rgb, 16, 16, SRGB_GAMMA)
            .unwrap();
        attr.set_save_ssim_maps(1, 3);
        (attr, original, modified)
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "channel 1 scale 0")]
    fn mismatched_scales_are_loud_in_debug() {
        let (mut attr, original, modified) = mismatched_chroma();
        let _ = attr.compare(&original, modified);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn mismatched_scales_count_as_dissimilar() {
        let (mut attr, original, modified) = mismatched_chroma();
        let dssim = attr.compare(&original, modified).unwrap();
        assert!(dssim > 0.0);
        assert!(attr.take_ssim_map(0, 0).is_some());
        assert!(attr.take_ssim_map(0, 1).is_none());
    }
}
