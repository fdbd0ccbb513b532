//! Multi-scale planar images, ready for comparison.

use imgref::*;
use tracing::debug;

use crate::blur::{blur, blur_in_place};
use crate::DssimError;

/// Planes smaller than this are not downsampled any further.
const MIN_SCALE_SIZE: usize = 8;

/// Source of pixel rows for
/// [`Dssim::create_image_from_callback`](crate::Dssim::create_image_from_callback).
///
/// Implemented for closures taking `(channels, y)`.
pub trait RowSource {
    /// Writes row `y` into `channels`.
    ///
    /// `channels` holds 1 (luma only) or 3 (L, a, b) buffers, each exactly as
    /// long as the image is wide. Values are expected in roughly 0..=1.
    fn write_row(&mut self, channels: &mut [&mut [f32]], y: usize);
}

impl<F> RowSource for F
where
    F: FnMut(&mut [&mut [f32]], usize),
{
    #[inline]
    fn write_row(&mut self, channels: &mut [&mut [f32]], y: usize) {
        self(channels, y);
    }
}

/// One channel at one scale, with the local statistics SSIM needs.
#[derive(Debug, Clone)]
pub(crate) struct DssimChan {
    pub is_chroma: bool,
    /// Pixel values (chroma is pre-blurred once more)
    pub img: ImgVec<f32>,
    /// `blur(img)`
    pub mu: ImgVec<f32>,
    /// `blur(img * img)`
    pub img_sq_blur: ImgVec<f32>,
}

impl DssimChan {
    fn new(mut img: ImgVec<f32>, is_chroma: bool, tmp: &mut Vec<f32>) -> Result<Self, DssimError> {
        let (width, height) = (img.width(), img.height());
        let tmp = scratch(tmp, width * height)?;

        // Subsampled chroma aliases; smooth it once more before taking statistics
        if is_chroma {
            blur_in_place(img.as_mut(), tmp);
        }

        let mu = blur(img.as_ref(), tmp)?;

        let mut img_sq_blur = alloc_plane(width, height)?;
        for (sq, px) in img_sq_blur.buf_mut().iter_mut().zip(img.pixels()) {
            *sq = px * px;
        }
        blur_in_place(img_sq_blur.as_mut(), tmp);

        Ok(Self {
            is_chroma,
            img,
            mu,
            img_sq_blur,
        })
    }

    pub fn width(&self) -> usize {
        self.img.width()
    }

    pub fn height(&self) -> usize {
        self.img.height()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelScales {
    pub scales: Vec<DssimChan>,
}

/// Preprocessed image pyramid.
///
/// An original image can be compared any number of times. A modified image
/// is consumed by [`Dssim::compare`](crate::Dssim::compare).
#[derive(Debug, Clone)]
pub struct DssimImage {
    width: usize,
    height: usize,
    pub(crate) channels: Vec<ChannelScales>,
}

impl DssimImage {
    /// Width of the full-resolution image.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Height of the full-resolution image.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of scales kept for `channel` (0 if there is no such channel).
    #[must_use]
    pub fn num_scales(&self, channel: usize) -> usize {
        self.channels.get(channel).map_or(0, |c| c.scales.len())
    }

    /// `(width, height)` of one channel at one scale.
    #[must_use]
    pub fn scale_size(&self, channel: usize, scale: usize) -> Option<(usize, usize)> {
        let chan = self.channels.get(channel)?.scales.get(scale)?;
        Some((chan.width(), chan.height()))
    }

    pub(crate) fn new<S: RowSource + ?Sized>(
        num_channels: usize,
        width: usize,
        height: usize,
        num_scales: usize,
        subsample_chroma: bool,
        source: &mut S,
        tmp: &mut Vec<f32>,
    ) -> Result<Self, DssimError> {
        if num_channels != 1 && num_channels != 3 {
            return Err(DssimError::UnsupportedChannelCount(num_channels));
        }
        let fits = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(num_channels))
            .is_some();
        if width == 0 || height == 0 || !fits {
            return Err(DssimError::InvalidImageSize { width, height });
        }

        let subsample = subsample_chroma
            && num_channels > 1
            && width >= MIN_SCALE_SIZE
            && height >= MIN_SCALE_SIZE;

        let base = if subsample {
            convert_subsampled(num_channels, width, height, source)?
        } else {
            convert_simple(num_channels, width, height, source)?
        };

        let mut channels = Vec::with_capacity(num_channels);
        for (ch, plane) in base.into_iter().enumerate() {
            let is_chroma = ch > 0;
            let planes = build_pyramid(plane, num_scales)?;

            let mut scales = Vec::with_capacity(planes.len());
            for img in planes {
                scales.push(DssimChan::new(img, is_chroma, tmp)?);
            }
            channels.push(ChannelScales { scales });
        }

        debug!(
            width,
            height,
            channels = num_channels,
            scales = channels.first().map_or(0, |c| c.scales.len()),
            chroma_subsampled = subsample,
            "built image pyramid"
        );

        Ok(Self {
            width,
            height,
            channels,
        })
    }
}

pub(crate) fn alloc_plane(width: usize, height: usize) -> Result<ImgVec<f32>, DssimError> {
    let len = width
        .checked_mul(height)
        .ok_or(DssimError::InvalidImageSize { width, height })?;
    let mut plane = Vec::new();
    plane.try_reserve_exact(len)?;
    plane.resize(len, 0.0);
    Ok(ImgVec::new(plane, width, height))
}

/// Grows `tmp` to at least `len` values (never shrinks it).
pub(crate) fn scratch(tmp: &mut Vec<f32>, len: usize) -> Result<&mut [f32], DssimError> {
    if tmp.len() < len {
        tmp.try_reserve_exact(len - tmp.len())?;
        tmp.resize(len, 0.0);
    }
    Ok(&mut tmp[..len])
}

/// Every channel at full resolution; rows are written straight into the
/// planes.
fn convert_simple<S: RowSource + ?Sized>(
    num_channels: usize,
    width: usize,
    height: usize,
    source: &mut S,
) -> Result<Vec<ImgVec<f32>>, DssimError> {
    let mut planes = Vec::with_capacity(num_channels);
    for _ in 0..num_channels {
        planes.push(alloc_plane(width, height)?);
    }

    {
        let mut plane_rows: Vec<_> = planes.iter_mut().map(|p| p.rows_mut()).collect();
        for y in 0..height {
            let mut rows: Vec<&mut [f32]> = plane_rows.iter_mut().filter_map(Iterator::next).collect();
            source.write_row(&mut rows, y);
        }
    }

    Ok(planes)
}

/// Luma at full resolution, chroma averaged over 2x2 blocks as rows arrive.
fn convert_subsampled<S: RowSource + ?Sized>(
    num_channels: usize,
    width: usize,
    height: usize,
    source: &mut S,
) -> Result<Vec<ImgVec<f32>>, DssimError> {
    let half_width = width / 2;
    let half_height = height / 2;

    let mut luma = alloc_plane(width, height)?;
    let mut chroma = Vec::with_capacity(num_channels - 1);
    for _ in 1..num_channels {
        chroma.push(alloc_plane(half_width, half_height)?);
    }

    // Only chroma needs full-width rows; luma goes straight into its plane
    let mut chroma0 = alloc_plane(width, num_channels - 1)?;
    let mut chroma1 = alloc_plane(width, num_channels - 1)?;
    {
        let mut luma_rows = luma.rows_mut();
        let mut chroma_rows: Vec<_> = chroma.iter_mut().map(|p| p.rows_mut()).collect();

        for y in (0..height).step_by(2) {
            let Some(luma0) = luma_rows.next() else {
                break;
            };
            let mut rows0: Vec<&mut [f32]> = Vec::with_capacity(num_channels);
            rows0.push(luma0);
            rows0.extend(chroma0.rows_mut());
            source.write_row(&mut rows0, y);

            // Odd trailing row is luma-only
            let Some(luma1) = luma_rows.next() else {
                break;
            };
            let mut rows1: Vec<&mut [f32]> = Vec::with_capacity(num_channels);
            rows1.push(luma1);
            rows1.extend(chroma1.rows_mut());
            source.write_row(&mut rows1, y + 1);

            for ((out_rows, top), bottom) in chroma_rows.iter_mut().zip(&rows0[1..]).zip(&rows1[1..]) {
                let Some(out) = out_rows.next() else {
                    continue;
                };
                for (x, out) in out.iter_mut().enumerate() {
                    *out = (top[2 * x] + top[2 * x + 1] + bottom[2 * x] + bottom[2 * x + 1]) * 0.25;
                }
            }
        }
    }

    let mut planes = Vec::with_capacity(num_channels);
    planes.push(luma);
    planes.extend(chroma);
    Ok(planes)
}

/// Base plane followed by successively halved copies, while they stay at
/// least [`MIN_SCALE_SIZE`] in both dimensions.
fn build_pyramid(base: ImgVec<f32>, num_scales: usize) -> Result<Vec<ImgVec<f32>>, DssimError> {
    let mut planes = Vec::with_capacity(num_scales);
    planes.push(base);

    while planes.len() < num_scales {
        let prev = &planes[planes.len() - 1];
        if prev.width() / 2 < MIN_SCALE_SIZE || prev.height() / 2 < MIN_SCALE_SIZE {
            break;
        }
        let next = downsample_by_2(prev.as_ref())?;
        planes.push(next);
    }

    Ok(planes)
}

/// 2x2 box average. An odd trailing row or column is dropped.
fn downsample_by_2(src: ImgRef<'_, f32>) -> Result<ImgVec<f32>, DssimError> {
    let mut out = alloc_plane(src.width() / 2, src.height() / 2)?;

    let mut src_rows = src.rows();
    for out_row in out.rows_mut() {
        let (Some(top), Some(bottom)) = (src_rows.next(), src_rows.next()) else {
            break;
        };
        for (x, out) in out_row.iter_mut().enumerate() {
            *out = (top[2 * x] + top[2 * x + 1] + bottom[2 * x] + bottom[2 * x + 1]) * 0.25;
        }
    }

    Ok(out)
}
