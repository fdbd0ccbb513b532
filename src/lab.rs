//! Conversion of 8-bit pixels to the planar L\*a\*b\* representation DSSIM
//! compares.

use imgref::*;
use nalgebra::{Matrix3, Vector3};
use rgb::{FromSlice, RGB8, RGBA8};

use crate::gamma::GammaTable;
use crate::DssimError;

const D65_X: f32 = 0.9505;
const D65_Y: f32 = 1.0;
const D65_Z: f32 = 1.089;

const EPSILON: f32 = 216.0 / 24389.0;
// http://www.brucelindbloom.com/LContinuity.html
const KAPPA: f32 = 24389.0 / (27.0 * 116.0);

// Keep a* and b* non-negative across the sRGB gamut
const A_OFFSET: f32 = 86.2;
const B_OFFSET: f32 = 107.9;
const AB_RANGE: f32 = 220.0;

// Rounding in the matrix can push white a hair over 1.0
const RANGE_SLACK: f32 = 1e-4;

/// Pixel layout of byte buffers passed to
/// [`Dssim::create_image`](crate::Dssim::create_image).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorType {
    /// 1 byte per pixel, gamma applied
    Gray,
    /// 3 bytes per pixel, gamma applied
    Rgb,
    /// 4 bytes per pixel (non-premultiplied alpha last), gamma applied
    Rgba,
    /// 1 byte per pixel, used as-is
    Luma,
    /// 3 bytes per pixel (L, a, b), used as-is
    Lab,
    /// 4 bytes per pixel like [`ColorType::Rgba`], but only luma is compared
    RgbaToGray,
}

impl ColorType {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray | Self::Luma => 1,
            Self::Rgb | Self::Lab => 3,
            Self::Rgba | Self::RgbaToGray => 4,
        }
    }

    #[must_use]
    pub const fn num_channels(self) -> usize {
        match self {
            Self::Gray | Self::Luma | Self::RgbaToGray => 1,
            Self::Rgb | Self::Rgba | Self::Lab => 3,
        }
    }

    /// Whether the gamma table is consulted for this layout.
    #[must_use]
    pub const fn uses_gamma(self) -> bool {
        !matches!(self, Self::Luma | Self::Lab)
    }
}

/// Converts gamma-encoded pixels to L\*a\*b\* scaled into 0..=1.
///
/// Transparent pixels are composited over a synthetic background that
/// changes every few pixels (chosen from the bits of `x ^ y`), so alpha
/// differences show up against several backgrounds in a single pass.
#[derive(Debug, Clone)]
pub struct PixelConverter {
    gamma: GammaTable,
    rgb_to_xyz: Matrix3<f32>,
}

impl PixelConverter {
    #[must_use]
    pub fn new(gamma: GammaTable) -> Self {
        // sRGB primaries, already divided by the D65 white point
        let white = Vector3::new(D65_X, D65_Y, D65_Z);
        #[rustfmt::skip]
        let rgb_to_xyz = Matrix3::new(
            0.4124, 0.3576, 0.1805,
            0.2126, 0.7152, 0.0722,
            0.0193, 0.1192, 0.9505,
        );
        let rgb_to_xyz = Matrix3::from_diagonal(&white.map(|w| 1.0 / w)) * rgb_to_xyz;

        Self { gamma, rgb_to_xyz }
    }

    /// Lightness of a gray pixel.
    #[inline]
    #[must_use]
    pub fn gray_to_l(&self, value: u8) -> f32 {
        l_from_y(self.gamma.lookup(value))
    }

    /// Opaque RGB pixel to `[L, a, b]`.
    #[inline]
    #[must_use]
    pub fn rgb_to_lab(&self, px: RGB8) -> [f32; 3] {
        let rgb = Vector3::new(
            self.gamma.lookup(px.r),
            self.gamma.lookup(px.g),
            self.gamma.lookup(px.b),
        );
        self.linear_to_lab(&rgb)
    }

    /// RGBA pixel at `(x, y)` to `[L, a, b]`, composited over the synthetic
    /// background.
    #[inline]
    #[must_use]
    pub fn rgba_to_lab(&self, px: RGBA8, x: usize, y: usize) -> [f32; 3] {
        let lab = self.rgb_to_lab(RGB8::new(px.r, px.g, px.b));
        if px.a == 255 {
            return lab;
        }

        let alpha = f32::from(px.a) / 255.0;
        let background = background_bits(x, y);
        let mut out = [0f32; 3];
        for ((out, v), bit) in out.iter_mut().zip(lab).zip(background) {
            *out = composite(v, alpha, bit);
        }
        debug_assert!(out.iter().all(|&v| in_unit_range(v)), "{:?}", out);
        out
    }

    /// RGBA pixel at `(x, y)` to lightness only.
    #[inline]
    #[must_use]
    pub fn rgba_to_l(&self, px: RGBA8, x: usize, y: usize) -> f32 {
        let [l, _, _] = self.rgb_to_lab(RGB8::new(px.r, px.g, px.b));
        if px.a == 255 {
            return l;
        }
        composite(l, f32::from(px.a) / 255.0, background_bits(x, y)[0])
    }

    #[inline]
    fn linear_to_lab(&self, rgb: &Vector3<f32>) -> [f32; 3] {
        let xyz = self.rgb_to_xyz * rgb;
        let fx = lab_f(xyz.x);
        let fy = lab_f(xyz.y);
        let fz = lab_f(xyz.z);

        let lab = [
            fy.mul_add(1.16, -0.16),
            500.0f32.mul_add(fx - fy, A_OFFSET) / AB_RANGE,
            200.0f32.mul_add(fy - fz, B_OFFSET) / AB_RANGE,
        ];
        debug_assert!(lab.iter().all(|&v| in_unit_range(v)), "{:?}", lab);
        lab
    }
}

/// Which of L, a, b get the background added for the pixel at `(x, y)`.
#[inline(always)]
fn background_bits(x: usize, y: usize) -> [bool; 3] {
    let n = x ^ y;
    [n & 4 != 0, n & 8 != 0, n & 16 != 0]
}

#[inline(always)]
fn composite(value: f32, alpha: f32, background: bool) -> f32 {
    let premultiplied = value * alpha;
    if background {
        premultiplied + (1.0 - alpha)
    } else {
        premultiplied
    }
}

#[inline(always)]
fn lab_f(t: f32) -> f32 {
    if t > EPSILON {
        t.cbrt()
    } else {
        KAPPA.mul_add(t, 16.0 / 116.0)
    }
}

#[inline(always)]
fn l_from_y(y: f32) -> f32 {
    lab_f(y).mul_add(1.16, -0.16)
}

fn in_unit_range(v: f32) -> bool {
    (-RANGE_SLACK..=1.0 + RANGE_SLACK).contains(&v)
}

/// Pixels of one of the [`ColorType`] layouts, read a row at a time.
///
/// Only layouts that get linearized carry a [`PixelConverter`].
pub(crate) enum PixelRows<'a> {
    Luma(ImgRef<'a, u8>),
    Lab(ImgRef<'a, RGB8>),
    Gray(ImgRef<'a, u8>, PixelConverter),
    Rgb(ImgRef<'a, RGB8>, PixelConverter),
    Rgba(ImgRef<'a, RGBA8>, PixelConverter),
    RgbaToGray(ImgRef<'a, RGBA8>, PixelConverter),
}

impl<'a> PixelRows<'a> {
    /// Views a packed buffer as `width * height` pixels of `color_type`.
    ///
    /// The gamma table is built (and `gamma` validated) only when
    /// `color_type` uses it.
    pub fn from_bytes(
        pixels: &'a [u8],
        color_type: ColorType,
        width: usize,
        height: usize,
        gamma: f64,
    ) -> Result<Self, DssimError> {
        let len = width
            .checked_mul(height)
            .ok_or(DssimError::InvalidImageSize { width, height })?;
        let expected = len
            .checked_mul(color_type.bytes_per_pixel())
            .ok_or(DssimError::InvalidImageSize { width, height })?;
        if pixels.len() < expected {
            return Err(DssimError::InvalidBufferSize {
                expected,
                actual: pixels.len(),
            });
        }

        let converter = || GammaTable::new(gamma).map(PixelConverter::new);
        Ok(match color_type {
            ColorType::Luma => Self::Luma(ImgRef::new(&pixels[..len], width, height)),
            ColorType::Lab => Self::Lab(ImgRef::new(&pixels.as_rgb()[..len], width, height)),
            ColorType::Gray => Self::Gray(ImgRef::new(&pixels[..len], width, height), converter()?),
            ColorType::Rgb => Self::Rgb(
                ImgRef::new(&pixels.as_rgb()[..len], width, height),
                converter()?,
            ),
            ColorType::Rgba => Self::Rgba(
                ImgRef::new(&pixels.as_rgba()[..len], width, height),
                converter()?,
            ),
            ColorType::RgbaToGray => Self::RgbaToGray(
                ImgRef::new(&pixels.as_rgba()[..len], width, height),
                converter()?,
            ),
        })
    }

    pub fn width(&self) -> usize {
        match self {
            Self::Luma(img) | Self::Gray(img, _) => img.width(),
            Self::Lab(img) | Self::Rgb(img, _) => img.width(),
            Self::Rgba(img, _) | Self::RgbaToGray(img, _) => img.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Self::Luma(img) | Self::Gray(img, _) => img.height(),
            Self::Lab(img) | Self::Rgb(img, _) => img.height(),
            Self::Rgba(img, _) | Self::RgbaToGray(img, _) => img.height(),
        }
    }

    pub const fn num_channels(&self) -> usize {
        match self {
            Self::Luma(_) | Self::Gray(..) | Self::RgbaToGray(..) => 1,
            Self::Lab(_) | Self::Rgb(..) | Self::Rgba(..) => 3,
        }
    }

    pub fn write_row(&self, channels: &mut [&mut [f32]], y: usize) {
        match (self, channels) {
            (Self::Luma(img), [l]) => {
                for (out, &v) in l.iter_mut().zip(row(img, y)) {
                    *out = f32::from(v) / 255.0;
                }
            }
            (Self::Gray(img, conv), [l]) => {
                for (out, &v) in l.iter_mut().zip(row(img, y)) {
                    *out = conv.gray_to_l(v);
                }
            }
            (Self::RgbaToGray(img, conv), [l]) => {
                for (x, (out, &px)) in l.iter_mut().zip(row(img, y)).enumerate() {
                    *out = conv.rgba_to_l(px, x, y);
                }
            }
            (Self::Lab(img), [l, a, b]) => {
                for (x, px) in row(img, y).iter().enumerate() {
                    l[x] = f32::from(px.r) / 255.0;
                    a[x] = f32::from(px.g) / 255.0;
                    b[x] = f32::from(px.b) / 255.0;
                }
            }
            (Self::Rgb(img, conv), [l, a, b]) => {
                for (x, &px) in row(img, y).iter().enumerate() {
                    [l[x], a[x], b[x]] = conv.rgb_to_lab(px);
                }
            }
            (Self::Rgba(img, conv), [l, a, b]) => {
                for (x, &px) in row(img, y).iter().enumerate() {
                    [l[x], a[x], b[x]] = conv.rgba_to_lab(px, x, y);
                }
            }
            (rows, channels) => unreachable!(
                "{}-channel rows written to {} channels",
                rows.num_channels(),
                channels.len()
            ),
        }
    }
}

/// Row `y` without the stride padding.
#[inline(always)]
fn row<'r, T>(img: &'r ImgRef<'_, T>, y: usize) -> &'r [T] {
    &img.buf()[y * img.stride()..][..img.width()]
}
